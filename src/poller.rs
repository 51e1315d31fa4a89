//! Readiness polling for the popup flow.
//!
//! When a gallery item is activated, the popup should show its content as soon
//! as the item's preload has settled, but never wait longer than a fixed
//! timeout. [`ReadinessPoller::wait_for`] returns an [`ActivationSession`] that
//! resolves exactly once, either immediately (entry already terminal) or when
//! the first of two timers wins:
//!
//! - a poll timer that samples the entry every `poll_interval`
//! - a deadline timer that fires after `timeout`
//!
//! The winner writes the outcome cell and cancels the other timer. Dropping
//! the session cancels both.

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use web_time::Instant;

use crate::constants::{DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT, MIN_POLL_INTERVAL};
use crate::preload::{PreloadEntry, PreloadPhase, PreloadRegistry};
use crate::timer::{TimerGuard, TimerQueue};

/// Poll cadence and upper bound on the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

/// Why a session resolved. Every reason means "proceed"; failure is only
/// reported so callers can tell it apart (e.g. for analytics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProceedReason {
    /// Entry was already ready at activation
    AlreadyReady,
    /// Entry had already failed at activation
    AlreadyFailed,
    /// A poll observed the entry ready
    Ready,
    /// A poll observed the entry failed
    Failed,
    /// The deadline passed first
    TimedOut,
}

impl ProceedReason {
    pub fn is_failure(self) -> bool {
        matches!(self, ProceedReason::AlreadyFailed | ProceedReason::Failed)
    }

    pub fn is_timeout(self) -> bool {
        self == ProceedReason::TimedOut
    }

    /// Whether the session resolved without waiting.
    pub fn is_immediate(self) -> bool {
        matches!(
            self,
            ProceedReason::AlreadyReady | ProceedReason::AlreadyFailed
        )
    }
}

/// The "proceed" signal handed to the popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proceed {
    pub reason: ProceedReason,
    /// Phase of the entry at resolution (`NotStarted` if it was never registered)
    pub phase: PreloadPhase,
    /// Queue time at which the session resolved
    pub resolved_at: Instant,
    /// Time between activation and resolution
    pub waited: Duration,
}

struct SessionShared {
    resource_id: String,
    started_at: Instant,
    outcome: OnceCell<Proceed>,
    poll: RefCell<Option<TimerGuard>>,
    deadline: RefCell<Option<TimerGuard>>,
    on_proceed: RefCell<Option<Box<dyn FnOnce(Proceed)>>>,
}

impl SessionShared {
    /// Write the outcome once. Later calls are no-ops and return `false`.
    fn resolve(&self, reason: ProceedReason, phase: PreloadPhase, at: Instant) -> bool {
        let proceed = Proceed {
            reason,
            phase,
            resolved_at: at,
            waited: at.saturating_duration_since(self.started_at),
        };
        if self.outcome.set(proceed).is_err() {
            return false;
        }

        // Cancel whichever timer lost the race
        let poll = self.poll.borrow_mut().take();
        let deadline = self.deadline.borrow_mut().take();
        drop(poll);
        drop(deadline);

        log::debug!(
            "Proceeding with {} after {:?} ({:?})",
            self.resource_id,
            proceed.waited,
            reason
        );

        let callback = self.on_proceed.borrow_mut().take();
        if let Some(callback) = callback {
            callback(proceed);
        }
        true
    }
}

fn phase_of(entry: Option<&Rc<PreloadEntry>>) -> PreloadPhase {
    entry.map_or(PreloadPhase::NotStarted, |e| e.phase())
}

fn arm_poll(
    timers: &TimerQueue,
    shared: &Rc<SessionShared>,
    entry: Option<Rc<PreloadEntry>>,
    interval: Duration,
) {
    let weak: Weak<SessionShared> = Rc::downgrade(shared);
    let queue = timers.downgrade();
    let guard = timers.schedule_in(interval, move |at| {
        let (Some(shared), Some(queue)) = (weak.upgrade(), queue.upgrade()) else {
            return;
        };
        match phase_of(entry.as_ref()) {
            PreloadPhase::Ready => {
                shared.resolve(ProceedReason::Ready, PreloadPhase::Ready, at);
            }
            PreloadPhase::Failed => {
                shared.resolve(ProceedReason::Failed, PreloadPhase::Failed, at);
            }
            phase => {
                log::trace!("{} still {:?}, polling again", shared.resource_id, phase);
                arm_poll(&queue, &shared, entry, interval);
            }
        }
    });
    *shared.poll.borrow_mut() = Some(guard);
}

/// Waits on preload entries for the popup flow.
pub struct ReadinessPoller {
    registry: Rc<PreloadRegistry>,
    options: PollOptions,
}

impl ReadinessPoller {
    pub fn new(registry: Rc<PreloadRegistry>, options: PollOptions) -> Self {
        Self { registry, options }
    }

    pub fn options(&self) -> PollOptions {
        self.options
    }

    pub fn registry(&self) -> &Rc<PreloadRegistry> {
        &self.registry
    }

    /// Wait for `resource_id` with the poller's default options.
    pub fn wait_for(&self, resource_id: &str) -> ActivationSession {
        self.wait_for_with(resource_id, self.options)
    }

    /// Wait for `resource_id`. The returned session resolves at the latest
    /// `options.timeout` after this call.
    ///
    /// The entry is looked up once, here. An id the registry does not know
    /// is treated as a stalled preload, and an entry registered after this
    /// call is never picked up; both resolve at the deadline. Intervals
    /// below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn wait_for_with(&self, resource_id: &str, options: PollOptions) -> ActivationSession {
        let options = PollOptions {
            poll_interval: options.poll_interval.max(MIN_POLL_INTERVAL),
            ..options
        };
        let timers = self.registry.timers();
        let now = timers.now();
        let entry = self.registry.lookup(resource_id);
        if entry.is_none() {
            log::warn!("No preload registered for {}, waiting for timeout", resource_id);
        }

        let shared = Rc::new(SessionShared {
            resource_id: resource_id.to_string(),
            started_at: now,
            outcome: OnceCell::new(),
            poll: RefCell::new(None),
            deadline: RefCell::new(None),
            on_proceed: RefCell::new(None),
        });
        let session = ActivationSession {
            deadline: now + options.timeout,
            shared,
        };

        match phase_of(entry.as_ref()) {
            PreloadPhase::Ready => {
                session
                    .shared
                    .resolve(ProceedReason::AlreadyReady, PreloadPhase::Ready, now);
                return session;
            }
            PreloadPhase::Failed => {
                session
                    .shared
                    .resolve(ProceedReason::AlreadyFailed, PreloadPhase::Failed, now);
                return session;
            }
            _ => {}
        }

        // Deadline first: on a tie with a poll tick the timeout wins
        let weak = Rc::downgrade(&session.shared);
        let deadline_entry = entry.clone();
        let deadline = timers.schedule_at(session.deadline, move |at| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let phase = phase_of(deadline_entry.as_ref());
            if shared.resolve(ProceedReason::TimedOut, phase, at) {
                log::info!("Timed out waiting for {} ({:?})", shared.resource_id, phase);
            }
        });
        *session.shared.deadline.borrow_mut() = Some(deadline);

        arm_poll(timers, &session.shared, entry, options.poll_interval);
        session
    }
}

impl fmt::Debug for ReadinessPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessPoller")
            .field("options", &self.options)
            .finish()
    }
}

/// One popup open waiting on one resource.
///
/// Dropping the session (popup closed) cancels its timers.
pub struct ActivationSession {
    deadline: Instant,
    shared: Rc<SessionShared>,
}

impl ActivationSession {
    pub fn target_resource_id(&self) -> &str {
        &self.shared.resource_id
    }

    /// Latest time at which the session resolves.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn started_at(&self) -> Instant {
        self.shared.started_at
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.outcome.get().is_some()
    }

    /// The proceed signal, once resolved.
    pub fn outcome(&self) -> Option<Proceed> {
        self.shared.outcome.get().copied()
    }

    /// Run `callback` on resolution, or right away if already resolved.
    /// Replaces a previously registered callback.
    pub fn on_proceed<F>(&self, callback: F)
    where
        F: FnOnce(Proceed) + 'static,
    {
        match self.outcome() {
            Some(proceed) => callback(proceed),
            None => *self.shared.on_proceed.borrow_mut() = Some(Box::new(callback)),
        }
    }

    /// Whether any timer is still armed for this session.
    pub fn has_pending_timers(&self) -> bool {
        let poll = self
            .shared
            .poll
            .borrow()
            .as_ref()
            .is_some_and(TimerGuard::is_pending);
        let deadline = self
            .shared
            .deadline
            .borrow()
            .as_ref()
            .is_some_and(TimerGuard::is_pending);
        poll || deadline
    }

    /// Discard the session. Equivalent to dropping it.
    pub fn cancel(self) {}
}

impl Drop for ActivationSession {
    fn drop(&mut self) {
        if !self.is_resolved() {
            log::debug!(
                "Activation for {} discarded before resolving",
                self.shared.resource_id
            );
        }
        let poll = self.shared.poll.borrow_mut().take();
        let deadline = self.shared.deadline.borrow_mut().take();
        drop(poll);
        drop(deadline);
        self.shared.on_proceed.borrow_mut().take();
    }
}

impl fmt::Debug for ActivationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationSession")
            .field("target", &self.shared.resource_id)
            .field("deadline", &self.deadline)
            .field("outcome", &self.outcome())
            .finish()
    }
}

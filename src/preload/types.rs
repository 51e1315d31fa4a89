//! Shared types for background preloading.
//!
//! A [`PreloadEntry`] is the tracked state of one proactive fetch. Entries are
//! handed out as `Rc<PreloadEntry>` so every caller observes the same record,
//! and only the registry moves them forward through their phases.

use std::cell::{Cell, RefCell};
use std::fmt;

use crate::error::ImageError;

/// Phase of a preload. Transitions only move forward:
/// `NotStarted -> Fetching -> Ready | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreloadPhase {
    /// Registered, fetch not begun (possibly waiting on the start delay)
    NotStarted,
    /// Load in flight
    Fetching,
    /// Load completed
    Ready,
    /// Load failed; never retried
    Failed,
}

impl PreloadPhase {
    /// Ready and Failed are terminal for the session.
    pub fn is_terminal(self) -> bool {
        matches!(self, PreloadPhase::Ready | PreloadPhase::Failed)
    }

    fn can_transition_to(self, next: PreloadPhase) -> bool {
        matches!(
            (self, next),
            (PreloadPhase::NotStarted, PreloadPhase::Fetching)
                | (PreloadPhase::Fetching, PreloadPhase::Ready)
                | (PreloadPhase::Fetching, PreloadPhase::Failed)
        )
    }
}

/// How a resource should be preloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadOptions {
    /// Start immediately instead of after the start delay
    pub priority: bool,
    /// Quality hint added to the fetch URL as `q`
    pub quality: Option<u8>,
    /// Sizes hint added to the fetch URL as `sizes`
    pub sizes: Option<String>,
}

impl PreloadOptions {
    pub fn priority() -> Self {
        Self {
            priority: true,
            ..Self::default()
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_sizes(mut self, sizes: impl Into<String>) -> Self {
        self.sizes = Some(sizes.into());
        self
    }
}

/// Snapshot of an entry in the shape a page component consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreloadStatus {
    pub is_preloaded: bool,
    pub has_error: bool,
    /// 0-100
    pub progress: f32,
}

/// Tracked state of one preloaded resource.
pub struct PreloadEntry {
    resource_id: String,
    phase: Cell<PreloadPhase>,
    progress: Cell<f32>,
    fetch_url: RefCell<Option<String>>,
    failure: RefCell<Option<ImageError>>,
}

impl PreloadEntry {
    pub(crate) fn new(resource_id: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            phase: Cell::new(PreloadPhase::NotStarted),
            progress: Cell::new(0.0),
            fetch_url: RefCell::new(None),
            failure: RefCell::new(None),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn phase(&self) -> PreloadPhase {
        self.phase.get()
    }

    /// Progress estimate (0-100). Only meaningful while fetching.
    pub fn progress(&self) -> f32 {
        self.progress.get()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    /// URL the fetch was issued for, once started.
    pub fn fetch_url(&self) -> Option<String> {
        self.fetch_url.borrow().clone()
    }

    /// Failure recorded when the entry moved to `Failed`.
    pub fn failure(&self) -> Option<ImageError> {
        self.failure.borrow().clone()
    }

    pub fn status(&self) -> PreloadStatus {
        let phase = self.phase();
        PreloadStatus {
            is_preloaded: phase == PreloadPhase::Ready,
            has_error: phase == PreloadPhase::Failed,
            progress: self.progress(),
        }
    }

    fn transition(&self, next: PreloadPhase) -> bool {
        let current = self.phase.get();
        if !current.can_transition_to(next) {
            log::warn!(
                "Rejected preload transition {:?} -> {:?} for {}",
                current,
                next,
                self.resource_id
            );
            return false;
        }
        log::debug!(
            "Preload {}: {:?} -> {:?}",
            self.resource_id,
            current,
            next
        );
        self.phase.set(next);
        true
    }

    pub(crate) fn begin_fetch(&self, url: &str) -> bool {
        if !self.transition(PreloadPhase::Fetching) {
            return false;
        }
        *self.fetch_url.borrow_mut() = Some(url.to_string());
        self.progress.set(0.0);
        true
    }

    /// Apply a byte-level progress report. Unknown totals and out-of-order
    /// reports leave progress as is.
    pub(crate) fn report_progress(&self, loaded: u64, total: Option<u64>) -> bool {
        if self.phase() != PreloadPhase::Fetching {
            return false;
        }
        let Some(total) = total.filter(|&t| t > 0) else {
            return false;
        };
        let percent = (loaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0) as f32;
        let percent = percent.max(self.progress.get());
        self.progress.set(percent);
        log::trace!("Preload {} at {:.0}%", self.resource_id, percent);
        true
    }

    pub(crate) fn complete(&self) -> bool {
        if !self.transition(PreloadPhase::Ready) {
            return false;
        }
        self.progress.set(100.0);
        true
    }

    pub(crate) fn fail(&self, reason: &str) -> bool {
        if !self.transition(PreloadPhase::Failed) {
            return false;
        }
        self.progress.set(0.0);
        *self.failure.borrow_mut() = Some(ImageError::PreloadFailure {
            resource_id: self.resource_id.clone(),
            reason: reason.to_string(),
        });
        true
    }
}

impl fmt::Debug for PreloadEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreloadEntry")
            .field("resource_id", &self.resource_id)
            .field("phase", &self.phase())
            .field("progress", &self.progress())
            .finish()
    }
}

/// Identifier of one load attempt issued to a [`ResourceLoader`].
pub type RequestId = u64;

/// Event reported by a transport for an issued load.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEvent {
    /// Bytes received so far; `total` is `None` when the size is unknown
    Progress { loaded: u64, total: Option<u64> },
    /// Load finished successfully
    Completed,
    /// Load failed (network error, missing resource, decode failure)
    Failed(String),
}

/// Transport that performs resource loads on the host's behalf.
///
/// `begin` must not block and must not call back into the registry; results
/// are collected later through `poll_event`.
pub trait ResourceLoader {
    /// Begin a single load attempt for `url`.
    fn begin(&mut self, id: RequestId, url: &str);

    /// Take the next reported event, if any.
    fn poll_event(&mut self) -> Option<(RequestId, LoadEvent)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_only_moves_forward() {
        let entry = PreloadEntry::new("/a.png");
        assert!(!entry.complete(), "cannot complete before fetching");
        assert!(entry.begin_fetch("/a.png"));
        assert!(!entry.begin_fetch("/a.png"));
        assert!(entry.complete());
        assert!(!entry.fail("late"));
        assert_eq!(entry.phase(), PreloadPhase::Ready);
        assert_eq!(entry.progress(), 100.0);
        assert!(entry.failure().is_none());
    }

    #[test]
    fn test_progress_requires_known_total() {
        let entry = PreloadEntry::new("/a.png");
        assert!(!entry.report_progress(10, Some(100)), "not fetching yet");

        entry.begin_fetch("/a.png");
        assert!(entry.report_progress(25, Some(100)));
        assert_eq!(entry.progress(), 25.0);

        assert!(!entry.report_progress(50, None));
        assert_eq!(entry.progress(), 25.0);
        assert!(!entry.report_progress(50, Some(0)));
    }

    #[test]
    fn test_failure_resets_progress_and_records_error() {
        let entry = PreloadEntry::new("/a.png");
        entry.begin_fetch("/a.png");
        entry.report_progress(90, Some(100));
        assert!(entry.fail("connection reset"));

        assert_eq!(entry.progress(), 0.0);
        let status = entry.status();
        assert!(status.has_error);
        assert!(!status.is_preloaded);
        assert_eq!(
            entry.failure(),
            Some(ImageError::PreloadFailure {
                resource_id: "/a.png".to_string(),
                reason: "connection reset".to_string(),
            })
        );
    }
}

//! Cooperative single-threaded timer queue.
//!
//! The host drives time forward with [`TimerQueue::advance_to`] once per tick
//! (usually with `Instant::now()`). Due tasks run in due-time order, each one
//! observing the queue clock set to its own due time, so a task that
//! reschedules itself keeps an exact cadence even when ticks are coarse.
//!
//! Every scheduled task is owned by a [`TimerGuard`]. Dropping the guard
//! cancels the task, which is how owners make sure nothing fires after they
//! are gone.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use web_time::Instant;

/// Identifier of a scheduled task.
pub type TimerId = u64;

type Task = Box<dyn FnOnce(Instant)>;

struct TimerInner {
    /// Current queue time (never moves backwards)
    now: Instant,
    /// Counter for generating unique timer IDs
    next_id: TimerId,
    /// Pending tasks ordered by due time, ties broken by scheduling order
    tasks: BTreeMap<(Instant, TimerId), Task>,
    /// Map from timer ID to its due time (for cancellation)
    due_at: HashMap<TimerId, Instant>,
}

impl TimerInner {
    fn remove(&mut self, id: TimerId) -> Option<Task> {
        let due = self.due_at.remove(&id)?;
        self.tasks.remove(&(due, id))
    }
}

/// Shared handle to a timer queue. Clones refer to the same queue.
#[derive(Clone)]
pub struct TimerQueue {
    inner: Rc<RefCell<TimerInner>>,
}

impl TimerQueue {
    /// Create an empty queue whose clock starts at `start`.
    pub fn new(start: Instant) -> Self {
        Self {
            inner: Rc::new(RefCell::new(TimerInner {
                now: start,
                next_id: 0,
                tasks: BTreeMap::new(),
                due_at: HashMap::new(),
            })),
        }
    }

    /// Current queue time.
    pub fn now(&self) -> Instant {
        self.inner.borrow().now
    }

    /// Schedule `task` to run at `at`. Times in the past run on the next advance.
    #[must_use = "dropping the guard cancels the timer"]
    pub fn schedule_at<F>(&self, at: Instant, task: F) -> TimerGuard
    where
        F: FnOnce(Instant) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let due = at.max(inner.now);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.tasks.insert((due, id), Box::new(task));
        inner.due_at.insert(id, due);
        log::trace!("Scheduled timer {} in {:?}", id, due - inner.now);

        TimerGuard {
            id,
            queue: Rc::downgrade(&self.inner),
        }
    }

    /// Schedule `task` to run `delay` after the current queue time.
    #[must_use = "dropping the guard cancels the timer"]
    pub fn schedule_in<F>(&self, delay: Duration, task: F) -> TimerGuard
    where
        F: FnOnce(Instant) + 'static,
    {
        let at = self.now() + delay;
        self.schedule_at(at, task)
    }

    /// Number of tasks still waiting to fire.
    pub fn pending(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    /// Due time of the earliest pending task.
    pub fn next_due(&self) -> Option<Instant> {
        self.inner
            .borrow()
            .tasks
            .first_key_value()
            .map(|(&(due, _), _)| due)
    }

    /// Run every task due at or before `target`, in order, then move the
    /// clock to `target`. Tasks scheduled by running tasks are picked up in
    /// the same call if they are due. Returns the number of tasks run.
    pub fn advance_to(&self, target: Instant) -> usize {
        let mut fired = 0;

        loop {
            // Pop under the borrow, run outside of it so tasks can schedule/cancel
            let (due, task) = {
                let mut inner = self.inner.borrow_mut();
                let Some((&(due, id), _)) = inner.tasks.first_key_value() else {
                    break;
                };
                if due > target {
                    break;
                }
                inner.due_at.remove(&id);
                let Some(task) = inner.tasks.remove(&(due, id)) else {
                    break;
                };
                if due > inner.now {
                    inner.now = due;
                }
                log::trace!("Firing timer {}", id);
                (due, task)
            };

            task(due);
            fired += 1;
        }

        let mut inner = self.inner.borrow_mut();
        if target > inner.now {
            inner.now = target;
        }
        fired
    }

    /// Non-owning handle, for tasks that need to reschedule on this queue
    /// without keeping it alive.
    pub fn downgrade(&self) -> WeakTimerQueue {
        WeakTimerQueue {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Advance the clock by `step` from the current queue time.
    pub fn advance_by(&self, step: Duration) -> usize {
        let target = self.now() + step;
        self.advance_to(target)
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("TimerQueue")
            .field("now", &inner.now)
            .field("pending", &inner.tasks.len())
            .finish()
    }
}

/// Weak counterpart of [`TimerQueue`].
#[derive(Clone)]
pub struct WeakTimerQueue {
    inner: Weak<RefCell<TimerInner>>,
}

impl WeakTimerQueue {
    pub fn upgrade(&self) -> Option<TimerQueue> {
        self.inner.upgrade().map(|inner| TimerQueue { inner })
    }
}

/// Owner of one scheduled task. Dropping it cancels the task if it has not
/// fired yet.
pub struct TimerGuard {
    id: TimerId,
    queue: Weak<RefCell<TimerInner>>,
}

impl TimerGuard {
    /// ID of the guarded task.
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Whether the task is still waiting to fire.
    pub fn is_pending(&self) -> bool {
        self.queue.upgrade().is_some_and(|inner| {
            let inner = inner.borrow();
            inner.due_at.contains_key(&self.id)
        })
    }

    /// Cancel the task now. Equivalent to dropping the guard.
    pub fn cancel(self) {}
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        let Some(inner) = self.queue.upgrade() else {
            return;
        };
        // The removed task is dropped after the borrow ends; it may own guards itself
        let removed = match inner.try_borrow_mut() {
            Ok(mut inner) => inner.remove(self.id),
            Err(_) => {
                log::warn!("Timer {} dropped while its queue was busy", self.id);
                None
            }
        };
        if removed.is_some() {
            log::trace!("Cancelled timer {}", self.id);
        }
        drop(removed);
    }
}

impl fmt::Debug for TimerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerGuard")
            .field("id", &self.id)
            .field("pending", &self.is_pending())
            .finish()
    }
}

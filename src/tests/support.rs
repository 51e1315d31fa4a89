//! Shared fixtures for unit and scenario tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::preload::{LoadEvent, RequestId, ResourceLoader};

pub(crate) fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Install a test logger once per process.
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct ScriptState {
    begun: Vec<(RequestId, String)>,
    events: VecDeque<(RequestId, LoadEvent)>,
}

/// Loader whose transport is driven by the test.
///
/// Clones share state, so a test keeps one clone and hands the other to the
/// registry.
#[derive(Clone, Default)]
pub(crate) struct ScriptedLoader {
    state: Rc<RefCell<ScriptState>>,
}

impl ScriptedLoader {
    /// Every `begin` call seen so far, in order.
    pub(crate) fn begun(&self) -> Vec<(RequestId, String)> {
        self.state.borrow().begun.clone()
    }

    /// Request id of the latest fetch of `url`. Matches the full fetch URL or
    /// the part before its query string.
    pub(crate) fn request_for(&self, url: &str) -> RequestId {
        let state = self.state.borrow();
        state
            .begun
            .iter()
            .rev()
            .find(|(_, begun)| begun == url || begun.split('?').next() == Some(url))
            .map(|(id, _)| *id)
            .unwrap_or_else(|| panic!("no fetch started for {url}: {:?}", state.begun))
    }

    pub(crate) fn push(&self, id: RequestId, event: LoadEvent) {
        self.state.borrow_mut().events.push_back((id, event));
    }

    pub(crate) fn progress(&self, url: &str, loaded: u64, total: Option<u64>) {
        let id = self.request_for(url);
        self.push(id, LoadEvent::Progress { loaded, total });
    }

    pub(crate) fn complete(&self, url: &str) {
        let id = self.request_for(url);
        self.push(id, LoadEvent::Completed);
    }

    pub(crate) fn fail(&self, url: &str, reason: &str) {
        let id = self.request_for(url);
        self.push(id, LoadEvent::Failed(reason.to_string()));
    }
}

impl ResourceLoader for ScriptedLoader {
    fn begin(&mut self, id: RequestId, url: &str) {
        self.state.borrow_mut().begun.push((id, url.to_string()));
    }

    fn poll_event(&mut self) -> Option<(RequestId, LoadEvent)> {
        self.state.borrow_mut().events.pop_front()
    }
}

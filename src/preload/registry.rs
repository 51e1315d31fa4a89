//! Page-lifetime registry of preloaded resources.
//!
//! One [`PreloadEntry`] per distinct resource id, never evicted and never
//! replaced. The registry issues the single fetch for each entry through a
//! [`ResourceLoader`], deferring non-priority fetches on the shared
//! [`TimerQueue`], and applies the transport's events as the host pumps it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use url::Url;

use super::types::{
    LoadEvent, PreloadEntry, PreloadOptions, PreloadPhase, RequestId, ResourceLoader,
};
use crate::constants::PRELOAD_DELAY;
use crate::source_set::{SplitUrl, set_param};
use crate::timer::{TimerGuard, TimerQueue};

/// Registry behaviour that comes from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySettings {
    /// Delay before a non-priority fetch starts
    pub preload_delay: Duration,
    /// Base used to resolve relative resource ids when annotating fetch URLs
    pub origin: Option<Url>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            preload_delay: PRELOAD_DELAY,
            origin: None,
        }
    }
}

/// Build the URL a preload fetches: the resource id with `q`/`sizes` set when
/// the options carry them.
pub fn fetch_url(resource_id: &str, options: &PreloadOptions, origin: Option<&Url>) -> String {
    if options.quality.is_none() && options.sizes.is_none() {
        return resource_id.to_string();
    }

    let mut extra: Vec<(&str, String)> = Vec::new();
    if let Some(quality) = options.quality {
        extra.push(("q", quality.to_string()));
    }
    if let Some(sizes) = &options.sizes {
        extra.push(("sizes", sizes.clone()));
    }

    let parsed = match origin {
        Some(base) => base.join(resource_id),
        None => Url::parse(resource_id),
    };

    match parsed {
        Ok(mut url) => {
            let mut params: Vec<(String, String)> = url.query_pairs().into_owned().collect();
            for (key, value) in &extra {
                replace_all(&mut params, key, value);
            }
            url.query_pairs_mut().clear().extend_pairs(params.iter());
            url.to_string()
        }
        Err(_) => {
            // Relative id and no origin: annotate the query in place
            let split = SplitUrl::parse(resource_id);
            let mut params = split.params.clone();
            for (key, value) in &extra {
                set_param(&mut params, key, value);
            }
            split.with_params(&params)
        }
    }
}

/// Set `key` at the position of its first occurrence, dropping later ones.
fn replace_all(params: &mut Vec<(String, String)>, key: &str, value: &str) {
    match params.iter().position(|(k, _)| k == key) {
        Some(first) => {
            params[first].1 = value.to_string();
            let mut index = 0;
            params.retain(|(k, _)| {
                let keep = index <= first || k != key;
                index += 1;
                keep
            });
        }
        None => params.push((key.to_string(), value.to_string())),
    }
}

struct RegistryInner {
    settings: RegistrySettings,
    /// Entries by resource id (append-only)
    entries: HashMap<String, Rc<PreloadEntry>>,
    /// Deferred starts waiting on the start delay
    deferred: HashMap<String, TimerGuard>,
    /// Map from request ID to the entry it is loading
    in_flight: HashMap<RequestId, Rc<PreloadEntry>>,
    /// Counter for generating unique request IDs
    next_request: RequestId,
    loader: Box<dyn ResourceLoader>,
}

impl RegistryInner {
    fn start_fetch(&mut self, entry: &Rc<PreloadEntry>, options: &PreloadOptions) {
        let url = fetch_url(entry.resource_id(), options, self.settings.origin.as_ref());
        if !entry.begin_fetch(&url) {
            return;
        }

        let id = self.next_request;
        self.next_request += 1;
        self.in_flight.insert(id, Rc::clone(entry));

        log::info!("Preloading {} (request {})", url, id);
        self.loader.begin(id, &url);
    }

    fn apply(&mut self, id: RequestId, event: LoadEvent) {
        let Some(entry) = self.in_flight.get(&id).cloned() else {
            log::warn!("Received load event for unknown request ID: {}", id);
            return;
        };

        match event {
            LoadEvent::Progress { loaded, total } => {
                entry.report_progress(loaded, total);
            }
            LoadEvent::Completed => {
                self.in_flight.remove(&id);
                if entry.complete() {
                    log::info!("Preloaded {}", entry.resource_id());
                }
            }
            LoadEvent::Failed(reason) => {
                self.in_flight.remove(&id);
                if entry.fail(&reason) {
                    log::warn!("Preload failed for {}: {}", entry.resource_id(), reason);
                }
            }
        }
    }
}

/// Registry of preload entries keyed by resource id.
pub struct PreloadRegistry {
    inner: Rc<RefCell<RegistryInner>>,
    timers: TimerQueue,
}

impl PreloadRegistry {
    /// Create a registry with default settings.
    pub fn new<L>(loader: L, timers: TimerQueue) -> Self
    where
        L: ResourceLoader + 'static,
    {
        Self::with_settings(loader, timers, RegistrySettings::default())
    }

    pub fn with_settings<L>(loader: L, timers: TimerQueue, settings: RegistrySettings) -> Self
    where
        L: ResourceLoader + 'static,
    {
        Self {
            inner: Rc::new(RefCell::new(RegistryInner {
                settings,
                entries: HashMap::new(),
                deferred: HashMap::new(),
                in_flight: HashMap::new(),
                next_request: 0,
                loader: Box::new(loader),
            })),
            timers,
        }
    }

    /// The timer queue deferred starts are scheduled on.
    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    /// Get the entry for `resource_id`, registering it and arranging its fetch
    /// on first sight. Later calls return the same entry without starting
    /// another fetch.
    pub fn get(&self, resource_id: &str, options: &PreloadOptions) -> Rc<PreloadEntry> {
        let (entry, needs_start) = {
            let mut inner = self.inner.borrow_mut();
            match inner.entries.get(resource_id).cloned() {
                Some(entry) => {
                    // Re-arm only an entry whose deferred start was cancelled
                    let idle = entry.phase() == PreloadPhase::NotStarted
                        && !inner.deferred.contains_key(resource_id);
                    (entry, idle)
                }
                None => {
                    let entry = Rc::new(PreloadEntry::new(resource_id));
                    inner
                        .entries
                        .insert(resource_id.to_string(), Rc::clone(&entry));
                    log::debug!("Registered preload entry for {}", resource_id);
                    (entry, true)
                }
            }
        };

        if needs_start {
            self.arm(&entry, options);
        }
        entry
    }

    fn arm(&self, entry: &Rc<PreloadEntry>, options: &PreloadOptions) {
        if options.priority {
            self.inner.borrow_mut().start_fetch(entry, options);
            return;
        }

        let delay = self.inner.borrow().settings.preload_delay;
        let weak: Weak<RefCell<RegistryInner>> = Rc::downgrade(&self.inner);
        let task_entry = Rc::clone(entry);
        let task_options = options.clone();
        let guard = self.timers.schedule_in(delay, move |_| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut inner = inner.borrow_mut();
            inner.deferred.remove(task_entry.resource_id());
            inner.start_fetch(&task_entry, &task_options);
        });

        log::debug!(
            "Deferring preload of {} by {:?}",
            entry.resource_id(),
            delay
        );
        self.inner
            .borrow_mut()
            .deferred
            .insert(entry.resource_id().to_string(), guard);
    }

    /// Look up an entry without registering it or starting anything.
    pub fn lookup(&self, resource_id: &str) -> Option<Rc<PreloadEntry>> {
        self.inner.borrow().entries.get(resource_id).cloned()
    }

    /// Cancel a deferred start that has not fired yet. The entry stays
    /// registered as not started. Returns `false` if nothing was pending.
    pub fn cancel_pending(&self, resource_id: &str) -> bool {
        let guard = self.inner.borrow_mut().deferred.remove(resource_id);
        match guard {
            Some(guard) => {
                log::debug!("Cancelled deferred preload of {}", resource_id);
                guard.cancel();
                true
            }
            None => false,
        }
    }

    /// Drain the transport's events and apply them. Returns the number of
    /// events processed.
    pub fn pump(&self) -> usize {
        let mut processed = 0;
        loop {
            let mut inner = self.inner.borrow_mut();
            let Some((id, event)) = inner.loader.poll_event() else {
                break;
            };
            inner.apply(id, event);
            processed += 1;
        }
        processed
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    /// Number of fetches issued and not yet settled.
    pub fn in_flight_count(&self) -> usize {
        self.inner.borrow().in_flight.len()
    }

    /// Whether a deferred start is waiting for `resource_id`.
    pub fn is_deferred(&self, resource_id: &str) -> bool {
        self.inner.borrow().deferred.contains_key(resource_id)
    }
}

impl fmt::Debug for PreloadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("PreloadRegistry")
            .field("entries", &inner.entries.len())
            .field("deferred", &inner.deferred.len())
            .field("in_flight", &inner.in_flight.len())
            .finish()
    }
}

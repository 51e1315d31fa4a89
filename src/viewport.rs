//! Viewport gating for lazy images.
//!
//! The [`IntersectionHost`] plays the role of an intersection observer: the
//! rendering surface feeds it the viewport rectangle and element bounds, and it
//! fires one-shot callbacks for watches whose element has come into view
//! (within a lead margin). A [`ViewportGate`] wraps one watch for one element.
//!
//! Watches are scoped: [`IntersectionHost::observe`] returns a [`WatchGuard`]
//! that deregisters the watch when dropped, whether or not it ever fired.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::constants::{DEFAULT_LEAD_MARGIN, DEFAULT_VISIBILITY_FRACTION};

/// Axis-aligned rectangle in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Grow the rectangle by `margin` on every side.
    pub fn expand(&self, margin: f32) -> Self {
        Self {
            x: self.x - margin,
            y: self.y - margin,
            width: self.width + 2.0 * margin,
            height: self.height + 2.0 * margin,
        }
    }

    /// Overlap with `other`. Touching edges yield a zero-area rectangle.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        if right < left || bottom < top {
            return None;
        }
        Some(Rect::new(left, top, right - left, bottom - top))
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.right() && y >= self.y && y <= self.bottom()
    }
}

/// Tuning for when an element counts as visible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateOptions {
    /// Distance (px) outside the viewport at which visibility triggers
    pub lead_margin: f32,
    /// Minimum fraction of the element that must intersect (0.0-1.0)
    pub visibility_fraction: f32,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            lead_margin: DEFAULT_LEAD_MARGIN,
            visibility_fraction: DEFAULT_VISIBILITY_FRACTION,
        }
    }
}

/// Whether `bounds` qualifies as visible inside `viewport` under `options`.
pub fn is_visible(viewport: &Rect, bounds: &Rect, options: &GateOptions) -> bool {
    let root = viewport.expand(options.lead_margin);

    let element_area = bounds.area();
    if element_area <= 0.0 {
        return root.contains_point(bounds.x, bounds.y);
    }

    let Some(overlap) = root.intersection(bounds) else {
        return false;
    };
    let ratio = overlap.area() / element_area;
    if options.visibility_fraction <= 0.0 {
        true
    } else {
        ratio >= options.visibility_fraction
    }
}

/// Identifier of a registered watch.
pub type WatchId = u64;

struct Watch {
    bounds: Rect,
    options: GateOptions,
    on_visible: Box<dyn FnOnce()>,
}

struct HostInner {
    viewport: Rect,
    next_id: WatchId,
    watches: BTreeMap<WatchId, Watch>,
}

/// Intersection measurement for every lazily gated element on the page.
#[derive(Clone)]
pub struct IntersectionHost {
    inner: Rc<RefCell<HostInner>>,
}

impl IntersectionHost {
    /// Create a host measuring against `viewport`.
    pub fn new(viewport: Rect) -> Self {
        Self {
            inner: Rc::new(RefCell::new(HostInner {
                viewport,
                next_id: 0,
                watches: BTreeMap::new(),
            })),
        }
    }

    pub fn viewport(&self) -> Rect {
        self.inner.borrow().viewport
    }

    /// Number of watches that have neither fired nor been dropped.
    pub fn watch_count(&self) -> usize {
        self.inner.borrow().watches.len()
    }

    /// Whether `id` is still registered.
    pub fn is_watching(&self, id: WatchId) -> bool {
        self.inner.borrow().watches.contains_key(&id)
    }

    /// Register a one-shot watch. Measurement happens on the next
    /// [`evaluate`](Self::evaluate) (or viewport/bounds update).
    #[must_use = "dropping the guard deregisters the watch"]
    pub fn observe<F>(&self, bounds: Rect, options: GateOptions, on_visible: F) -> WatchGuard
    where
        F: FnOnce() + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.watches.insert(
            id,
            Watch {
                bounds,
                options,
                on_visible: Box::new(on_visible),
            },
        );
        log::trace!("Observing watch {} at {:?}", id, bounds);

        WatchGuard {
            id,
            host: Rc::downgrade(&self.inner),
        }
    }

    /// Move the viewport (scroll/resize) and fire any watches now in view.
    pub fn set_viewport(&self, viewport: Rect) -> usize {
        self.inner.borrow_mut().viewport = viewport;
        self.evaluate()
    }

    /// Update the bounds of one watched element and fire any watches now in view.
    /// Returns `false` if the watch is no longer registered.
    pub fn set_bounds(&self, id: WatchId, bounds: Rect) -> bool {
        let known = match self.inner.borrow_mut().watches.get_mut(&id) {
            Some(watch) => {
                watch.bounds = bounds;
                true
            }
            None => false,
        };
        if known {
            self.evaluate();
        }
        known
    }

    /// Measure every watch and fire (then deregister) the visible ones.
    /// Returns the number of callbacks fired.
    pub fn evaluate(&self) -> usize {
        let fired: Vec<(WatchId, Watch)> = {
            let mut inner = self.inner.borrow_mut();
            let viewport = inner.viewport;
            let ids: Vec<WatchId> = inner
                .watches
                .iter()
                .filter(|(_, w)| is_visible(&viewport, &w.bounds, &w.options))
                .map(|(&id, _)| id)
                .collect();
            ids.into_iter()
                .filter_map(|id| inner.watches.remove(&id).map(|w| (id, w)))
                .collect()
        };

        let count = fired.len();
        for (id, watch) in fired {
            log::debug!("Watch {} became visible", id);
            (watch.on_visible)();
        }
        count
    }
}

impl fmt::Debug for IntersectionHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("IntersectionHost")
            .field("viewport", &inner.viewport)
            .field("watches", &inner.watches.len())
            .finish()
    }
}

/// Disposer for one watch. Dropping it deregisters the watch.
pub struct WatchGuard {
    id: WatchId,
    host: Weak<RefCell<HostInner>>,
}

impl WatchGuard {
    pub fn id(&self) -> WatchId {
        self.id
    }

    /// Whether the watch is still registered (not fired, not dropped).
    pub fn is_active(&self) -> bool {
        self.host.upgrade().is_some_and(|inner| {
            let inner = inner.borrow();
            inner.watches.contains_key(&self.id)
        })
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        let Some(inner) = self.host.upgrade() else {
            return;
        };
        let removed = match inner.try_borrow_mut() {
            Ok(mut inner) => inner.watches.remove(&self.id),
            Err(_) => {
                log::warn!("Watch {} dropped while its host was busy", self.id);
                None
            }
        };
        if removed.is_some() {
            log::trace!("Deregistered watch {}", self.id);
        }
        drop(removed);
    }
}

impl fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchGuard").field("id", &self.id).finish()
    }
}

#[derive(Default)]
struct GateShared {
    visible: bool,
    callback: Option<Box<dyn FnOnce()>>,
}

/// One-shot "became visible" signal for one element.
///
/// Priority elements bypass gating: no watch is registered and the gate is
/// visible from creation.
pub struct ViewportGate {
    shared: Rc<RefCell<GateShared>>,
    watch: Option<WatchGuard>,
}

impl ViewportGate {
    /// Attach a gate for an element at `bounds`.
    pub fn attach(
        host: &IntersectionHost,
        bounds: Rect,
        options: GateOptions,
        priority: bool,
    ) -> Self {
        if priority {
            log::debug!("Priority element, skipping viewport gate");
            return Self {
                shared: Rc::new(RefCell::new(GateShared {
                    visible: true,
                    callback: None,
                })),
                watch: None,
            };
        }

        let shared = Rc::new(RefCell::new(GateShared::default()));
        let weak = Rc::downgrade(&shared);
        let watch = host.observe(bounds, options, move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let callback = {
                let mut shared = shared.borrow_mut();
                shared.visible = true;
                shared.callback.take()
            };
            if let Some(callback) = callback {
                callback();
            }
        });

        Self {
            shared,
            watch: Some(watch),
        }
    }

    /// Register the visibility callback. Runs immediately if the gate is
    /// already visible; otherwise replaces any previously registered callback.
    pub fn on_became_visible<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        let visible = self.shared.borrow().visible;
        if visible {
            callback();
        } else {
            self.shared.borrow_mut().callback = Some(Box::new(callback));
        }
    }

    pub fn is_visible(&self) -> bool {
        self.shared.borrow().visible
    }

    /// Whether the gate was skipped for a priority element.
    pub fn is_bypassed(&self) -> bool {
        self.watch.is_none()
    }

    /// ID of the underlying watch, for bounds updates.
    pub fn watch_id(&self) -> Option<WatchId> {
        self.watch.as_ref().map(WatchGuard::id)
    }

    /// Whether the underlying watch is still registered.
    pub fn is_watching(&self) -> bool {
        self.watch.as_ref().is_some_and(WatchGuard::is_active)
    }

    /// Tear the gate down, deregistering its watch.
    pub fn detach(self) {}
}

impl fmt::Debug for ViewportGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewportGate")
            .field("visible", &self.is_visible())
            .field("watch", &self.watch_id())
            .finish()
    }
}

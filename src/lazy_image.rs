//! Lazily loaded image element.
//!
//! A [`LazyImage`] combines a [`ViewportGate`] with the source set for its
//! image. Nothing is requested until the gate reports the element visible
//! (or right away for priority images); after that the host reports the
//! browser-level outcome with [`LazyImage::handle_load`] or
//! [`LazyImage::handle_error`]. [`LazyImage::render`] describes what should
//! be painted in the current state.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::config::{ImageConfig, LoadingMode, PlaceholderMode};
use crate::error::ImageError;
use crate::source_set::{self, SourceDescriptor};
use crate::viewport::{GateOptions, IntersectionHost, Rect, ViewportGate, WatchId};

/// Message shown in place of an image that failed to load.
pub const LOAD_FAILED_MESSAGE: &str = "Failed to load image";

/// Load progress of the underlying image request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadPhase {
    Idle,
    Loading,
    Loaded,
    Errored,
}

/// Raw slot state. Both fields only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSlotState {
    pub visible: bool,
    pub load_phase: LoadPhase,
}

impl ImageSlotState {
    pub fn element_state(&self) -> ElementState {
        match (self.visible, self.load_phase) {
            (_, LoadPhase::Loaded) => ElementState::Loaded,
            (_, LoadPhase::Errored) => ElementState::Errored,
            (true, _) => ElementState::InView,
            (false, _) => ElementState::Idle,
        }
    }
}

/// Visible state of a lazy image element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementState {
    /// Not yet visible, no request issued
    Idle,
    /// Request issued, waiting for the outcome
    InView,
    Loaded,
    Errored,
}

impl ElementState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ElementState::Loaded | ElementState::Errored)
    }
}

/// Stand-in painted behind the image while it is not loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Neutral,
    /// Blurred low-resolution data URL
    Blur(String),
}

/// The concrete image request to hand to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub src: String,
    /// Density descriptor list, absent for local sources and after a failure
    pub srcset: Option<String>,
    pub sizes: String,
    pub loading: LoadingMode,
    pub alt: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// What to paint for the element in its current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPlan {
    pub placeholder: Option<Placeholder>,
    /// Pulsing skeleton overlay
    pub skeleton: bool,
    /// Failure affordance text
    pub error_message: Option<&'static str>,
    /// Image request, present once the element is visible
    pub image: Option<ImageRequest>,
    /// Whether the image is fully faded in
    pub image_opaque: bool,
}

type LoadCallback = Box<dyn FnOnce()>;
type ErrorCallback = Box<dyn FnOnce(&ImageError)>;

struct SlotInner {
    state: ImageSlotState,
    failure: Option<ImageError>,
    on_load: Option<LoadCallback>,
    on_error: Option<ErrorCallback>,
}

impl SlotInner {
    fn mark_visible(&mut self) {
        if self.state.visible {
            return;
        }
        self.state.visible = true;
        if self.state.load_phase == LoadPhase::Idle {
            self.state.load_phase = LoadPhase::Loading;
        }
    }
}

/// A mounted lazy image element.
pub struct LazyImage {
    config: ImageConfig,
    descriptor: SourceDescriptor,
    slot: Rc<RefCell<SlotInner>>,
    gate: ViewportGate,
}

impl LazyImage {
    /// Mount an element at `bounds`. Elements already in view become visible
    /// before this returns.
    pub fn mount(
        config: ImageConfig,
        host: &IntersectionHost,
        bounds: Rect,
        options: GateOptions,
    ) -> Self {
        let descriptor = source_set::build(&config.src, config.quality, &config.width_candidates);
        let slot = Rc::new(RefCell::new(SlotInner {
            state: ImageSlotState {
                visible: false,
                load_phase: LoadPhase::Idle,
            },
            failure: None,
            on_load: None,
            on_error: None,
        }));

        let gate = ViewportGate::attach(host, bounds, options, config.priority);
        let weak = Rc::downgrade(&slot);
        let src = config.src.clone();
        gate.on_became_visible(move || {
            if let Some(slot) = weak.upgrade() {
                log::debug!("Image {} is visible, requesting", src);
                slot.borrow_mut().mark_visible();
            }
        });

        if gate.is_watching() {
            host.evaluate();
        }

        Self {
            config,
            descriptor,
            slot,
            gate,
        }
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn slot_state(&self) -> ImageSlotState {
        self.slot.borrow().state
    }

    pub fn state(&self) -> ElementState {
        self.slot_state().element_state()
    }

    pub fn failure(&self) -> Option<ImageError> {
        self.slot.borrow().failure.clone()
    }

    /// Watch registered for this element, if it is still gated.
    pub fn watch_id(&self) -> Option<WatchId> {
        self.gate.watch_id()
    }

    pub fn is_watching(&self) -> bool {
        self.gate.is_watching()
    }

    /// Callback run once when the image loads. Runs immediately if it
    /// already has.
    pub fn on_load<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        let loaded = self.state() == ElementState::Loaded;
        if loaded {
            callback();
        } else {
            self.slot.borrow_mut().on_load = Some(Box::new(callback));
        }
    }

    /// Callback run once when the image fails. Runs immediately if it
    /// already has.
    pub fn on_error<F>(&self, callback: F)
    where
        F: FnOnce(&ImageError) + 'static,
    {
        let failure = self.failure();
        match failure {
            Some(err) => callback(&err),
            None => self.slot.borrow_mut().on_error = Some(Box::new(callback)),
        }
    }

    /// Report that the image loaded. Ignored unless a request is in flight.
    pub fn handle_load(&self) -> bool {
        let callback = {
            let mut slot = self.slot.borrow_mut();
            if slot.state.load_phase != LoadPhase::Loading {
                log::debug!(
                    "Ignoring load event for {} in {:?}",
                    self.config.src,
                    slot.state.element_state()
                );
                return false;
            }
            slot.state.load_phase = LoadPhase::Loaded;
            slot.on_error = None;
            slot.on_load.take()
        };

        log::debug!("Image {} loaded", self.config.src);
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    /// Report that the image failed. Ignored unless a request is in flight.
    pub fn handle_error(&self, reason: &str) -> bool {
        let (callback, err) = {
            let mut slot = self.slot.borrow_mut();
            if slot.state.load_phase != LoadPhase::Loading {
                log::debug!(
                    "Ignoring error event for {} in {:?}",
                    self.config.src,
                    slot.state.element_state()
                );
                return false;
            }
            let err = ImageError::LoadFailure {
                src: self.config.src.clone(),
                reason: reason.to_string(),
            };
            slot.state.load_phase = LoadPhase::Errored;
            slot.failure = Some(err.clone());
            slot.on_load = None;
            (slot.on_error.take(), err)
        };

        log::warn!("{}", err);
        if let Some(callback) = callback {
            callback(&err);
        }
        true
    }

    /// Describe what to paint right now.
    pub fn render(&self) -> RenderPlan {
        let state = self.slot_state();
        let phase = state.element_state();
        let blur = match (&self.config.placeholder, &self.config.blur_data_url) {
            (PlaceholderMode::Blur, Some(data)) => Some(Placeholder::Blur(data.clone())),
            _ => None,
        };

        let placeholder = match phase {
            ElementState::Idle | ElementState::InView => blur.or(Some(Placeholder::Neutral)),
            ElementState::Errored => blur,
            ElementState::Loaded => None,
        };

        let image = state.visible.then(|| {
            // After a failure fall back to the raw source without variants
            let (src, srcset) = if phase == ElementState::Errored {
                (self.config.src.clone(), None)
            } else {
                (self.descriptor.base_url.clone(), self.descriptor.srcset())
            };
            ImageRequest {
                src,
                srcset,
                sizes: self.config.sizes.clone(),
                loading: self.config.loading,
                alt: self.config.alt.clone(),
                width: self.config.width,
                height: self.config.height,
            }
        });

        RenderPlan {
            placeholder,
            skeleton: !phase.is_terminal(),
            error_message: (phase == ElementState::Errored).then_some(LOAD_FAILED_MESSAGE),
            image,
            image_opaque: phase == ElementState::Loaded,
        }
    }

    /// Unmount the element. Its watch is deregistered and no callback runs
    /// afterwards.
    pub fn unmount(self) {}
}

impl fmt::Debug for LazyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyImage")
            .field("src", &self.config.src)
            .field("state", &self.state())
            .field("gate", &self.gate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn host() -> IntersectionHost {
        IntersectionHost::new(Rect::new(0.0, 0.0, 800.0, 600.0))
    }

    fn below_fold() -> Rect {
        Rect::new(0.0, 1200.0, 400.0, 300.0)
    }

    #[test]
    fn test_offscreen_image_stays_idle() {
        let host = host();
        let image = LazyImage::mount(
            ImageConfig::new("https://cdn.example/a.jpg"),
            &host,
            below_fold(),
            GateOptions::default(),
        );

        assert_eq!(image.state(), ElementState::Idle);
        assert!(image.is_watching());

        let plan = image.render();
        assert_eq!(plan.placeholder, Some(Placeholder::Neutral));
        assert!(plan.skeleton);
        assert!(plan.image.is_none());
        assert!(!plan.image_opaque);
    }

    #[test]
    fn test_scrolling_into_view_issues_request() {
        let host = host();
        let image = LazyImage::mount(
            ImageConfig::new("https://cdn.example/a.jpg?foo=bar").with_sizes("50vw"),
            &host,
            below_fold(),
            GateOptions::default(),
        );

        host.set_viewport(Rect::new(0.0, 1000.0, 800.0, 600.0));
        assert_eq!(image.state(), ElementState::InView);
        assert!(!image.is_watching());
        assert_eq!(host.watch_count(), 0);

        let request = image.render().image.unwrap();
        assert_eq!(request.src, "https://cdn.example/a.jpg?foo=bar");
        assert_eq!(request.sizes, "50vw");
        assert_eq!(
            request.srcset.as_deref(),
            Some(
                "https://cdn.example/a.jpg?foo=bar&w=400&q=90 1x, \
                 https://cdn.example/a.jpg?foo=bar&w=800&q=90 2x, \
                 https://cdn.example/a.jpg?foo=bar&w=1200&q=90 3x"
            )
        );
    }

    #[test]
    fn test_visible_on_mount() {
        let host = host();
        let image = LazyImage::mount(
            ImageConfig::new("/a.png"),
            &host,
            Rect::new(0.0, 0.0, 100.0, 100.0),
            GateOptions::default(),
        );
        assert_eq!(image.state(), ElementState::InView);
        assert_eq!(host.watch_count(), 0);
    }

    #[test]
    fn test_priority_local_image_skips_gate() {
        let host = host();
        let image = LazyImage::mount(
            ImageConfig::new("/local/hero.jpeg").with_priority(true),
            &host,
            below_fold(),
            GateOptions::default(),
        );

        assert_eq!(image.state(), ElementState::InView);
        assert!(image.watch_id().is_none());
        assert_eq!(host.watch_count(), 0);
        assert!(image.descriptor().variants.is_empty());

        let request = image.render().image.unwrap();
        assert_eq!(request.src, "/local/hero.jpeg");
        assert_eq!(request.srcset, None);
    }

    #[test]
    fn test_load_fades_in_and_notifies_once() {
        let host = host();
        let image = LazyImage::mount(
            ImageConfig::new("/a.png").with_blur_placeholder("data:image/png;base64,AAAA"),
            &host,
            Rect::new(0.0, 0.0, 100.0, 100.0),
            GateOptions::default(),
        );
        let loads = Rc::new(Cell::new(0));
        let l = Rc::clone(&loads);
        image.on_load(move || l.set(l.get() + 1));

        assert_eq!(
            image.render().placeholder,
            Some(Placeholder::Blur("data:image/png;base64,AAAA".to_string()))
        );

        assert!(image.handle_load());
        assert!(!image.handle_load());
        assert!(!image.handle_error("late"));
        assert_eq!(loads.get(), 1);
        assert_eq!(image.state(), ElementState::Loaded);

        let plan = image.render();
        assert!(plan.image_opaque);
        assert!(!plan.skeleton);
        assert_eq!(plan.placeholder, None);
    }

    #[test]
    fn test_error_shows_affordance_and_raw_source() {
        let host = host();
        let image = LazyImage::mount(
            ImageConfig::new("https://cdn.example/a.jpg"),
            &host,
            Rect::new(0.0, 0.0, 100.0, 100.0),
            GateOptions::default(),
        );
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        image.on_error(move |err| *s.borrow_mut() = Some(err.clone()));

        assert!(image.handle_error("404"));
        assert_eq!(image.state(), ElementState::Errored);
        assert_eq!(seen.borrow().as_ref().map(|e| e.reason().to_string()), Some("404".to_string()));

        let plan = image.render();
        assert_eq!(plan.error_message, Some(LOAD_FAILED_MESSAGE));
        assert!(!plan.skeleton);
        let request = plan.image.unwrap();
        assert_eq!(request.src, "https://cdn.example/a.jpg");
        assert_eq!(request.srcset, None);

        // Terminal: a late load does not resurrect the element
        assert!(!image.handle_load());
        assert_eq!(image.state(), ElementState::Errored);
    }

    #[test]
    fn test_events_before_visibility_are_ignored() {
        let host = host();
        let image = LazyImage::mount(
            ImageConfig::new("/a.png"),
            &host,
            below_fold(),
            GateOptions::default(),
        );
        assert!(!image.handle_load());
        assert!(!image.handle_error("x"));
        assert_eq!(image.state(), ElementState::Idle);
    }

    #[test]
    fn test_unmount_deregisters_watch() {
        let host = host();
        let image = LazyImage::mount(
            ImageConfig::new("/a.png"),
            &host,
            below_fold(),
            GateOptions::default(),
        );
        assert_eq!(host.watch_count(), 1);
        image.unmount();
        assert_eq!(host.watch_count(), 0);
        assert_eq!(host.set_viewport(Rect::new(0.0, 1000.0, 800.0, 600.0)), 0);
    }

    #[test]
    fn test_late_callback_registration_runs_immediately() {
        let host = host();
        let image = LazyImage::mount(
            ImageConfig::new("/a.png").with_priority(true),
            &host,
            Rect::new(0.0, 0.0, 10.0, 10.0),
            GateOptions::default(),
        );
        image.handle_load();

        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        image.on_load(move || r.set(true));
        assert!(ran.get());
    }
}

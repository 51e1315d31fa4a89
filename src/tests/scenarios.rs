//! End-to-end flows across gate, registry, poller and gallery.

use std::rc::Rc;

use web_time::Instant;

use super::support::{ScriptedLoader, init_logging, ms};
use crate::config::{ImageConfig, LoaderConfig};
use crate::gallery::{Gallery, GalleryItem, PopupView};
use crate::lazy_image::{ElementState, LazyImage};
use crate::poller::{PollOptions, ProceedReason, ReadinessPoller};
use crate::preload::{PreloadOptions, PreloadPhase, PreloadRegistry};
use crate::timer::TimerQueue;
use crate::viewport::{GateOptions, IntersectionHost, Rect};

struct Page {
    t0: Instant,
    timers: TimerQueue,
    loader: ScriptedLoader,
    registry: Rc<PreloadRegistry>,
    host: IntersectionHost,
}

impl Page {
    fn new() -> Self {
        init_logging();
        let t0 = Instant::now();
        let timers = TimerQueue::new(t0);
        let loader = ScriptedLoader::default();
        let registry = Rc::new(PreloadRegistry::new(loader.clone(), timers.clone()));
        Self {
            t0,
            timers,
            loader,
            registry,
            host: IntersectionHost::new(Rect::new(0.0, 0.0, 1280.0, 720.0)),
        }
    }

    /// One host tick: drain loader events, then run due timers.
    fn tick(&self, at_ms: u64) {
        self.registry.pump();
        self.timers.advance_to(self.t0 + ms(at_ms));
    }
}

#[test]
fn test_priority_hero_renders_without_gate() {
    let page = Page::new();
    let hero = LazyImage::mount(
        ImageConfig::new("/local/hero.jpeg").with_priority(true),
        &page.host,
        Rect::new(0.0, 2000.0, 1280.0, 600.0),
        GateOptions::default(),
    );

    assert_eq!(hero.state(), ElementState::InView);
    assert_eq!(page.host.watch_count(), 0);
    assert!(hero.descriptor().variants.is_empty());
    let request = hero.render().image.unwrap();
    assert_eq!(request.src, "/local/hero.jpeg");
    assert!(request.srcset.is_none());
}

#[test]
fn test_remote_thumbnail_scrolls_in_and_loads() {
    let page = Page::new();
    let thumb = LazyImage::mount(
        ImageConfig::new("https://cdn.example/x.jpg?foo=bar").with_quality(80),
        &page.host,
        Rect::new(0.0, 1500.0, 300.0, 200.0),
        GateOptions::default(),
    );
    assert_eq!(thumb.state(), ElementState::Idle);
    assert_eq!(
        thumb.descriptor().variants[0].url,
        "https://cdn.example/x.jpg?foo=bar&w=400&q=80"
    );

    // Within the lead margin counts as visible
    page.host.set_viewport(Rect::new(0.0, 800.0, 1280.0, 720.0));
    assert_eq!(thumb.state(), ElementState::InView);
    let srcset = thumb.render().image.and_then(|r| r.srcset).unwrap();
    assert!(srcset.starts_with("https://cdn.example/x.jpg?foo=bar&w=400&q=80 1x"));

    thumb.handle_load();
    assert_eq!(thumb.state(), ElementState::Loaded);
    assert!(thumb.render().image_opaque);
}

#[test]
fn test_popup_ready_mid_wait_resolves_on_next_poll() {
    let page = Page::new();
    let poller = ReadinessPoller::new(Rc::clone(&page.registry), PollOptions::default());
    page.registry.get("/gallery/a.png", &PreloadOptions::default());

    let session = poller.wait_for("/gallery/a.png");
    page.tick(100);
    // The deferred start fired at 100ms
    assert_eq!(page.loader.begun().len(), 1);

    page.tick(110);
    page.loader.complete("/gallery/a.png");
    page.tick(120);
    assert!(!session.is_resolved());

    page.tick(150);
    let proceed = session.outcome().unwrap();
    assert_eq!(proceed.reason, ProceedReason::Ready);
    assert!(proceed.waited >= ms(120) && proceed.waited <= ms(170));
    assert!(!session.has_pending_timers());

    page.tick(1000);
    assert_eq!(session.outcome().unwrap().resolved_at, page.t0 + ms(150));
}

#[test]
fn test_stalled_popup_shows_spinner_until_timeout() {
    let page = Page::new();
    let mut gallery = Gallery::new(Rc::clone(&page.registry), PollOptions::default());
    gallery.register(GalleryItem::new(3, "CSR", "/services/csr.png"));
    gallery.activate(3);

    for at in (0..500).step_by(10) {
        page.tick(at);
        assert_eq!(gallery.popup_view(), Some(PopupView::Spinner), "at {}ms", at);
    }

    page.tick(500);
    match gallery.popup_view() {
        Some(PopupView::Content {
            entry_phase,
            proceed,
            ..
        }) => {
            assert_eq!(entry_phase, PreloadPhase::Fetching);
            assert_eq!(proceed.reason, ProceedReason::TimedOut);
            assert_eq!(proceed.resolved_at, page.t0 + ms(500));
        }
        other => panic!("expected content, got {:?}", other),
    }

    // The preload keeps going after the popup proceeded
    page.loader.complete("/services/csr.png");
    page.tick(600);
    assert_eq!(
        page.registry.lookup("/services/csr.png").map(|e| e.phase()),
        Some(PreloadPhase::Ready)
    );
}

#[test]
fn test_progress_is_monotonic_and_terminal_is_final() {
    let page = Page::new();
    let entry = page.registry.get("/a.png", &PreloadOptions::priority());
    let mut last = entry.progress();

    let reports = [
        (10, Some(100)),
        (40, Some(100)),
        (40, None),
        (20, Some(100)),
        (90, Some(100)),
    ];
    for (loaded, total) in reports {
        page.loader.progress("/a.png", loaded, total);
        page.tick(0);
        assert!(entry.progress() >= last);
        last = entry.progress();
    }
    assert_eq!(last, 90.0);

    page.loader.complete("/a.png");
    page.loader.fail("/a.png", "late");
    page.tick(10);
    assert_eq!(entry.phase(), PreloadPhase::Ready);
    assert_eq!(entry.progress(), 100.0);
    assert!(entry.failure().is_none());
}

#[test]
fn test_every_activation_is_bounded() {
    let page = Page::new();
    let poller = ReadinessPoller::new(Rc::clone(&page.registry), PollOptions::default());
    page.registry.get("/slow.png", &PreloadOptions::default());
    page.registry.get("/fails.png", &PreloadOptions::priority());

    let sessions = [
        poller.wait_for("/slow.png"),
        poller.wait_for("/fails.png"),
        poller.wait_for("/never-registered.png"),
    ];

    page.loader.fail("/fails.png", "404");
    for at in (0..=500).step_by(25) {
        page.tick(at);
    }

    for session in &sessions {
        let proceed = session.outcome().unwrap();
        assert!(proceed.waited <= ms(500), "{:?}", proceed);
    }
    assert_eq!(
        sessions[1].outcome().map(|p| p.reason),
        Some(ProceedReason::Failed)
    );
}

#[test]
fn test_configured_timings_flow_through() {
    let mut config = LoaderConfig::default();
    config.poll.timeout_ms = 200;
    config.preload.delay_ms = 30;
    init_logging();

    let t0 = Instant::now();
    let timers = TimerQueue::new(t0);
    let loader = ScriptedLoader::default();
    let registry = Rc::new(PreloadRegistry::with_settings(
        loader.clone(),
        timers.clone(),
        config.registry_settings().unwrap(),
    ));
    let poller = ReadinessPoller::new(Rc::clone(&registry), config.poll_options());

    registry.get("/a.png", &PreloadOptions::default());
    timers.advance_to(t0 + ms(29));
    assert!(loader.begun().is_empty());
    timers.advance_to(t0 + ms(30));
    assert_eq!(loader.begun().len(), 1);

    let session = poller.wait_for("/a.png");
    timers.advance_to(t0 + ms(230));
    assert_eq!(
        session.outcome().map(|p| p.reason),
        Some(ProceedReason::TimedOut)
    );
}

//! Gallery of items whose images open in a popup.
//!
//! Every registered item is preloaded eagerly. Activating an item opens the
//! popup immediately; it shows a spinner until the readiness poll proceeds
//! (image ready, preload failed, or the bounded wait ran out) and then the
//! item content.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::config::{ImageConfig, LoadingMode};
use crate::constants::POPUP_QUALITY;
use crate::poller::{ActivationSession, PollOptions, Proceed, ReadinessPoller};
use crate::preload::{PreloadEntry, PreloadOptions, PreloadPhase, PreloadRegistry, PreloadStatus};

/// Responsive sizes hint for popup images.
pub const POPUP_SIZES: &str =
    "(max-width: 640px) 80px, (max-width: 768px) 88px, (max-width: 1024px) 96px, 112px";

/// Rendered box size of a popup image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PopupImageSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl PopupImageSize {
    /// Edge length (px) on the largest screens.
    pub fn max_edge(self) -> u32 {
        match self {
            PopupImageSize::Small => 80,
            PopupImageSize::Medium => 112,
            PopupImageSize::Large => 144,
        }
    }
}

/// Image configuration for a popup image of `size`.
pub fn popup_image_config(src: &str, size: PopupImageSize, priority: bool) -> ImageConfig {
    let edge = size.max_edge();
    ImageConfig::new(src)
        .with_quality(POPUP_QUALITY)
        .with_priority(priority)
        .with_loading(if priority {
            LoadingMode::Eager
        } else {
            LoadingMode::Lazy
        })
        .with_sizes(POPUP_SIZES)
        .with_dimensions(edge, edge)
}

/// One gallery entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryItem {
    pub id: u32,
    pub title: String,
    /// Resource id of the popup image
    pub image: String,
}

impl GalleryItem {
    pub fn new(id: u32, title: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            image: image.into(),
        }
    }

    pub fn popup_config(&self, size: PopupImageSize) -> ImageConfig {
        popup_image_config(&self.image, size, true).with_alt(self.title.clone())
    }
}

/// What the popup container shows.
#[derive(Debug, Clone, PartialEq)]
pub enum PopupView {
    Spinner,
    Content {
        item: GalleryItem,
        /// Phase of the item's preload right now
        entry_phase: PreloadPhase,
        proceed: Proceed,
    },
}

struct ActivePopup {
    item_id: u32,
    session: ActivationSession,
}

/// Items plus the popup activation state.
pub struct Gallery {
    poller: ReadinessPoller,
    items: Vec<GalleryItem>,
    preloads: HashMap<u32, Rc<PreloadEntry>>,
    active: Option<ActivePopup>,
}

impl Gallery {
    pub fn new(registry: Rc<PreloadRegistry>, poll_options: PollOptions) -> Self {
        Self {
            poller: ReadinessPoller::new(registry, poll_options),
            items: Vec::new(),
            preloads: HashMap::new(),
            active: None,
        }
    }

    /// Add an item and start preloading its image. Re-registering an id
    /// replaces the item.
    pub fn register(&mut self, item: GalleryItem) {
        let options = PreloadOptions::priority().with_quality(POPUP_QUALITY);
        let entry = self.poller.registry().get(&item.image, &options);
        self.preloads.insert(item.id, entry);

        match self.items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    pub fn items(&self) -> &[GalleryItem] {
        &self.items
    }

    pub fn item(&self, id: u32) -> Option<&GalleryItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn preload_status(&self, id: u32) -> Option<PreloadStatus> {
        self.preloads.get(&id).map(|entry| entry.status())
    }

    /// Open the popup for `id`. Replaces any open popup. Returns `false` for
    /// unknown ids.
    pub fn activate(&mut self, id: u32) -> bool {
        let Some(item) = self.item(id) else {
            log::warn!("Activation of unknown gallery item {}", id);
            return false;
        };

        let session = self.poller.wait_for(&item.image);
        log::debug!("Opened popup for item {} ({})", id, item.image);

        // The previous session is dropped here, cancelling its timers
        self.active = Some(ActivePopup {
            item_id: id,
            session,
        });
        true
    }

    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            log::debug!("Closed popup for item {}", active.item_id);
        }
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_item(&self) -> Option<&GalleryItem> {
        self.active.as_ref().and_then(|active| self.item(active.item_id))
    }

    /// The open session, if any.
    pub fn session(&self) -> Option<&ActivationSession> {
        self.active.as_ref().map(|active| &active.session)
    }

    /// Current popup contents; `None` while closed.
    pub fn popup_view(&self) -> Option<PopupView> {
        let active = self.active.as_ref()?;
        let Some(proceed) = active.session.outcome() else {
            return Some(PopupView::Spinner);
        };

        let item = self.item(active.item_id)?.clone();
        let entry_phase = self
            .preloads
            .get(&active.item_id)
            .map_or(PreloadPhase::NotStarted, |entry| entry.phase());
        Some(PopupView::Content {
            item,
            entry_phase,
            proceed,
        })
    }
}

impl fmt::Debug for Gallery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gallery")
            .field("items", &self.items.len())
            .field("active", &self.active.as_ref().map(|a| a.item_id))
            .finish()
    }
}

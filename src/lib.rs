//! Gallery Loader - viewport-gated lazy images with preload tracking
//!
//! Images are only requested once they come near the viewport, popup images
//! are fetched ahead of time, and opening a popup waits a bounded time for
//! its image before showing content.
//!
//! Everything runs on one thread. The host drives the crate by calling
//! [`PreloadRegistry::pump`] and [`TimerQueue::advance_to`] once per tick and
//! by moving the viewport on its [`IntersectionHost`].

pub mod config;
pub mod constants;
pub mod error;
pub mod gallery;
pub mod lazy_image;
pub mod poller;
pub mod preload;
pub mod source_set;
pub mod timer;
pub mod viewport;

#[cfg(test)]
mod tests;

pub use config::{ConfigError, ImageConfig, LoaderConfig, LoadingMode, LogLevel, PlaceholderMode};
pub use error::ImageError;
pub use gallery::{Gallery, GalleryItem, PopupImageSize, PopupView, popup_image_config};
pub use lazy_image::{ElementState, LazyImage, RenderPlan};
pub use poller::{ActivationSession, PollOptions, Proceed, ProceedReason, ReadinessPoller};
pub use preload::{
    LoadEvent, PreloadEntry, PreloadOptions, PreloadPhase, PreloadRegistry, PreloadStatus,
    ResourceLoader,
};
pub use source_set::SourceDescriptor;
pub use timer::{TimerGuard, TimerQueue};
pub use viewport::{GateOptions, IntersectionHost, Rect, ViewportGate};

//! Proactive off-screen fetching.

mod registry;
mod types;

#[cfg(not(target_arch = "wasm32"))]
mod native_loader;

pub use registry::{PreloadRegistry, RegistrySettings, fetch_url};
pub use types::{
    LoadEvent, PreloadEntry, PreloadOptions, PreloadPhase, PreloadStatus, RequestId,
    ResourceLoader,
};

#[cfg(not(target_arch = "wasm32"))]
pub use native_loader::{NativeFileLoader, resolve_local_path};

//! Error types for image loading.

/// Failure of a single image resource.
///
/// Both kinds are terminal for the resource they describe and never retried.
/// Network errors, missing files and decode failures are folded together
/// since the loading layer cannot tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    /// A rendered image element failed to load its source.
    #[error("Failed to load image {src}: {reason}")]
    LoadFailure { src: String, reason: String },

    /// A proactive (off-screen) fetch failed.
    #[error("Failed to preload {resource_id}: {reason}")]
    PreloadFailure { resource_id: String, reason: String },
}

impl ImageError {
    /// The resource the failure belongs to.
    pub fn resource(&self) -> &str {
        match self {
            ImageError::LoadFailure { src, .. } => src,
            ImageError::PreloadFailure { resource_id, .. } => resource_id,
        }
    }

    /// Human-readable reason reported by the transport.
    pub fn reason(&self) -> &str {
        match self {
            ImageError::LoadFailure { reason, .. } | ImageError::PreloadFailure { reason, .. } => {
                reason
            }
        }
    }
}

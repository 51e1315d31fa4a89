//! Global constants for the image loading core

use std::time::Duration;

/// Default image quality when none is configured (1-100)
pub const DEFAULT_QUALITY: u8 = 90;

/// Quality used for gallery/popup images
pub const POPUP_QUALITY: u8 = 95;

/// Default responsive sizes hint
pub const DEFAULT_SIZES: &str = "100vw";

/// Requested widths for the 1x, 2x and 3x density variants
pub const DEFAULT_DENSITY_WIDTHS: [u32; 3] = [400, 800, 1200];

/// Prefixes that mark a bundled/local image source
pub const LOCAL_SOURCE_PREFIXES: &[&str] = &["/", "./", "@/"];

/// Distance outside the viewport (px) at which a lazy image counts as visible
pub const DEFAULT_LEAD_MARGIN: f32 = 50.0;

/// Minimum visible fraction of an element before it counts as visible
pub const DEFAULT_VISIBILITY_FRACTION: f32 = 0.1;

/// Delay before a non-priority preload starts
pub const PRELOAD_DELAY: Duration = Duration::from_millis(100);

/// Cadence of the readiness poll loop
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shortest accepted poll interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Upper bound on how long a popup waits for its image
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Read size used by the native file loader when reporting progress
pub const NATIVE_READ_CHUNK: usize = 64 * 1024;

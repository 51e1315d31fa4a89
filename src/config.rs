//! Configuration for the image loading core.
//!
//! [`LoaderConfig`] holds the page-wide tuning (gate margins, preload delay,
//! poll cadence, defaults for new images) and can be exported/imported as
//! JSON. [`ImageConfig`] is the per-image configuration surface.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::{
    DEFAULT_DENSITY_WIDTHS, DEFAULT_LEAD_MARGIN, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT,
    DEFAULT_QUALITY, DEFAULT_SIZES, DEFAULT_VISIBILITY_FRACTION, MIN_POLL_INTERVAL, PRELOAD_DELAY,
};
use crate::poller::PollOptions;
use crate::preload::RegistrySettings;
use crate::source_set::clamp_quality;
use crate::viewport::GateOptions;

/// Log level setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Show only errors
    Error,
    /// Show errors and warnings
    Warn,
    /// Show errors, warnings, and info messages
    #[default]
    Info,
    /// Show debug-level logging
    Debug,
    /// Show all log messages including trace
    Trace,
}

impl LogLevel {
    /// Convert to log crate's LevelFilter.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Whether the browser-level request may be deferred by the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadingMode {
    #[default]
    Lazy,
    Eager,
}

/// What to paint before the image has loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderMode {
    /// Blurred low-resolution stand-in (needs `blur_data_url`)
    Blur,
    /// Neutral background only
    #[default]
    Empty,
}

/// Per-image configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Resource identifier
    pub src: String,
    #[serde(default)]
    pub alt: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// 1-100
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default)]
    pub loading: LoadingMode,
    /// Responsive sizes hint, passed through untouched
    #[serde(default = "default_sizes")]
    pub sizes: String,
    /// Skip viewport gating and load right away
    #[serde(default)]
    pub priority: bool,
    #[serde(default)]
    pub placeholder: PlaceholderMode,
    /// Low-resolution stand-in for the blur placeholder
    #[serde(default)]
    pub blur_data_url: Option<String>,
    /// Widths requested for densities 1x, 2x, ...
    #[serde(default = "default_density_widths")]
    pub width_candidates: Vec<u32>,
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

fn default_sizes() -> String {
    DEFAULT_SIZES.to_string()
}

fn default_density_widths() -> Vec<u32> {
    DEFAULT_DENSITY_WIDTHS.to_vec()
}

impl ImageConfig {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            alt: String::new(),
            width: None,
            height: None,
            quality: DEFAULT_QUALITY,
            loading: LoadingMode::default(),
            sizes: default_sizes(),
            priority: false,
            placeholder: PlaceholderMode::default(),
            blur_data_url: None,
            width_candidates: default_density_widths(),
        }
    }

    pub fn with_alt(mut self, alt: impl Into<String>) -> Self {
        self.alt = alt.into();
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Set the quality, clamped into 1-100.
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = clamp_quality(quality);
        self
    }

    pub fn with_loading(mut self, loading: LoadingMode) -> Self {
        self.loading = loading;
        self
    }

    pub fn with_sizes(mut self, sizes: impl Into<String>) -> Self {
        self.sizes = sizes.into();
        self
    }

    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    /// Use a blurred stand-in until the image loads.
    pub fn with_blur_placeholder(mut self, data_url: impl Into<String>) -> Self {
        self.placeholder = PlaceholderMode::Blur;
        self.blur_data_url = Some(data_url.into());
        self
    }

    pub fn with_width_candidates(mut self, widths: Vec<u32>) -> Self {
        self.width_candidates = widths;
        self
    }
}

/// Current configuration file format version.
/// Increment this when making breaking changes to the config format.
pub const CONFIG_VERSION: u32 = 1;

/// Viewport gate section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_lead_margin")]
    pub lead_margin: f32,
    #[serde(default = "default_visibility_fraction")]
    pub visibility_fraction: f32,
}

fn default_lead_margin() -> f32 {
    DEFAULT_LEAD_MARGIN
}

fn default_visibility_fraction() -> f32 {
    DEFAULT_VISIBILITY_FRACTION
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            lead_margin: default_lead_margin(),
            visibility_fraction: default_visibility_fraction(),
        }
    }
}

/// Preload section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreloadConfig {
    /// Delay before non-priority preloads start
    #[serde(default = "default_preload_delay_ms")]
    pub delay_ms: u64,
    /// Base URL for resolving relative ids when annotating fetch URLs
    #[serde(default)]
    pub origin: Option<String>,
}

fn default_preload_delay_ms() -> u64 {
    PRELOAD_DELAY.as_millis() as u64
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_preload_delay_ms(),
            origin: None,
        }
    }
}

/// Readiness poll section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_poll_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_poll_timeout_ms() -> u64 {
    DEFAULT_POLL_TIMEOUT.as_millis() as u64
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            timeout_ms: default_poll_timeout_ms(),
        }
    }
}

/// Defaults applied to newly created images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefaults {
    #[serde(default = "default_quality")]
    pub default_quality: u8,
    #[serde(default = "default_sizes")]
    pub default_sizes: String,
    #[serde(default = "default_density_widths")]
    pub density_widths: Vec<u32>,
}

impl Default for ImageDefaults {
    fn default() -> Self {
        Self {
            default_quality: default_quality(),
            default_sizes: default_sizes(),
            density_widths: default_density_widths(),
        }
    }
}

/// Page-wide configuration that can be exported and imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Version of the configuration file format
    pub version: u32,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub preload: PreloadConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub image: ImageDefaults,
    /// Log verbosity level
    #[serde(default)]
    pub log_level: LogLevel,
}

impl LoaderConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            gate: GateConfig::default(),
            preload: PreloadConfig::default(),
            poll: PollConfig::default(),
            image: ImageDefaults::default(),
            log_level: LogLevel::default(),
        }
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        // Validate version compatibility
        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }

        // Validate the origin early so registry construction cannot fail
        if let Some(origin) = &config.preload.origin {
            Url::parse(origin).map_err(|e| ConfigError::InvalidOrigin {
                origin: origin.clone(),
                source: e,
            })?;
        }

        Ok(config)
    }

    /// Gate options for lazy images.
    pub fn gate_options(&self) -> GateOptions {
        GateOptions {
            lead_margin: self.gate.lead_margin,
            visibility_fraction: self.gate.visibility_fraction.clamp(0.0, 1.0),
        }
    }

    /// Poll options for popup activations.
    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            poll_interval: Duration::from_millis(self.poll.interval_ms).max(MIN_POLL_INTERVAL),
            timeout: Duration::from_millis(self.poll.timeout_ms),
        }
    }

    /// Settings for the preload registry.
    pub fn registry_settings(&self) -> Result<RegistrySettings, ConfigError> {
        let origin = match &self.preload.origin {
            Some(origin) => Some(Url::parse(origin).map_err(|e| ConfigError::InvalidOrigin {
                origin: origin.clone(),
                source: e,
            })?),
            None => None,
        };
        Ok(RegistrySettings {
            preload_delay: Duration::from_millis(self.preload.delay_ms),
            origin,
        })
    }

    /// A per-image configuration for `src` carrying the configured defaults.
    pub fn image_config(&self, src: impl Into<String>) -> ImageConfig {
        ImageConfig::new(src)
            .with_quality(self.image.default_quality)
            .with_sizes(self.image.default_sizes.clone())
            .with_width_candidates(self.image.density_widths.clone())
    }

    /// Get the default filename for config export.
    pub fn default_filename() -> &'static str {
        "gallery-loader.json"
    }

    /// Get the default config file path.
    /// Returns None on WASM (no filesystem access).
    #[cfg(not(target_arch = "wasm32"))]
    pub fn default_path() -> Option<std::path::PathBuf> {
        // Try to use XDG config directory, fall back to home directory
        if let Some(config_dir) = dirs::config_dir() {
            Some(config_dir.join("gallery-loader").join(Self::default_filename()))
        } else {
            dirs::home_dir().map(|home_dir| {
                home_dir
                    .join(".config")
                    .join("gallery-loader")
                    .join(Self::default_filename())
            })
        }
    }

    /// Load configuration from `path`.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to `path`, creating parent directories.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = self.to_json()?;
        std::fs::write(path, json)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration version is newer than supported
    #[error(
        "Configuration file version {file_version} is newer than supported version {supported_version}"
    )]
    VersionTooNew {
        file_version: u32,
        supported_version: u32,
    },

    /// Preload origin is not an absolute URL
    #[error("Invalid preload origin {origin:?}: {source}")]
    InvalidOrigin {
        origin: String,
        #[source]
        source: url::ParseError,
    },

    /// I/O error when reading/writing config
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

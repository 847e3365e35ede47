//! Editor configuration
//!
//! Settings the document model reads once at startup: render cache size,
//! render and OCR resolution, worker count and split behaviour. Loaded from
//! a JSON file, environment variables, or built programmatically, then
//! shared as `Arc<EditorConfig>` for the rest of the session.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const ENV_CACHE_PAGES: &str = "FOLIO_CACHE_PAGES";
pub const ENV_RENDER_DPI: &str = "FOLIO_RENDER_DPI";
pub const ENV_OCR_LANGUAGE: &str = "FOLIO_OCR_LANGUAGE";
pub const ENV_OCR_DPI: &str = "FOLIO_OCR_DPI";
pub const ENV_RENDER_WORKERS: &str = "FOLIO_RENDER_WORKERS";
pub const ENV_MAX_RENDER_PIXELS: &str = "FOLIO_MAX_RENDER_PIXELS";

/// Which split outputs receive a bookmark whose target page appears in
/// more than one requested range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TocSplitPolicy {
    /// Every output containing the target page gets the entry.
    #[default]
    EveryRange,
    /// Only the first output containing the target page gets the entry.
    FirstRangeOnly,
}

/// Page size in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl Default for PageSize {
    fn default() -> Self {
        Self { width: folio_engine::DEFAULT_PAGE_WIDTH, height: folio_engine::DEFAULT_PAGE_HEIGHT }
    }
}

/// Session configuration for the document model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Render cache capacity in entries (page, zoom, rotation)
    pub render_cache_capacity: usize,
    /// Resolution used for on-screen renders
    pub render_dpi: u32,
    /// Largest raster, in pixels, a single render may allocate
    pub max_render_pixels: u64,
    /// OCR language code handed to the OCR engine
    pub ocr_language: String,
    /// Resolution pages are rendered at before recognition
    pub ocr_dpi: u32,
    /// Background render threads; 0 renders on the calling thread
    pub render_workers: usize,
    /// Size of pages created without explicit dimensions
    pub default_page_size: PageSize,
    pub split_toc_policy: TocSplitPolicy,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            render_cache_capacity: 64,
            render_dpi: 150,
            max_render_pixels: 1 << 26,
            ocr_language: "eng".to_string(),
            ocr_dpi: 300,
            render_workers: folio_scheduler::default_worker_count(),
            default_page_size: PageSize::default(),
            split_toc_policy: TocSplitPolicy::default(),
        }
    }
}

impl EditorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_render_cache_capacity(mut self, capacity: usize) -> Self {
        self.render_cache_capacity = capacity;
        self
    }

    pub fn with_render_dpi(mut self, dpi: u32) -> Self {
        self.render_dpi = dpi;
        self
    }

    pub fn with_max_render_pixels(mut self, pixels: u64) -> Self {
        self.max_render_pixels = pixels;
        self
    }

    pub fn with_render_workers(mut self, workers: usize) -> Self {
        self.render_workers = workers;
        self
    }

    pub fn with_ocr_language(mut self, language: impl Into<String>) -> Self {
        self.ocr_language = language.into();
        self
    }

    pub fn with_split_toc_policy(mut self, policy: TocSplitPolicy) -> Self {
        self.split_toc_policy = policy;
        self
    }

    /// Zoom factor for renders fed to OCR.
    pub fn ocr_zoom(&self) -> f32 {
        self.ocr_dpi as f32 / 72.0
    }

    /// Zoom factor for on-screen renders.
    pub fn render_zoom(&self) -> f32 {
        self.render_dpi as f32 / 72.0
    }

    /// Per-user location of the config file.
    ///
    /// Falls back to the working directory if the platform config dir is
    /// unknown.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("folio"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.json")
    }

    /// Defaults overridden by any `FOLIO_*` environment variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = env_parse(ENV_CACHE_PAGES)? {
            config.render_cache_capacity = value;
        }
        if let Some(value) = env_parse(ENV_RENDER_DPI)? {
            config.render_dpi = value;
        }
        if let Ok(language) = std::env::var(ENV_OCR_LANGUAGE) {
            if language.trim().is_empty() {
                return Err(ConfigError::InvalidValue(ENV_OCR_LANGUAGE.to_string()));
            }
            config.ocr_language = language;
        }
        if let Some(value) = env_parse(ENV_MAX_RENDER_PIXELS)? {
            config.max_render_pixels = value;
        }
        if let Some(value) = env_parse(ENV_OCR_DPI)? {
            config.ocr_dpi = value;
        }
        if let Some(value) = env_parse(ENV_RENDER_WORKERS)? {
            config.render_workers = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file. Missing keys take their default values.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the document model cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render_cache_capacity == 0 {
            return Err(ConfigError::InvalidValue("render_cache_capacity".to_string()));
        }
        if self.render_dpi == 0 {
            return Err(ConfigError::InvalidValue("render_dpi".to_string()));
        }
        if self.max_render_pixels == 0 {
            return Err(ConfigError::InvalidValue("max_render_pixels".to_string()));
        }
        if self.ocr_dpi == 0 {
            return Err(ConfigError::InvalidValue("ocr_dpi".to_string()));
        }
        let PageSize { width, height } = self.default_page_size;
        if !(width > 0.0 && height > 0.0) {
            return Err(ConfigError::InvalidValue("default_page_size".to_string()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(None),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

//! Configuration types for a sanitization run.
//!
//! All run behaviour is controlled through [`RedactionConfig`], built via its
//! [`RedactionConfigBuilder`]. Keeping every knob in one struct makes it easy
//! to share a config across concurrent runs and to log exactly what a run was
//! asked to do.

use crate::error::RedactError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Lowest accepted rendering resolution.
pub const MIN_DPI: u32 = 72;
/// Highest accepted rendering resolution.
pub const MAX_DPI: u32 = 600;

/// Configuration for a sanitization run.
///
/// Built via [`RedactionConfig::builder()`] or using
/// [`RedactionConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf_redact::{RasterBackend, RedactionConfig};
///
/// let config = RedactionConfig::builder()
///     .dpi(200)
///     .rasterizer(RasterBackend::Poppler)
///     .tool_timeout_secs(60)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 200);
/// ```
#[derive(Clone)]
pub struct RedactionConfig {
    /// Rendering DPI for every page. Range: 72–600. Default: 150.
    ///
    /// Redaction regions are expressed in pixels of the page rendered at this
    /// resolution, and output page sizes are derived back from it, so the
    /// same value must be used when picking region coordinates.
    pub dpi: u32,

    /// Maximum rendered edge length in pixels. Default: 10 000.
    ///
    /// A page that would render larger than this on either axis fails the
    /// run instead of being downscaled, since downscaling would silently move
    /// every region coordinate on that page.
    pub max_rendered_pixels: u32,

    /// Number of pages redacted concurrently. Default: 4.
    pub concurrency: usize,

    /// Budget for each collaborator call (render, compose, strip, inspect)
    /// in seconds. Default: 120.
    pub tool_timeout_secs: u64,

    /// Fill colour painted over redaction regions. Default: black.
    pub fill: FillColor,

    /// Backend used to rasterise the source document. Default: pdfium.
    pub rasterizer: RasterBackend,

    /// Backend used to detect metadata in the output. Default: lopdf.
    pub inspector: InspectBackend,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Parent directory for the per-run working area. Default: system temp dir.
    pub scratch_dir: Option<PathBuf>,

    /// Explicit pdfium shared library (file or containing directory).
    ///
    /// Falls back to `PDFIUM_LIB_PATH`, then the directory of the executable,
    /// then the system library search path.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Optional observer for run progress.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 10_000,
            concurrency: 4,
            tool_timeout_secs: 120,
            fill: FillColor::default(),
            rasterizer: RasterBackend::default(),
            inspector: InspectBackend::default(),
            password: None,
            scratch_dir: None,
            pdfium_lib_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RedactionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedactionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("fill", &self.fill)
            .field("rasterizer", &self.rasterizer)
            .field("inspector", &self.inspector)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("scratch_dir", &self.scratch_dir)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RedactionProgressCallback>"),
            )
            .finish()
    }
}

impl RedactionConfig {
    /// Create a new builder for `RedactionConfig`.
    pub fn builder() -> RedactionConfigBuilder {
        RedactionConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn tool_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Builder for [`RedactionConfig`].
#[derive(Debug)]
pub struct RedactionConfigBuilder {
    config: RedactionConfig,
}

impl RedactionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout_secs = secs;
        self
    }

    pub fn fill(mut self, fill: FillColor) -> Self {
        self.config.fill = fill;
        self
    }

    pub fn rasterizer(mut self, backend: RasterBackend) -> Self {
        self.config.rasterizer = backend;
        self
    }

    pub fn inspector(mut self, backend: InspectBackend) -> Self {
        self.config.inspector = backend;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = Some(dir.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RedactionConfig, RedactError> {
        let c = &self.config;
        if !(MIN_DPI..=MAX_DPI).contains(&c.dpi) {
            return Err(RedactError::InvalidConfig(format!(
                "DPI must be {MIN_DPI}–{MAX_DPI}, got {}",
                c.dpi
            )));
        }
        if c.tool_timeout_secs == 0 {
            return Err(RedactError::InvalidConfig(
                "Tool timeout must be at least 1 second".into(),
            ));
        }
        if let Some(ref dir) = c.scratch_dir {
            if !dir.is_dir() {
                return Err(RedactError::InvalidConfig(format!(
                    "Scratch directory '{}' does not exist",
                    dir.display()
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How pages are turned into pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterBackend {
    /// In-process pdfium through `pdfium-render`. (default)
    #[default]
    Pdfium,
    /// The poppler `pdftoppm` program, run as a killable subprocess.
    Poppler,
}

/// How the output is checked for leftover metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InspectBackend {
    /// In-process structural inspection with `lopdf`. (default)
    #[default]
    Lopdf,
    /// The `exiftool` program, run as a killable subprocess.
    Exiftool,
}

/// Opaque RGB colour painted over redaction regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FillColor(pub [u8; 3]);

impl FillColor {
    pub const BLACK: FillColor = FillColor([0, 0, 0]);
    pub const WHITE: FillColor = FillColor([255, 255, 255]);
}

impl FromStr for FillColor {
    type Err = RedactError;

    /// Parse `RRGGBB`, with or without a leading `#`, or a colour name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "black" => return Ok(Self::BLACK),
            "white" => return Ok(Self::WHITE),
            _ => {}
        }
        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RedactError::InvalidConfig(format!(
                "Fill colour must be RRGGBB, got '{s}'"
            )));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| RedactError::InvalidConfig(format!("Fill colour '{s}': {e}")))
        };
        Ok(FillColor([channel(0)?, channel(2)?, channel(4)?]))
    }
}

impl fmt::Display for FillColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{r:02x}{g:02x}{b:02x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let c = RedactionConfig::builder().build().expect("defaults are valid");
        assert_eq!(c.dpi, 150);
        assert_eq!(c.fill, FillColor::BLACK);
        assert_eq!(c.rasterizer, RasterBackend::Pdfium);
        assert_eq!(c.inspector, InspectBackend::Lopdf);
    }

    #[test]
    fn dpi_out_of_range_rejected() {
        assert!(RedactionConfig::builder().dpi(50).build().is_err());
        assert!(RedactionConfig::builder().dpi(601).build().is_err());
        assert!(RedactionConfig::builder().dpi(600).build().is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = RedactionConfig::builder()
            .tool_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn concurrency_clamped_to_one() {
        let c = RedactionConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn missing_scratch_dir_rejected() {
        let err = RedactionConfig::builder()
            .scratch_dir("/definitely/not/here")
            .build()
            .unwrap_err();
        assert!(matches!(err, RedactError::InvalidConfig(_)));
    }

    #[test]
    fn fill_colour_parsing() {
        assert_eq!("#ff0080".parse::<FillColor>().unwrap(), FillColor([255, 0, 128]));
        assert_eq!("00FF00".parse::<FillColor>().unwrap(), FillColor([0, 255, 0]));
        assert_eq!("white".parse::<FillColor>().unwrap(), FillColor::WHITE);
        assert!("fff".parse::<FillColor>().is_err());
        assert!("gg0000".parse::<FillColor>().is_err());
        assert_eq!(FillColor([1, 2, 255]).to_string(), "#0102ff");
    }

    #[test]
    fn debug_hides_password() {
        let c = RedactionConfig::builder().password("hunter2").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("hunter2"));
    }
}

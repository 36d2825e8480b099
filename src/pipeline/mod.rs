//! Pipeline stages and the capability traits the orchestrator drives.
//!
//! Each submodule implements one transformation step behind a narrow trait,
//! so the orchestrator's sequencing can be tested with fakes and a backend
//! can be swapped (pdfium ↔ pdftoppm, lopdf ↔ exiftool) without touching
//! anything else.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ redaction ──▶ assemble ──▶ scrub
//! (%PDF)    (pixels)   (opaque fill)  (new PDF)    (strip + verify)
//! ```
//!
//! 1. [`input`]     — validate the untrusted source path
//! 2. [`render`] / [`poppler`] — rasterise every page into the working area
//! 3. [`redaction`] — paint operator regions with a solid fill
//! 4. [`assemble`]  — build a fresh PDF holding only the page images
//! 5. [`scrub`]     — strip document metadata, then inspect the result
//!
//! [`workspace`] owns every intermediate; [`state`] is the run state machine;
//! [`tool`] runs external programs with a hard timeout.

pub mod assemble;
pub mod input;
pub mod poppler;
pub mod redaction;
pub mod render;
pub mod scrub;
pub mod state;
pub mod tool;
pub mod workspace;

use crate::error::RedactError;
use async_trait::async_trait;
use image::RgbImage;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// One rasterised page, stored as a PNG inside the working area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageImage {
    /// 0-indexed position in the source document.
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    pub path: PathBuf,
}

impl PageImage {
    /// Encode `img` as PNG at `dir/page-NNNN-<tag>.png`.
    ///
    /// Blocking: call from `spawn_blocking` or a blocking collaborator.
    pub fn save(
        dir: &Path,
        index: usize,
        dpi: u32,
        img: &RgbImage,
        tag: &str,
    ) -> Result<Self, RedactError> {
        let path = dir.join(workspace::page_file_name(index, tag));
        img.save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| RedactError::PartialRender {
                page: index + 1,
                detail: format!("cannot write page image: {e}"),
            })?;
        Ok(Self {
            index,
            width: img.width(),
            height: img.height(),
            dpi,
            path,
        })
    }

    /// Decode the page back into RGB pixels. Blocking.
    pub fn load(&self) -> Result<RgbImage, RedactError> {
        image::open(&self.path)
            .map(|img| img.to_rgb8())
            .map_err(|e| {
                RedactError::Internal(format!(
                    "cannot read page image {}: {e}",
                    self.path.display()
                ))
            })
    }

    /// Page width in PDF points (1/72 in) at this image's DPI.
    pub fn width_pt(&self) -> f32 {
        self.width as f32 * 72.0 / self.dpi as f32
    }

    /// Page height in PDF points (1/72 in) at this image's DPI.
    pub fn height_pt(&self) -> f32 {
        self.height as f32 * 72.0 / self.dpi as f32
    }
}

/// Parameters for one rasterisation call.
#[derive(Debug, Clone, Copy)]
pub struct RasterRequest<'a> {
    /// The untrusted source. Read-only.
    pub source: &'a Path,
    pub dpi: u32,
    pub password: Option<&'a str>,
    /// Longest allowed rendered edge; larger pages fail the run.
    pub max_pixels: u32,
    /// Working-area directory that receives one PNG per page.
    pub out_dir: &'a Path,
}

/// Turns a document into one [`PageImage`] per page, in page order.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Render every page. Must fail rather than skip a page.
    async fn rasterize(&self, request: RasterRequest<'_>) -> Result<Vec<PageImage>, RedactError>;
}

/// Composes ordered page images into a single document.
#[async_trait]
pub trait Compositor: Send + Sync {
    async fn composite(&self, pages: &[PageImage]) -> Result<Vec<u8>, RedactError>;
}

/// Removes document-level metadata.
#[async_trait]
pub trait MetadataStripper: Send + Sync {
    async fn strip(&self, document: &[u8]) -> Result<Vec<u8>, RedactError>;
}

/// Reports the metadata fields present in a document.
#[async_trait]
pub trait MetadataInspector: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn inspect(&self, document: &[u8]) -> Result<BTreeSet<String>, RedactError>;
}

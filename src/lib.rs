//! # pdf-redact
//!
//! Sanitize PDF documents before publication by flattening every page to
//! pixels, burning in redactions, and rebuilding a metadata-free PDF.
//!
//! ## Why rasterise?
//!
//! A PDF can hide far more than it shows: text under images, revision
//! history, XMP packets, form fields, scripts, and "redactions" that are
//! just black rectangles drawn over live text. Editing such a file in place
//! means trusting that every one of those channels was found. Instead this
//! crate renders each page to an image, paints the operator's regions with
//! an opaque fill, and composes a brand-new document from those pixels.
//! Nothing in the input survives except what a reader could see.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF (untrusted)
//!  │
//!  ├─ 1. Input     validate path and %PDF- header
//!  ├─ 2. Render    rasterise pages via pdfium or pdftoppm (DPI from config)
//!  ├─ 3. Redact    paint regions with a solid fill, pages in parallel
//!  ├─ 4. Assemble  new PDF: one image per page, no Info, no ID
//!  ├─ 5. Scrub     strip metadata, then re-inspect; any residue aborts
//!  └─ 6. Deliver   atomic write (temp file + rename), or bytes in memory
//! ```
//!
//! Every intermediate lives in a private per-run working area that is
//! removed when the run ends, whether it succeeded or not.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_redact::{redact, RedactionConfig, RedactionRegion};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedactionConfig::builder().dpi(200).build()?;
//!     // Page 1, 100 px from the left, 80 px from the top, 600×40 px.
//!     let regions = vec!["1:100,80,600,40".parse::<RedactionRegion>()?];
//!     let report = redact("leak.pdf", None, &regions, &config).await?;
//!     eprintln!("removed: {:?}", report.removed_metadata);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `redact` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf-redact = { version = "0.1", default-features = false }
//! ```
//!
//! ## External Tools
//!
//! | Backend | Needs | Selected by |
//! |---------|-------|-------------|
//! | pdfium rasterizer (default) | `libpdfium` | `RasterBackend::Pdfium` |
//! | poppler rasterizer | `pdftoppm` on `PATH` | `RasterBackend::Poppler` |
//! | lopdf inspector (default) | nothing | `InspectBackend::Lopdf` |
//! | exiftool inspector | `exiftool` on `PATH` | `InspectBackend::Exiftool` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod redact;
pub mod region;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{FillColor, InspectBackend, RasterBackend, RedactionConfig, RedactionConfigBuilder};
pub use error::RedactError;
pub use orchestrator::{Delivery, Pipeline, RunInput};
pub use output::{ExplodeReport, InspectionReport, RedactionReport, SanitizedDocument, StageTimings};
pub use pipeline::state::{PipelineState, Stage};
pub use pipeline::{Compositor, MetadataInspector, MetadataStripper, PageImage, RasterRequest, Rasterizer};
pub use progress::{NoopProgressCallback, ProgressCallback, RedactionProgressCallback};
pub use redact::{
    block_on_detached, explode, inspect, merge, redact, redact_from_bytes, redact_sync,
    redact_to_bytes,
};
pub use region::{load_regions_file, RedactionRegion};

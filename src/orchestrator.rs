//! The pipeline orchestrator.
//!
//! [`Pipeline`] sequences the stages of a run through the state machine in
//! [`crate::pipeline::state`], owns the run's [`WorkingArea`], and is the
//! only place that decides whether a document gets delivered. It never
//! reads the source itself: the source path is handed to the rasterizer and
//! nothing downstream sees anything but page pixels.
//!
//! ```text
//! Created ─▶ Rasterizing ─▶ (Redacting) ─▶ Reassembling ─▶ Scrubbing ─▶ Verified ─▶ Delivered
//! ```
//!
//! Every collaborator call runs under `tool_timeout_secs`. Any error moves
//! the run to `Failed`, the working area is dropped (removing every
//! intermediate), and nothing is written to the destination.

use crate::config::{InspectBackend, RasterBackend, RedactionConfig};
use crate::error::RedactError;
use crate::output::{ExplodeReport, InspectionReport, RedactionReport, SanitizedDocument, StageTimings};
use crate::pipeline::assemble::LopdfCompositor;
use crate::pipeline::input::{collect_page_images, SourceDocument};
use crate::pipeline::poppler::PopplerRasterizer;
use crate::pipeline::redaction::apply_redactions;
use crate::pipeline::render::PdfiumRasterizer;
use crate::pipeline::scrub::{ExiftoolInspector, LopdfInspector, LopdfScrubber};
use crate::pipeline::state::{PipelineState, Stage, StateTracker};
use crate::pipeline::workspace::WorkingArea;
use crate::pipeline::{
    Compositor, MetadataInspector, MetadataStripper, PageImage, RasterRequest, Rasterizer,
};
use crate::progress::ProgressCallback;
use crate::region::{group_by_page, RedactionRegion};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What a run starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunInput {
    /// A PDF on disk.
    Pdf(PathBuf),
    /// A directory of page images, taken in file-name order (merge mode).
    PageImages(PathBuf),
}

/// Where a verified document goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Atomically written to this path.
    File(PathBuf),
    /// Returned to the caller only.
    Memory,
}

enum Source {
    Pdf(SourceDocument),
    Images(Vec<PathBuf>),
}

/// A configured sanitization pipeline.
///
/// Collaborators default to the backends named in the config and can be
/// replaced individually, which is how the integration tests inject fakes.
pub struct Pipeline {
    config: RedactionConfig,
    rasterizer: Arc<dyn Rasterizer>,
    compositor: Arc<dyn Compositor>,
    stripper: Arc<dyn MetadataStripper>,
    inspector: Arc<dyn MetadataInspector>,
}

impl Pipeline {
    pub fn new(config: RedactionConfig) -> Self {
        let rasterizer: Arc<dyn Rasterizer> = match config.rasterizer {
            RasterBackend::Pdfium => Arc::new(PdfiumRasterizer::new(config.pdfium_lib_path.clone())),
            RasterBackend::Poppler => Arc::new(PopplerRasterizer::new(config.tool_timeout())),
        };
        let inspector: Arc<dyn MetadataInspector> = match config.inspector {
            InspectBackend::Lopdf => Arc::new(LopdfInspector),
            InspectBackend::Exiftool => Arc::new(ExiftoolInspector::new(config.tool_timeout())),
        };
        Self {
            config,
            rasterizer,
            compositor: Arc::new(LopdfCompositor),
            stripper: Arc::new(LopdfScrubber),
            inspector,
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_compositor(mut self, compositor: Arc<dyn Compositor>) -> Self {
        self.compositor = compositor;
        self
    }

    pub fn with_stripper(mut self, stripper: Arc<dyn MetadataStripper>) -> Self {
        self.stripper = stripper;
        self
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn MetadataInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn config(&self) -> &RedactionConfig {
        &self.config
    }

    /// Sanitize `input`, painting `regions`, and deliver the verified result.
    ///
    /// The returned bytes are exactly what was written for
    /// [`Delivery::File`]. On error nothing is written and the working area
    /// is already gone.
    pub async fn run(
        &self,
        input: &RunInput,
        regions: &[RedactionRegion],
        delivery: &Delivery,
    ) -> Result<SanitizedDocument, RedactError> {
        let mut tracker = StateTracker::default();
        match self.run_stages(input, regions, delivery, &mut tracker).await {
            Ok(doc) => Ok(doc),
            Err(e) => {
                if let Some(prev) = tracker.fail() {
                    warn!("Run failed while {}: {}", prev, e);
                    if let Some(cb) = self.callback() {
                        cb.on_state_change(prev, PipelineState::Failed);
                    }
                }
                if let Some(cb) = self.callback() {
                    cb.on_run_failed(&e.to_string());
                }
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        input: &RunInput,
        regions: &[RedactionRegion],
        delivery: &Delivery,
        tracker: &mut StateTracker,
    ) -> Result<SanitizedDocument, RedactError> {
        let started = Instant::now();
        let mut timings = StageTimings::default();

        let source = match input {
            RunInput::Pdf(path) => Source::Pdf(SourceDocument::open(path)?),
            RunInput::PageImages(dir) => Source::Images(collect_page_images(dir)?),
        };
        if let (Source::Pdf(doc), Delivery::File(out)) = (&source, delivery) {
            if same_file(doc.path(), out) {
                return Err(RedactError::SourceIsOutput { path: out.clone() });
            }
        }

        let area = WorkingArea::create(self.config.scratch_dir.as_deref())?;

        // ── Rasterize ────────────────────────────────────────────────────
        self.transition(tracker, PipelineState::Rasterizing)?;
        let t = Instant::now();
        let pages = self.rasterize(&source, &area).await?;
        timings.render_ms = t.elapsed().as_millis() as u64;
        let page_count = pages.len();
        info!("Rasterised {} pages in {}ms", page_count, timings.render_ms);

        // ── Redact ───────────────────────────────────────────────────────
        let by_page = group_by_page(regions);
        validate_regions(&pages, &by_page)?;
        let pages = if by_page.is_empty() {
            debug!("No regions supplied; skipping redaction");
            pages
        } else {
            self.transition(tracker, PipelineState::Redacting)?;
            let t = Instant::now();
            let redacted = self
                .timed(Stage::Redact, self.redact_pages(pages, &by_page, area.path()))
                .await?;
            timings.redact_ms = t.elapsed().as_millis() as u64;
            redacted
        };

        // ── Reassemble ───────────────────────────────────────────────────
        self.transition(tracker, PipelineState::Reassembling)?;
        let t = Instant::now();
        let composed = self
            .timed(Stage::Reassemble, self.compositor.composite(&pages))
            .await?;
        area.write("composed.pdf", &composed).await?;
        timings.assemble_ms = t.elapsed().as_millis() as u64;

        // ── Scrub and verify ─────────────────────────────────────────────
        self.transition(tracker, PipelineState::Scrubbing)?;
        let t = Instant::now();
        let found = self
            .timed(Stage::Inspect, self.inspector.inspect(&composed))
            .await?;
        let stripped = self.timed(Stage::Strip, self.stripper.strip(&composed)).await?;
        area.write("scrubbed.pdf", &stripped).await?;
        let residual = self
            .timed(Stage::Inspect, self.inspector.inspect(&stripped))
            .await?;
        timings.scrub_ms = t.elapsed().as_millis() as u64;
        if !residual.is_empty() {
            return Err(RedactError::ResidualMetadata {
                fields: residual.into_iter().collect(),
            });
        }
        self.transition(tracker, PipelineState::Verified)?;
        info!(
            "{} inspector reports no metadata ({} field(s) removed)",
            self.inspector.name(),
            found.len()
        );

        // ── Deliver ──────────────────────────────────────────────────────
        let output_path = match delivery {
            Delivery::File(path) => {
                deliver_atomically(&stripped, path).await?;
                Some(path.clone())
            }
            Delivery::Memory => None,
        };
        self.transition(tracker, PipelineState::Delivered)?;
        timings.total_ms = started.elapsed().as_millis() as u64;

        // The output stands even if scratch cleanup fails; close() logs it.
        let _ = area.close();

        if let Some(cb) = self.callback() {
            cb.on_run_complete(page_count, by_page.len());
        }

        Ok(SanitizedDocument {
            bytes: stripped,
            report: RedactionReport {
                output_path,
                page_count,
                redacted_pages: by_page.len(),
                regions_applied: by_page.values().map(Vec::len).sum(),
                dpi: self.config.dpi,
                removed_metadata: found.into_iter().collect(),
                states: tracker.history().to_vec(),
                timings,
            },
        })
    }

    /// Rasterise (and optionally redact) `source` into `out_dir` as
    /// `page-NNNN.png` files for editing by hand.
    pub async fn explode(
        &self,
        source: &Path,
        regions: &[RedactionRegion],
        out_dir: &Path,
    ) -> Result<ExplodeReport, RedactError> {
        let source = Source::Pdf(SourceDocument::open(source)?);
        let area = WorkingArea::create(self.config.scratch_dir.as_deref())?;

        let pages = self.rasterize(&source, &area).await?;
        let by_page = group_by_page(regions);
        validate_regions(&pages, &by_page)?;
        let pages = if by_page.is_empty() {
            pages
        } else {
            self.timed(Stage::Redact, self.redact_pages(pages, &by_page, area.path()))
                .await?
        };

        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| RedactError::OutputWriteFailed {
                path: out_dir.to_path_buf(),
                source: e,
            })?;
        let mut written = Vec::with_capacity(pages.len());
        for page in &pages {
            let dest = out_dir.join(explode_file_name(page.index));
            tokio::fs::copy(&page.path, &dest)
                .await
                .map_err(|e| RedactError::OutputWriteFailed {
                    path: dest.clone(),
                    source: e,
                })?;
            written.push(dest);
        }
        let _ = area.close();

        info!("Exploded {} pages into {}", written.len(), out_dir.display());
        Ok(ExplodeReport {
            output_dir: out_dir.to_path_buf(),
            pages: written,
            redacted_pages: by_page.len(),
            dpi: self.config.dpi,
        })
    }

    /// List the metadata fields the configured inspector finds in `source`.
    pub async fn inspect(&self, source: &Path) -> Result<InspectionReport, RedactError> {
        let doc = SourceDocument::open(source)?;
        let bytes = tokio::fs::read(doc.path())
            .await
            .map_err(|e| RedactError::UnsupportedDocument {
                path: doc.path().to_path_buf(),
                detail: format!("cannot read: {e}"),
            })?;
        let fields = self
            .timed(Stage::Inspect, self.inspector.inspect(&bytes))
            .await?;
        Ok(InspectionReport {
            path: doc.path().to_path_buf(),
            inspector: self.inspector.name().to_string(),
            fields: fields.into_iter().collect(),
        })
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn callback(&self) -> Option<&ProgressCallback> {
        self.config.progress_callback.as_ref()
    }

    fn transition(
        &self,
        tracker: &mut StateTracker,
        next: PipelineState,
    ) -> Result<(), RedactError> {
        let prev = tracker.advance(next)?;
        if let Some(cb) = self.callback() {
            cb.on_state_change(prev, next);
        }
        Ok(())
    }

    /// Run a collaborator call under the configured time budget.
    async fn timed<T, F>(&self, stage: Stage, call: F) -> Result<T, RedactError>
    where
        F: Future<Output = Result<T, RedactError>>,
    {
        let budget = self.config.tool_timeout();
        match tokio::time::timeout(budget, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%stage, secs = budget.as_secs(), "collaborator timed out");
                Err(RedactError::Timeout {
                    stage,
                    secs: budget.as_secs(),
                })
            }
        }
    }

    async fn rasterize(
        &self,
        source: &Source,
        area: &WorkingArea,
    ) -> Result<Vec<PageImage>, RedactError> {
        let pages = match source {
            Source::Pdf(doc) => {
                let request = RasterRequest {
                    source: doc.path(),
                    dpi: self.config.dpi,
                    password: self.config.password.as_deref(),
                    max_pixels: self.config.max_rendered_pixels,
                    out_dir: area.path(),
                };
                debug!("Rasterising with {}", self.rasterizer.name());
                self.timed(Stage::Rasterize, self.rasterizer.rasterize(request))
                    .await?
            }
            Source::Images(files) => {
                let files = files.clone();
                let out_dir = area.path().to_path_buf();
                let dpi = self.config.dpi;
                let max_pixels = self.config.max_rendered_pixels;
                let import = async move {
                    tokio::task::spawn_blocking(move || {
                        import_page_images(&files, &out_dir, dpi, max_pixels)
                    })
                    .await
                    .map_err(|e| RedactError::Internal(format!("Import task panicked: {}", e)))?
                };
                self.timed(Stage::Rasterize, import).await?
            }
        };
        let pages = check_page_sequence(pages)?;
        if let Some(cb) = self.callback() {
            cb.on_pages_rendered(pages.len());
        }
        Ok(pages)
    }

    /// Redact pages concurrently, returning them in page order.
    async fn redact_pages(
        &self,
        pages: Vec<PageImage>,
        by_page: &BTreeMap<usize, Vec<RedactionRegion>>,
        out_dir: &Path,
    ) -> Result<Vec<PageImage>, RedactError> {
        let total = by_page.len();
        let fill = self.config.fill;

        let mut results: Vec<PageImage> = stream::iter(pages.into_iter().map(|page| {
            let regions = by_page.get(&page.index).cloned().unwrap_or_default();
            let out_dir = out_dir.to_path_buf();
            let cb = self.config.progress_callback.clone();
            async move {
                if regions.is_empty() {
                    return Ok(page);
                }
                let index = page.index;
                let count = regions.len();
                let redacted = tokio::task::spawn_blocking(move || {
                    apply_redactions(&page, &regions, fill, &out_dir)
                })
                .await
                .map_err(|e| RedactError::Internal(format!("Redaction task panicked: {}", e)))??;
                if let Some(cb) = cb {
                    cb.on_page_redacted(index + 1, total, count);
                }
                Ok::<_, RedactError>(redacted)
            }
        }))
        .buffer_unordered(self.config.concurrency.max(1))
        .try_collect()
        .await?;

        results.sort_by_key(|p| p.index);
        Ok(results)
    }
}

/// Sort rasterizer output and make sure every page from the first is present.
fn check_page_sequence(mut pages: Vec<PageImage>) -> Result<Vec<PageImage>, RedactError> {
    if pages.is_empty() {
        return Err(RedactError::PartialRender {
            page: 1,
            detail: "rasterizer returned no pages".into(),
        });
    }
    pages.sort_by_key(|p| p.index);
    for (expected, page) in pages.iter().enumerate() {
        if page.index != expected {
            return Err(RedactError::PartialRender {
                page: expected + 1,
                detail: "rasterizer returned no image for this page".into(),
            });
        }
    }
    Ok(pages)
}

/// Check every region against its page before any pixel is painted.
fn validate_regions(
    pages: &[PageImage],
    by_page: &BTreeMap<usize, Vec<RedactionRegion>>,
) -> Result<(), RedactError> {
    for (&index, regions) in by_page {
        let Some(page) = pages.get(index) else {
            let region = regions
                .first()
                .map(ToString::to_string)
                .unwrap_or_default();
            return Err(RedactError::RegionOutOfBounds {
                page: index + 1,
                region,
                bounds: format!("document has {} page(s)", pages.len()),
            });
        };
        for region in regions {
            region.check_bounds(page.width, page.height)?;
        }
    }
    Ok(())
}

/// Decode operator-supplied page images and re-encode them into the working
/// area, dropping anything that is not pixels (text chunks, EXIF, ICC).
fn import_page_images(
    files: &[PathBuf],
    out_dir: &Path,
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<PageImage>, RedactError> {
    files
        .iter()
        .enumerate()
        .map(|(idx, file)| {
            let img = image::open(file)
                .map_err(|e| RedactError::PartialRender {
                    page: idx + 1,
                    detail: format!("cannot decode {}: {e}", file.display()),
                })?
                .to_rgb8();
            if img.width() > max_pixels || img.height() > max_pixels {
                return Err(RedactError::PartialRender {
                    page: idx + 1,
                    detail: format!(
                        "{} is {}x{} px, above the {} px limit",
                        file.display(),
                        img.width(),
                        img.height(),
                        max_pixels
                    ),
                });
            }
            PageImage::save(out_dir, idx, dpi, &img, "raster")
        })
        .collect()
}

/// `page-NNNN.png`, 1-indexed, as written by explode and read back by merge.
pub fn explode_file_name(index: usize) -> String {
    format!("page-{:04}.png", index + 1)
}

/// Whether `output` names the same file as `source`, following symlinks.
///
/// `output` usually does not exist yet, so its parent is resolved instead.
fn same_file(source: &Path, output: &Path) -> bool {
    let Ok(source) = source.canonicalize() else {
        return false;
    };
    let resolved = output.canonicalize().ok().or_else(|| {
        let name = output.file_name()?;
        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        parent.canonicalize().ok().map(|p| p.join(name))
    });
    resolved.is_some_and(|out| out == source)
}

/// Write `bytes` to a temp file beside `path`, then rename it into place.
async fn deliver_atomically(bytes: &[u8], path: &Path) -> Result<(), RedactError> {
    let bytes = bytes.to_vec();
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let write_err = |e: std::io::Error| RedactError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        };
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(write_err)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".redact-out-")
            .suffix(".tmp")
            .tempfile_in(&parent)
            .map_err(write_err)?;
        tmp.write_all(&bytes).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;
        info!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    })
    .await
    .map_err(|e| RedactError::Internal(format!("Delivery task panicked: {}", e)))?
}

//! PDF rasterisation via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and not
//! async-aware. The whole document is rendered on one blocking-pool thread
//! so Tokio workers never stall.
//!
//! ## Cancellation
//!
//! A blocking thread cannot be killed. When the orchestrator's timeout drops
//! the render future, a [`CancelGuard`] flips a flag that the render loop
//! checks around every page, so an abandoned render stops at the next page
//! boundary instead of running to the end of a hostile document. A single
//! page that hangs inside pdfium still pins its thread; the blocking entry
//! points ([`crate::redact_sync`], the `redact` binary) shut their runtime
//! down with [`crate::block_on_detached`] so that thread is left behind.
//!
//! ## Why fail on oversized pages?
//!
//! Region coordinates are pixels at the configured DPI. Downscaling an
//! oversized page would silently move every region on it, so a page that
//! would exceed `max_pixels` on either edge aborts the run.

use crate::error::RedactError;
use crate::pipeline::{PageImage, RasterRequest, Rasterizer};
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Environment variable naming an explicit pdfium library (file or directory).
pub const PDFIUM_LIB_ENV: &str = "PDFIUM_LIB_PATH";

/// Rasterises pages in-process with pdfium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    lib_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(lib_path: Option<PathBuf>) -> Self {
        Self { lib_path }
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    fn name(&self) -> &'static str {
        "pdfium"
    }

    async fn rasterize(&self, request: RasterRequest<'_>) -> Result<Vec<PageImage>, RedactError> {
        let job = RenderJob {
            source: request.source.to_path_buf(),
            dpi: request.dpi,
            password: request.password.map(str::to_string),
            max_pixels: request.max_pixels,
            out_dir: request.out_dir.to_path_buf(),
            lib_path: self.lib_path.clone(),
        };

        let guard = CancelGuard::default();
        let cancelled = guard.flag();

        let result = tokio::task::spawn_blocking(move || render_document_blocking(&job, &cancelled))
            .await
            .map_err(|e| RedactError::Internal(format!("Render task panicked: {}", e)))?;

        drop(guard);
        result
    }
}

/// Sets its flag when dropped, including when the owning future is cancelled.
#[derive(Default)]
struct CancelGuard {
    flag: Arc<AtomicBool>,
}

impl CancelGuard {
    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

struct RenderJob {
    source: PathBuf,
    dpi: u32,
    password: Option<String>,
    max_pixels: u32,
    out_dir: PathBuf,
    lib_path: Option<PathBuf>,
}

/// Bind to pdfium: explicit path, then `PDFIUM_LIB_PATH`, then the
/// executable's directory, then the system library.
pub fn bind_pdfium(explicit: Option<&Path>) -> Result<Pdfium, RedactError> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(p) = explicit {
        candidates.push(p.to_path_buf());
    }
    if let Some(p) = std::env::var_os(PDFIUM_LIB_ENV) {
        candidates.push(PathBuf::from(p));
    }
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(dir);
    }

    let mut last_error = None;
    for candidate in candidates {
        let lib = if candidate.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(&candidate)
        } else {
            candidate
        };
        match Pdfium::bind_to_library(&lib) {
            Ok(bindings) => {
                debug!("Bound pdfium from {}", lib.display());
                return Ok(Pdfium::new(bindings));
            }
            Err(e) => last_error = Some(format!("{}: {:?}", lib.display(), e)),
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| {
            RedactError::PdfiumBindingFailed(match last_error {
                Some(prev) => format!("{:?} (also tried {})", e, prev),
                None => format!("{:?}", e),
            })
        })
}

/// Pixel size of a page of `points` at `dpi`, rounded to the nearest pixel.
pub fn points_to_pixels(points: f32, dpi: u32) -> u32 {
    (points * dpi as f32 / 72.0).round().max(1.0) as u32
}

fn render_document_blocking(
    job: &RenderJob,
    cancelled: &AtomicBool,
) -> Result<Vec<PageImage>, RedactError> {
    let pdfium = bind_pdfium(job.lib_path.as_deref())?;
    let password = job.password.as_deref();

    let document = pdfium
        .load_pdf_from_file(&job.source, password)
        .map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    RedactError::WrongPassword {
                        path: job.source.clone(),
                    }
                } else {
                    RedactError::PasswordRequired {
                        path: job.source.clone(),
                    }
                }
            } else {
                RedactError::UnsupportedDocument {
                    path: job.source.clone(),
                    detail: err_str,
                }
            }
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(RedactError::UnsupportedDocument {
            path: job.source.clone(),
            detail: "document has no pages".into(),
        });
    }
    info!("PDF loaded: {} pages, rendering at {} DPI", total_pages, job.dpi);

    let scale = job.dpi as f32 / 72.0;
    let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);

    let mut results = Vec::with_capacity(total_pages);

    for idx in 0..total_pages {
        if cancelled.load(Ordering::SeqCst) {
            return Err(RedactError::Internal(format!(
                "rendering abandoned before page {}",
                idx + 1
            )));
        }

        let page = pages
            .get(idx as u16)
            .map_err(|e| RedactError::PartialRender {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let expected_w = points_to_pixels(page.width().value, job.dpi);
        let expected_h = points_to_pixels(page.height().value, job.dpi);
        if expected_w > job.max_pixels || expected_h > job.max_pixels {
            return Err(RedactError::PartialRender {
                page: idx + 1,
                detail: format!(
                    "page would render at {}x{} px, above the {} px limit; lower --resolution",
                    expected_w, expected_h, job.max_pixels
                ),
            });
        }

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            RedactError::PartialRender {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        if cancelled.load(Ordering::SeqCst) {
            return Err(RedactError::Internal(format!(
                "rendering abandoned after page {}",
                idx + 1
            )));
        }

        let image = bitmap.as_image().to_rgb8();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );

        results.push(PageImage::save(&job.out_dir, idx, job.dpi, &image, "raster")?);
    }

    Ok(results)
}

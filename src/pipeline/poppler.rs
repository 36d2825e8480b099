//! PDF rasterisation via poppler's `pdftoppm`, run as a subprocess.
//!
//! Useful where pdfium is not available, and as a second renderer for
//! documents that crash one of them. Unlike the in-process backend, a hung
//! `pdftoppm` is killed outright when the time budget elapses.

use crate::error::RedactError;
use crate::pipeline::state::Stage;
use crate::pipeline::tool::run_tool;
use crate::pipeline::{PageImage, RasterRequest, Rasterizer};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const PREFIX: &str = "page";

/// Rasterises pages by running `pdftoppm -r DPI -png`.
#[derive(Debug, Clone)]
pub struct PopplerRasterizer {
    program: String,
    timeout: Duration,
}

impl PopplerRasterizer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: "pdftoppm".to_string(),
            timeout,
        }
    }

    /// Use a different `pdftoppm` binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl Rasterizer for PopplerRasterizer {
    fn name(&self) -> &'static str {
        "poppler"
    }

    async fn rasterize(&self, request: RasterRequest<'_>) -> Result<Vec<PageImage>, RedactError> {
        let scratch = request.out_dir.join("poppler");
        tokio::fs::create_dir_all(&scratch)
            .await
            .map_err(RedactError::WorkingArea)?;

        if request.password.is_some() {
            warn!(
                "{} takes the password as a command-line argument; \
                 other local users can read it from the process list",
                self.program
            );
        }
        let args = pdftoppm_args(&request, &scratch);

        info!("Rendering with {} at {} DPI", self.program, request.dpi);
        run_tool(&self.program, args, None, self.timeout, Stage::Rasterize)
            .await
            .map_err(|e| classify_failure(e, request.source, request.password.is_some()))?;

        let rendered = collect_numbered_pages(&scratch, request.source)?;
        debug!("{} produced {} pages", self.program, rendered.len());

        let out_dir = request.out_dir.to_path_buf();
        let dpi = request.dpi;
        let max_pixels = request.max_pixels;
        tokio::task::spawn_blocking(move || normalise_pages(rendered, &out_dir, dpi, max_pixels))
            .await
            .map_err(|e| RedactError::Internal(format!("Page import task panicked: {}", e)))?
    }
}

/// `-r DPI -png [-upw PASSWORD] SOURCE OUT_PREFIX`.
///
/// pdftoppm has no other way to receive a password, so it ends up in argv.
fn pdftoppm_args(request: &RasterRequest<'_>, scratch: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-r".into(), request.dpi.to_string().into(), "-png".into()];
    if let Some(pwd) = request.password {
        args.push("-upw".into());
        args.push(pwd.into());
    }
    args.push(request.source.as_os_str().to_owned());
    args.push(scratch.join(PREFIX).into_os_string());
    args
}

/// Turn a failed `pdftoppm` run into an input error.
fn classify_failure(err: RedactError, source: &Path, had_password: bool) -> RedactError {
    match err {
        RedactError::ToolFailed { stderr, .. } => {
            if stderr.to_ascii_lowercase().contains("password") {
                if had_password {
                    RedactError::WrongPassword {
                        path: source.to_path_buf(),
                    }
                } else {
                    RedactError::PasswordRequired {
                        path: source.to_path_buf(),
                    }
                }
            } else {
                RedactError::UnsupportedDocument {
                    path: source.to_path_buf(),
                    detail: stderr,
                }
            }
        }
        other => other,
    }
}

/// Parse `page-<n>.png` (pdftoppm zero-pads `n` to the page count's width).
fn page_number(name: &str) -> Option<usize> {
    name.strip_prefix(PREFIX)?
        .strip_prefix('-')?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

/// List pdftoppm's output in page order, failing on any gap.
fn collect_numbered_pages(dir: &Path, source: &Path) -> Result<Vec<PathBuf>, RedactError> {
    let mut numbered: Vec<(usize, PathBuf)> = std::fs::read_dir(dir)
        .map_err(RedactError::WorkingArea)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            page_number(&name).map(|n| (n, e.path()))
        })
        .collect();
    numbered.sort_by_key(|(n, _)| *n);

    if numbered.is_empty() {
        return Err(RedactError::UnsupportedDocument {
            path: source.to_path_buf(),
            detail: "renderer produced no pages".into(),
        });
    }
    for (expected, (n, _)) in (1..).zip(&numbered) {
        if *n != expected {
            return Err(RedactError::PartialRender {
                page: expected,
                detail: "renderer produced no image for this page".into(),
            });
        }
    }
    Ok(numbered.into_iter().map(|(_, p)| p).collect())
}

/// Re-encode each rendered page into the working area as a `PageImage`.
fn normalise_pages(
    rendered: Vec<PathBuf>,
    out_dir: &Path,
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<PageImage>, RedactError> {
    rendered
        .iter()
        .enumerate()
        .map(|(idx, path)| {
            let img = image::open(path)
                .map_err(|e| RedactError::PartialRender {
                    page: idx + 1,
                    detail: format!("unreadable render output: {e}"),
                })?
                .to_rgb8();
            if img.width() > max_pixels || img.height() > max_pixels {
                return Err(RedactError::PartialRender {
                    page: idx + 1,
                    detail: format!(
                        "page rendered at {}x{} px, above the {} px limit; lower --resolution",
                        img.width(),
                        img.height(),
                        max_pixels
                    ),
                });
            }
            let page = PageImage::save(out_dir, idx, dpi, &img, "raster")?;
            std::fs::remove_file(path).map_err(RedactError::WorkingArea)?;
            Ok(page)
        })
        .collect()
}

//! One-call entry points.
//!
//! Each function builds a [`Pipeline`] from the config with its default
//! backends. Build a [`Pipeline`] yourself to swap a collaborator.

use crate::config::RedactionConfig;
use crate::error::RedactError;
use crate::orchestrator::{Delivery, Pipeline, RunInput};
use crate::output::{ExplodeReport, InspectionReport, RedactionReport, SanitizedDocument};
use crate::pipeline::input::SourceDocument;
use crate::region::RedactionRegion;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Sanitize a PDF and write the result to `output`.
///
/// With `output = None` the result goes to `<stem>-final.pdf` beside the
/// input. The write is atomic: the destination either holds the complete
/// verified document or is left untouched.
///
/// # Example
/// ```rust,no_run
/// use pdf_redact::{redact, RedactionConfig, RedactionRegion};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = RedactionConfig::default();
/// let regions = ["1:100,120,400,40".parse::<RedactionRegion>()?];
/// let report = redact("leak.pdf", None, &regions, &config).await?;
/// eprintln!("{} pages, {} redacted", report.page_count, report.redacted_pages);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// Any [`RedactError`]; every error aborts the run and leaves no output.
pub async fn redact(
    input: impl AsRef<Path>,
    output: Option<&Path>,
    regions: &[RedactionRegion],
    config: &RedactionConfig,
) -> Result<RedactionReport, RedactError> {
    let input = input.as_ref();
    let output = match output {
        Some(p) => p.to_path_buf(),
        None => SourceDocument::open(input)?.default_output_path(),
    };
    info!("Sanitizing {} → {}", input.display(), output.display());

    let doc = Pipeline::new(config.clone())
        .run(
            &RunInput::Pdf(input.to_path_buf()),
            regions,
            &Delivery::File(output),
        )
        .await?;
    Ok(doc.report)
}

/// Sanitize a PDF and return the verified bytes without writing anything.
pub async fn redact_to_bytes(
    input: impl AsRef<Path>,
    regions: &[RedactionRegion],
    config: &RedactionConfig,
) -> Result<SanitizedDocument, RedactError> {
    Pipeline::new(config.clone())
        .run(
            &RunInput::Pdf(input.as_ref().to_path_buf()),
            regions,
            &Delivery::Memory,
        )
        .await
}

/// Sanitize PDF bytes held in memory.
///
/// The bytes are written to a managed [`tempfile`] so the rasterizer can
/// open them; it is removed on return or panic.
pub async fn redact_from_bytes(
    bytes: &[u8],
    regions: &[RedactionRegion],
    config: &RedactionConfig,
) -> Result<SanitizedDocument, RedactError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".redact-in-").suffix(".pdf");
    let mut tmp = match config.scratch_dir.as_deref() {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .map_err(RedactError::WorkingArea)?;
    tmp.write_all(bytes).map_err(RedactError::WorkingArea)?;
    redact_to_bytes(tmp.path(), regions, config).await
}

/// Blocking wrapper around [`redact`].
///
/// Runs on a private tokio runtime via [`block_on_detached`], so a render
/// abandoned by the timeout cannot keep the caller waiting.
pub fn redact_sync(
    input: impl AsRef<Path>,
    output: Option<&Path>,
    regions: &[RedactionRegion],
    config: &RedactionConfig,
) -> Result<RedactionReport, RedactError> {
    block_on_detached(redact(input, output, regions, config))?
}

/// Drive `future` to completion on a fresh multi-threaded runtime, then shut
/// the runtime down without waiting for blocking tasks.
///
/// pdfium cannot be interrupted mid-page. When a collaborator times out the
/// run fails straight away, but its `spawn_blocking` thread keeps going; an
/// ordinary runtime drop would then wait for it, possibly forever. Here that
/// thread is left behind and the caller gets control back immediately.
pub fn block_on_detached<F: Future>(future: F) -> Result<F::Output, RedactError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| RedactError::Internal(format!("Failed to create tokio runtime: {}", e)))?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

/// Write every page of a PDF as `page-NNNN.png` for manual redaction.
///
/// With `out_dir = None` pages go to `<stem>_pages/` beside the input.
/// `regions`, if any, are burned in before the pages are written.
pub async fn explode(
    input: impl AsRef<Path>,
    out_dir: Option<&Path>,
    regions: &[RedactionRegion],
    config: &RedactionConfig,
) -> Result<ExplodeReport, RedactError> {
    let input = input.as_ref();
    let out_dir: PathBuf = match out_dir {
        Some(p) => p.to_path_buf(),
        None => SourceDocument::open(input)?.default_pages_dir(),
    };
    Pipeline::new(config.clone())
        .explode(input, regions, &out_dir)
        .await
}

/// Reassemble a directory of page images into a sanitized PDF.
///
/// Images are taken in file-name order and re-encoded before reassembly,
/// so only their pixels reach the output.
pub async fn merge(
    pages_dir: impl AsRef<Path>,
    output: &Path,
    config: &RedactionConfig,
) -> Result<RedactionReport, RedactError> {
    let pages_dir = pages_dir.as_ref();
    info!("Merging {} → {}", pages_dir.display(), output.display());
    let doc = Pipeline::new(config.clone())
        .run(
            &RunInput::PageImages(pages_dir.to_path_buf()),
            &[],
            &Delivery::File(output.to_path_buf()),
        )
        .await?;
    Ok(doc.report)
}

/// List the metadata fields present in a PDF without modifying it.
pub async fn inspect(
    input: impl AsRef<Path>,
    config: &RedactionConfig,
) -> Result<InspectionReport, RedactError> {
    Pipeline::new(config.clone()).inspect(input.as_ref()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_input_reported_before_any_work() {
        let err = redact_sync(
            "/definitely/not/here.pdf",
            None,
            &[],
            &RedactionConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RedactError::FileNotFound { .. }));
    }

    #[test]
    fn detached_runtime_does_not_wait_for_blocking_work() {
        let start = std::time::Instant::now();
        let value = block_on_detached(async {
            let _abandoned =
                tokio::task::spawn_blocking(|| std::thread::sleep(std::time::Duration::from_secs(20)));
            7
        })
        .unwrap();
        assert_eq!(value, 7);
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn merge_of_missing_directory_fails() {
        let out = tempfile::tempdir().unwrap();
        let err = tokio_test::block_on(merge(
            "/definitely/not/a/dir",
            &out.path().join("o.pdf"),
            &RedactionConfig::default(),
        ))
        .unwrap_err();
        assert!(matches!(err, RedactError::FileNotFound { .. }));
        assert!(!out.path().join("o.pdf").exists());
    }
}

//! Error types for the pdf-redact library.
//!
//! Every failure is fatal. A sanitization run either delivers a verified
//! document or delivers nothing, so there is no per-page error type and no
//! partial-success report: the first error aborts the run, the working area
//! is torn down, and the error is returned to the caller.
//!
//! [`RedactError::exit_code`] maps each variant onto the process exit codes
//! used by the `redact` binary. Residual-metadata failures get their own code
//! range so automation can tell "the scrubber did not finish its job" apart
//! from ordinary input problems.

use crate::pipeline::state::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the pdf-redact library.
#[derive(Debug, Error)]
pub enum RedactError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but carries no PDF header.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The document could not be opened or rendered at all.
    #[error("Unsupported document '{path}': {detail}")]
    UnsupportedDocument { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    // ── Stage errors ──────────────────────────────────────────────────────
    /// A single page failed to rasterise; the whole run is aborted.
    #[error("Rasterisation failed for page {page}: {detail}")]
    PartialRender { page: usize, detail: String },

    /// An operator-supplied region does not fit its page.
    #[error("Redaction region {region} on page {page} is out of bounds ({bounds})")]
    RegionOutOfBounds {
        /// 1-indexed page number, as the operator wrote it.
        page: usize,
        region: String,
        /// What the region was checked against, e.g. `page is 1275x1650 px`.
        bounds: String,
    },

    /// An operator-supplied region is malformed (zero area, bad syntax).
    #[error("Invalid redaction region '{region}': {reason}")]
    InvalidRegion { region: String, reason: String },

    /// The page sequence handed to the reassembler is malformed.
    ///
    /// This indicates a bug: the orchestrator should never produce an empty
    /// or gapped sequence.
    #[error("Reassembly failed: {0}")]
    Reassembly(String),

    /// Metadata was still present after the strip pass.
    #[error(
        "Residual metadata detected after scrubbing ({} field(s): {})\nNo output was written.",
        fields.len(),
        fields.join(", ")
    )]
    ResidualMetadata { fields: Vec<String> },

    /// A collaborator call exceeded its time budget.
    #[error("{stage} timed out after {secs}s; the run was aborted")]
    Timeout { stage: Stage, secs: u64 },

    // ── Tool errors ───────────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium (or pass --pdfium-lib) to use a specific copy,\n\
or install pdfium system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    /// An external program could not be started.
    #[error("External tool '{tool}' is unavailable: {detail}")]
    ToolUnavailable { tool: String, detail: String },

    /// An external program exited unsuccessfully.
    #[error("External tool '{tool}' failed ({status}): {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    // ── Run errors ────────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested output path resolves to the source document.
    #[error("Refusing to write output over the source document '{path}'")]
    SourceIsOutput { path: PathBuf },

    /// The per-run scratch directory could not be created or written.
    #[error("Working area error: {0}")]
    WorkingArea(#[source] std::io::Error),

    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RedactError {
    /// Process exit code for this error.
    ///
    /// | Code  | Meaning |
    /// |-------|---------|
    /// | 1     | usage, configuration or I/O problem |
    /// | 2     | document cannot be opened or rendered |
    /// | 3     | a page failed to rasterise |
    /// | 4     | a redaction region is invalid |
    /// | 5     | reassembly failed |
    /// | 6     | an external call timed out |
    /// | 7     | an external tool is missing or failed |
    /// | 10–19 | residual metadata (10 + field count, capped at 19) |
    pub fn exit_code(&self) -> u8 {
        match self {
            RedactError::FileNotFound { .. }
            | RedactError::PermissionDenied { .. }
            | RedactError::InvalidConfig(_)
            | RedactError::SourceIsOutput { .. }
            | RedactError::WorkingArea(_)
            | RedactError::OutputWriteFailed { .. }
            | RedactError::Internal(_) => 1,
            RedactError::NotAPdf { .. }
            | RedactError::UnsupportedDocument { .. }
            | RedactError::PasswordRequired { .. }
            | RedactError::WrongPassword { .. } => 2,
            RedactError::PartialRender { .. } => 3,
            RedactError::RegionOutOfBounds { .. } | RedactError::InvalidRegion { .. } => 4,
            RedactError::Reassembly(_) => 5,
            RedactError::Timeout { .. } => 6,
            RedactError::PdfiumBindingFailed(_)
            | RedactError::ToolUnavailable { .. }
            | RedactError::ToolFailed { .. } => 7,
            RedactError::ResidualMetadata { fields } => 10 + fields.len().min(9) as u8,
        }
    }

    /// True for the failure the whole pipeline exists to prevent.
    pub fn is_residual_metadata(&self) -> bool {
        matches!(self, RedactError::ResidualMetadata { .. })
    }
}

//! Result types returned by a sanitization run.

use crate::pipeline::state::PipelineState;
use serde::Serialize;
use std::path::PathBuf;

/// What a successful run did.
///
/// Serialises to the JSON printed by `redact --json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedactionReport {
    /// Where the sanitized document was written; `None` for in-memory runs.
    pub output_path: Option<PathBuf>,

    /// Pages in the output (always equal to the pages in the source).
    pub page_count: usize,

    /// Pages that had at least one region painted.
    pub redacted_pages: usize,

    /// Regions painted across all pages.
    pub regions_applied: usize,

    /// Resolution every page was rasterised at.
    pub dpi: u32,

    /// Metadata fields found on the reassembled document before stripping.
    pub removed_metadata: Vec<String>,

    /// Every state the run passed through, ending in `delivered`.
    pub states: Vec<PipelineState>,

    pub timings: StageTimings,
}

/// Wall-clock time spent per stage, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageTimings {
    pub render_ms: u64,
    pub redact_ms: u64,
    pub assemble_ms: u64,
    pub scrub_ms: u64,
    pub total_ms: u64,
}

/// A verified document held in memory, plus its run report.
#[derive(Debug, Clone)]
pub struct SanitizedDocument {
    pub bytes: Vec<u8>,
    pub report: RedactionReport,
}

/// Page images written by an explode run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExplodeReport {
    pub output_dir: PathBuf,
    pub pages: Vec<PathBuf>,
    pub redacted_pages: usize,
    pub dpi: u32,
}

/// Metadata fields found in an input document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectionReport {
    pub path: PathBuf,
    pub inspector: String,
    pub fields: Vec<String>,
}

impl InspectionReport {
    pub fn is_clean(&self) -> bool {
        self.fields.is_empty()
    }
}

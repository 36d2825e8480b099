//! Progress-callback trait for sanitization runs.
//!
//! Inject an [`Arc<dyn RedactionProgressCallback>`] via
//! [`crate::config::RedactionConfigBuilder::progress_callback`] to receive
//! events as the run moves through its states and as each page is redacted.
//!
//! # Example
//!
//! ```rust
//! use pdf_redact::{PipelineState, RedactionConfig, RedactionProgressCallback};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct StateLog(Mutex<Vec<PipelineState>>);
//!
//! impl RedactionProgressCallback for StateLog {
//!     fn on_state_change(&self, _from: PipelineState, to: PipelineState) {
//!         self.0.lock().unwrap().push(to);
//!     }
//! }
//!
//! let config = RedactionConfig::builder()
//!     .progress_callback(Arc::new(StateLog::default()))
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::state::PipelineState;
use std::sync::Arc;

/// Called by the orchestrator as a run progresses.
///
/// Implementations must be `Send + Sync`: page redaction runs concurrently,
/// so `on_page_redacted` may be called from several tasks at once. All
/// methods have default no-op implementations.
pub trait RedactionProgressCallback: Send + Sync {
    /// Called on every state transition, including the move to `Failed`.
    fn on_state_change(&self, from: PipelineState, to: PipelineState) {
        let _ = (from, to);
    }

    /// Called once every page has been rasterised.
    ///
    /// # Arguments
    /// * `total_pages` — number of pages in the document
    fn on_pages_rendered(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a page's regions have been painted.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — pages that carry at least one region
    /// * `regions`     — regions painted on this page
    fn on_page_redacted(&self, page_num: usize, total_pages: usize, regions: usize) {
        let _ = (page_num, total_pages, regions);
    }

    /// Called once after the output has been delivered.
    fn on_run_complete(&self, total_pages: usize, redacted_pages: usize) {
        let _ = (total_pages, redacted_pages);
    }

    /// Called once when the run fails, with the error message.
    fn on_run_failed(&self, error: &str) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RedactionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RedactionConfig`].
pub type ProgressCallback = Arc<dyn RedactionProgressCallback>;

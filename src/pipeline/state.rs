//! Run state machine.
//!
//! ```text
//! Created → Rasterizing → (Redacting)? → Reassembling → Scrubbing → Verified → Delivered
//!    └──────────┴─────────────┴──────────────┴─────────────┴──────────┴──→ Failed
//! ```
//!
//! `Delivered` and `Failed` are terminal. Any transition not drawn above is
//! rejected with [`RedactError::Internal`], which turns an orchestration bug
//! into a failed run instead of an unverified output.

use crate::error::RedactError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Lifecycle state of one sanitization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Created,
    Rasterizing,
    Redacting,
    Reassembling,
    Scrubbing,
    Verified,
    Delivered,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Delivered | PipelineState::Failed)
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Created, Rasterizing)
                | (Rasterizing, Redacting)
                | (Rasterizing, Reassembling)
                | (Redacting, Reassembling)
                | (Reassembling, Scrubbing)
                | (Scrubbing, Verified)
                | (Verified, Delivered)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Created => "created",
            PipelineState::Rasterizing => "rasterizing",
            PipelineState::Redacting => "redacting",
            PipelineState::Reassembling => "reassembling",
            PipelineState::Scrubbing => "scrubbing",
            PipelineState::Verified => "verified",
            PipelineState::Delivered => "delivered",
            PipelineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A collaborator call made by the orchestrator; used to label timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Rasterize,
    Redact,
    Reassemble,
    Strip,
    Inspect,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Rasterize => "rasterization",
            Stage::Redact => "redaction",
            Stage::Reassemble => "reassembly",
            Stage::Strip => "metadata strip",
            Stage::Inspect => "metadata inspection",
        };
        f.write_str(s)
    }
}

/// Records every state a run passes through.
#[derive(Debug, Clone)]
pub struct StateTracker {
    current: PipelineState,
    history: Vec<PipelineState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            current: PipelineState::Created,
            history: vec![PipelineState::Created],
        }
    }
}

impl StateTracker {
    pub fn current(&self) -> PipelineState {
        self.current
    }

    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Move to `next`, rejecting edges the state machine does not have.
    pub fn advance(&mut self, next: PipelineState) -> Result<PipelineState, RedactError> {
        let prev = self.current;
        if !prev.can_transition_to(next) {
            return Err(RedactError::Internal(format!(
                "illegal pipeline transition {prev} → {next}"
            )));
        }
        debug!(from = %prev, to = %next, "pipeline transition");
        self.current = next;
        self.history.push(next);
        Ok(prev)
    }

    /// Move to `Failed` unless already terminal. Returns the state that failed.
    pub fn fail(&mut self) -> Option<PipelineState> {
        let prev = self.current;
        if prev.is_terminal() {
            return None;
        }
        self.current = PipelineState::Failed;
        self.history.push(PipelineState::Failed);
        Some(prev)
    }
}

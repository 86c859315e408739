//! Typed error hierarchy for the convoy orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `SessionError` — external-tool invocation failures
//! - `OrchestratorError` — stage execution and phase-gate failures
//! - `ModeError` — workflow-mode entry and transition failures

use thiserror::Error;

use crate::modes::Mode;
use crate::session::SessionDiagnostics;

/// Errors from the session manager (external-tool invocation).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("External tool `{command}` not found or not responding to a version probe")]
    ToolNotFound { command: String },

    #[error(
        "Authentication check failed: expected marker {marker:?} in tool output, got {stdout_excerpt:?}"
    )]
    AuthenticationFailed {
        marker: String,
        stdout_excerpt: String,
    },

    #[error("Invocation timed out after {elapsed_ms}ms (budget {budget_ms}ms)")]
    Timeout { elapsed_ms: u64, budget_ms: u64 },

    #[error("All {attempts} attempts exhausted\n{diagnostics}")]
    Exhausted {
        attempts: u32,
        diagnostics: Box<SessionDiagnostics>,
    },

    #[error("Failed to spawn tool process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("I/O error while talking to tool process: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a stage-orchestrated execution.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(
        "Stage {index} ({name}) did not fully complete: {incomplete} task(s) not completed ({failed} failed)"
    )]
    PhaseGateFailed {
        index: usize,
        name: String,
        incomplete: usize,
        failed: usize,
    },

    #[error("Execution stopped by caller")]
    Stopped,

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Errors from the mode state machine.
#[derive(Debug, Error)]
pub enum ModeError {
    #[error("Mode {mode} refused entry: {reason}")]
    EntryRefused { mode: Mode, reason: String },

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

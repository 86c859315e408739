//! The mode state machine.
//!
//! Holds exactly one current mode, its success criteria, and an append-only
//! transition history. The machine is an explicit context struct — nothing
//! here is global — so independent runs (and tests) cannot interfere.
//!
//! Transitions are never vetoed: the recommended-successor graph is advisory,
//! and `switch_to` accepts any target on demand. Entry guards apply only when
//! an execution is started.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assess::ProjectAssessor;
use crate::errors::ModeError;
use crate::modes::criteria::{SuccessCriterion, default_criteria};
use crate::modes::Mode;
use crate::orchestrator::engine::{StageOrchestrator, StopHandle};
use crate::orchestrator::task::Execution;

/// One recorded transition. Append-only; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Mode,
    pub to: Mode,
    pub reason: String,
    /// Descriptions of the criteria satisfied at transition time.
    pub satisfied_criteria: Vec<String>,
    pub at: DateTime<Utc>,
}

/// The state machine: current mode pointer, criteria, transition history.
pub struct ModeMachine {
    project_dir: PathBuf,
    current: Mode,
    entered_at: DateTime<Utc>,
    history: Vec<TransitionRecord>,
    criteria: Vec<SuccessCriterion>,
    /// Stop handle of the active execution's orchestrator, if one started.
    active_stop: Option<StopHandle>,
}

impl ModeMachine {
    pub fn new(project_dir: &Path, initial: Mode) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            current: initial,
            entered_at: Utc::now(),
            history: Vec::new(),
            criteria: default_criteria(initial),
            active_stop: None,
        }
    }

    pub fn current(&self) -> Mode {
        self.current
    }

    pub fn entered_at(&self) -> DateTime<Utc> {
        self.entered_at
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub fn criteria(&self) -> &[SuccessCriterion] {
        &self.criteria
    }

    /// Operator toggle for a manual criterion. Returns false if no criterion
    /// has the given id.
    pub fn mark_criterion(&mut self, id: &str) -> bool {
        match self.criteria.iter_mut().find(|c| c.id == id) {
            Some(criterion) => {
                criterion.mark_completed();
                true
            }
            None => false,
        }
    }

    /// Switch to any target mode on demand. Stops the active execution (if
    /// any), appends a transition record, and resets the mode clock. There is
    /// no hidden veto.
    pub fn switch_to(&mut self, target: Mode, reason: &str) -> &TransitionRecord {
        if let Some(stop) = self.active_stop.take() {
            stop.trigger();
        }

        let satisfied = self
            .criteria
            .iter()
            .filter(|c| c.completed)
            .map(|c| c.description.clone())
            .collect();
        let record = TransitionRecord {
            from: self.current,
            to: target,
            reason: reason.to_string(),
            satisfied_criteria: satisfied,
            at: Utc::now(),
        };
        tracing::info!(from = %record.from, to = %record.to, reason, "mode switch");

        self.history.push(record);
        self.current = target;
        self.entered_at = Utc::now();
        self.criteria = default_criteria(target);
        self.history.last().expect("record just pushed")
    }

    /// Entry guard for the current mode. Completion refuses to start when the
    /// project shows no partial-work markers — there is nothing to complete.
    pub fn validate_entry(&self) -> Result<(), ModeError> {
        match self.current {
            Mode::Completion => {
                let scan = ProjectAssessor::with_defaults().partial_work_markers(&self.project_dir);
                if scan.matches == 0 {
                    Err(ModeError::EntryRefused {
                        mode: self.current,
                        reason: "no partial-work markers found in the project".to_string(),
                    })
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Build an execution for the current mode via the orchestrator. The
    /// mode's entry guard runs first; on refusal no execution is created.
    /// The caller drives the returned execution with `StageOrchestrator::run`.
    pub fn start_execution(
        &mut self,
        orchestrator: &StageOrchestrator,
    ) -> Result<Execution, ModeError> {
        self.validate_entry()?;
        let plan = self.current.stage_plan();
        let policy = self.current.policy();
        let execution = orchestrator.initialize(self.current, &policy, &plan);
        self.active_stop = Some(orchestrator.stop_handle());
        Ok(execution)
    }

    /// Evaluate every criterion (running validators where present). True only
    /// when all required criteria resolve.
    pub async fn check_completion(&mut self) -> bool {
        let mut all_required = true;
        for criterion in &mut self.criteria {
            let done = criterion.evaluate(&self.project_dir).await;
            if criterion.required && !done {
                all_required = false;
            }
        }
        all_required
    }

    /// The static successor list when the completion check passes; otherwise
    /// stay put.
    pub async fn recommended_next(&mut self) -> Vec<Mode> {
        if self.check_completion().await {
            self.current.profile().recommended_next.to_vec()
        } else {
            vec![self.current]
        }
    }
}

/// Append-only transition history on disk, one pipe-delimited line per
/// transition: `from|to|reason|timestamp`.
pub struct HistoryLog {
    path: PathBuf,
}

/// One parsed history line.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub from: Mode,
    pub to: Mode,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl HistoryLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn append(&self, record: &TransitionRecord) -> Result<()> {
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create history directory")?;
        }
        let line = format!(
            "{}|{}|{}|{}\n",
            record.from,
            record.to,
            record.reason.replace('|', "/"),
            record.at.to_rfc3339()
        );
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open history file")?
            .write_all(line.as_bytes())
            .context("Failed to write history entry")?;
        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content =
            std::fs::read_to_string(&self.path).context("Failed to read history file")?;
        let entries = content
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.splitn(4, '|').collect();
                if parts.len() != 4 {
                    return None;
                }
                Some(HistoryEntry {
                    from: parts[0].parse().ok()?,
                    to: parts[1].parse().ok()?,
                    reason: parts[2].to_string(),
                    at: DateTime::parse_from_rfc3339(parts[3])
                        .ok()?
                        .with_timezone(&Utc),
                })
            })
            .collect();
        Ok(entries)
    }
}

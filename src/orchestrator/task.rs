//! Runtime data model for an orchestrated run.
//!
//! An `Execution` owns an ordered list of `Stage`s; each stage owns an
//! ordered list of `Task`s. One task maps to exactly one external-tool
//! invocation (with its own retries inside the session manager).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::modes::Mode;

/// Error message applied to running tasks when a run is stopped externally.
pub const STOPPED_BY_CALLER: &str = "stopped by caller";

/// Lifecycle of a task, stage, or execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Terminal states — no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Policy lists a task was created under. Copied at creation time so later
/// policy edits cannot retroactively alter an in-flight task's contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPolicy {
    pub guard_questions: Vec<String>,
    pub allowed_actions: Vec<String>,
    pub forbidden_actions: Vec<String>,
}

/// One unit of work mapped to one external-tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    /// Ordinal of the owning stage within the execution.
    pub stage_index: usize,
    /// Workflow mode the task was created under.
    pub mode: Mode,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Progress percentage, 0–100.
    pub progress: u8,
    /// Accumulated output lines from the tool.
    pub output: Vec<String>,
    pub error: Option<String>,
    pub policy: TaskPolicy,
    /// Per-task instruction override; when absent the stage instruction
    /// table supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    /// Work items sliced off a shared list for this task to address.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub work_items: Vec<String>,
}

impl Task {
    pub fn new(name: &str, stage_index: usize, mode: Mode, policy: TaskPolicy) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            stage_index,
            mode,
            status: RunStatus::Pending,
            started_at: None,
            finished_at: None,
            progress: 0,
            output: Vec::new(),
            error: None,
            policy,
            instruction: None,
            work_items: Vec::new(),
        }
    }

    pub fn mark_running(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self.progress = 0;
    }

    pub fn mark_completed(&mut self) {
        self.status = RunStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.progress = 100;
    }

    pub fn mark_failed(&mut self, error: &str) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.to_string());
    }

    /// Append raw tool output. Only legal before the final transition.
    pub fn append_output(&mut self, line: &str) {
        if !self.status.is_terminal() {
            self.output.push(line.to_string());
        }
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// An ordered batch of tasks that must all complete before the next stage
/// may begin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub index: usize,
    pub name: String,
    pub status: RunStatus,
    pub tasks: Vec<Task>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Path of the generated stage report, when one was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<std::path::PathBuf>,
    /// Count of tasks that ended `failed`, recorded even when the stage is
    /// marked completed under best-effort policy.
    pub failed_count: usize,
}

impl Stage {
    pub fn new(index: usize, name: &str, tasks: Vec<Task>) -> Self {
        Self {
            index,
            name: name.to_string(),
            status: RunStatus::Pending,
            tasks,
            started_at: None,
            finished_at: None,
            report_path: None,
            failed_count: 0,
        }
    }

    /// True iff every task reached `completed` (a failed task forces false).
    pub fn fully_completed(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| t.status == RunStatus::Completed)
    }

    /// True iff every task reached a terminal status.
    pub fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn incomplete_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status != RunStatus::Completed)
            .count()
    }
}

/// One orchestration run. Owns all stages and tasks; discarded once the
/// final report is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub mode: Mode,
    pub status: RunStatus,
    pub current_stage: usize,
    pub completed_stages: Vec<usize>,
    pub stages: Vec<Stage>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Cached aggregate progress percentage; recomputed on task transitions.
    pub progress_pct: u8,
}

impl Execution {
    pub fn new(mode: Mode, stages: Vec<Stage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            status: RunStatus::Pending,
            current_stage: 0,
            completed_stages: Vec::new(),
            stages,
            started_at: Utc::now(),
            finished_at: None,
            progress_pct: 0,
        }
    }

    pub fn total_tasks(&self) -> usize {
        self.stages.iter().map(|s| s.tasks.len()).sum()
    }

    pub fn completed_tasks(&self) -> usize {
        self.stages
            .iter()
            .flat_map(|s| s.tasks.iter())
            .filter(|t| t.status == RunStatus::Completed)
            .count()
    }

    pub fn failed_tasks(&self) -> usize {
        self.stages
            .iter()
            .flat_map(|s| s.tasks.iter())
            .filter(|t| t.status == RunStatus::Failed)
            .count()
    }

    /// Recompute and cache the aggregate progress percentage.
    pub fn refresh_progress(&mut self) {
        let total = self.total_tasks();
        self.progress_pct = if total == 0 {
            100
        } else {
            ((self.completed_tasks() * 100) / total) as u8
        };
    }

    /// Read-only snapshot for status consumers (progress UIs, status lines).
    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            id: self.id,
            mode: self.mode,
            status: self.status,
            current_stage: self.current_stage,
            stage_name: self
                .stages
                .get(self.current_stage)
                .map(|s| s.name.clone())
                .unwrap_or_default(),
            progress_pct: self.progress_pct,
            tasks: self
                .stages
                .iter()
                .flat_map(|s| s.tasks.iter())
                .map(|t| (t.name.clone(), t.status))
                .collect(),
        }
    }
}

/// Read-only view of an execution, safe to hand to status consumers.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSnapshot {
    pub id: Uuid,
    pub mode: Mode,
    pub status: RunStatus,
    pub current_stage: usize,
    pub stage_name: String,
    pub progress_pct: u8,
    pub tasks: Vec<(String, RunStatus)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task(name: &str) -> Task {
        Task::new(name, 0, Mode::Build, TaskPolicy::default())
    }

    // =========================================
    // Task lifecycle
    // =========================================

    #[test]
    fn test_task_starts_pending_with_empty_output() {
        let task = make_task("t1");
        assert_eq!(task.status, RunStatus::Pending);
        assert!(task.output.is_empty());
        assert!(task.started_at.is_none());
        assert_eq!(task.progress, 0);
    }

    #[test]
    fn test_task_lifecycle_transitions() {
        let mut task = make_task("t1");
        task.mark_running();
        assert_eq!(task.status, RunStatus::Running);
        assert!(task.started_at.is_some());

        task.mark_completed();
        assert_eq!(task.status, RunStatus::Completed);
        assert_eq!(task.progress, 100);
        assert!(task.finished_at.is_some());
        assert!(task.duration().is_some());
    }

    #[test]
    fn test_task_output_append_blocked_after_terminal() {
        let mut task = make_task("t1");
        task.mark_running();
        task.append_output("line 1");
        task.mark_failed("boom");
        task.append_output("line 2");
        assert_eq!(task.output, vec!["line 1"]);
        assert_eq!(task.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_task_policy_is_snapshotted_at_creation() {
        let policy = TaskPolicy {
            guard_questions: vec!["q1".to_string()],
            allowed_actions: vec!["a1".to_string()],
            forbidden_actions: vec!["f1".to_string()],
        };
        let task = Task::new("t1", 0, Mode::Build, policy.clone());
        // The task owns its own copy; mutating the source list would not
        // reach the task.
        assert_eq!(task.policy, policy);
    }

    // =========================================
    // Stage completion semantics
    // =========================================

    #[test]
    fn test_stage_fully_completed_requires_all_completed() {
        let mut stage = Stage::new(0, "wave 1", vec![make_task("a"), make_task("b")]);
        stage.tasks[0].mark_completed();
        assert!(!stage.fully_completed());
        stage.tasks[1].mark_completed();
        assert!(stage.fully_completed());
    }

    #[test]
    fn test_stage_single_failed_task_forces_not_fully_completed() {
        let mut stage = Stage::new(0, "wave 1", vec![make_task("a"), make_task("b")]);
        stage.tasks[0].mark_completed();
        stage.tasks[1].mark_failed("nope");
        assert!(stage.all_terminal());
        assert!(!stage.fully_completed());
        assert_eq!(stage.incomplete_count(), 1);
    }

    // =========================================
    // Execution aggregates
    // =========================================

    #[test]
    fn test_execution_progress_refresh() {
        let stages = vec![
            Stage::new(0, "s1", vec![make_task("a"), make_task("b")]),
            Stage::new(1, "s2", vec![make_task("c"), make_task("d")]),
        ];
        let mut exec = Execution::new(Mode::Build, stages);
        assert_eq!(exec.total_tasks(), 4);

        exec.stages[0].tasks[0].mark_completed();
        exec.refresh_progress();
        assert_eq!(exec.progress_pct, 25);

        exec.stages[0].tasks[1].mark_completed();
        exec.stages[1].tasks[0].mark_completed();
        exec.stages[1].tasks[1].mark_completed();
        exec.refresh_progress();
        assert_eq!(exec.progress_pct, 100);
    }

    #[test]
    fn test_execution_snapshot_reflects_current_stage() {
        let stages = vec![
            Stage::new(0, "survey", vec![make_task("a")]),
            Stage::new(1, "implement", vec![make_task("b")]),
        ];
        let mut exec = Execution::new(Mode::Build, stages);
        exec.current_stage = 1;
        let snap = exec.snapshot();
        assert_eq!(snap.stage_name, "implement");
        assert_eq!(snap.tasks.len(), 2);
    }

    #[test]
    fn test_execution_serialization_roundtrip() {
        let exec = Execution::new(Mode::Validation, vec![Stage::new(0, "s", vec![make_task("a")])]);
        let json = serde_json::to_string(&exec).unwrap();
        let parsed: Execution = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, exec.id);
        assert_eq!(parsed.mode, Mode::Validation);
        assert_eq!(parsed.stages.len(), 1);
    }

    #[test]
    fn test_run_status_terminal_classification() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }
}

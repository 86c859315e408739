//! Stage orchestration engine.
//!
//! Turns a static task list into a completed `Execution`:
//! - stages run strictly in order, gated on full completion of the prior stage
//! - tasks within a stage run in concurrency-capped batches; a batch is fully
//!   awaited before the next batch starts
//! - an individual task failure is recorded but does not stop its stage;
//!   a stage that ends with any non-completed task fails the phase gate and
//!   aborts the remaining stages
//! - per-stage and aggregate reports are best-effort and never fail the run

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use futures::future::join_all;

use crate::errors::OrchestratorError;
use crate::modes::Mode;
use crate::orchestrator::report::ReportWriter;
use crate::orchestrator::task::{
    Execution, RunStatus, STOPPED_BY_CALLER, Stage, Task, TaskPolicy,
};
use crate::session::{ProgressSink, ToolInvoker};

/// Default concurrency cap for a batch.
const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Instruction used when the stage table has no entry for a task ordinal.
const GENERIC_INSTRUCTION: &str =
    "Work through your assigned items end to end. Verify each change before \
     moving on, and report anything you could not finish.";

/// Ordinal-specific instructions for the fixed reference stages. Indexed by
/// stage, then by task ordinal within the stage; missing entries fall back to
/// the generic instruction.
const STAGE_INSTRUCTIONS: &[&[&str]] = &[
    &[
        "Survey the project before changing anything and list the concrete problems you will address.",
        "Resolve build and dependency problems so the project compiles cleanly.",
        "Repair broken configuration and entry points.",
    ],
    &[
        "Implement the items assigned to you, smallest first.",
        "Implement the items assigned to you, and add a test for each.",
    ],
    &[
        "Finish partially implemented work; search for stubs and placeholders in your assigned area.",
        "Complete missing error handling on the paths you touch.",
    ],
    &[
        "Remove dead code and fix warnings in your assigned area without changing behavior.",
    ],
    &[
        "Re-verify the items previous waves claimed to fix and repair anything still broken.",
        "Run the test suite for your assigned area and fix failures.",
    ],
];

/// Specification of one task before an execution is built.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub instruction: Option<String>,
    pub work_items: Vec<String>,
}

impl TaskSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            instruction: None,
            work_items: Vec::new(),
        }
    }

    pub fn with_instruction(mut self, instruction: &str) -> Self {
        self.instruction = Some(instruction.to_string());
        self
    }

    pub fn with_work_items(mut self, items: Vec<String>) -> Self {
        self.work_items = items;
        self
    }
}

/// Specification of one stage: a name and the tasks it owns.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    pub name: String,
    pub tasks: Vec<TaskSpec>,
}

impl StageDefinition {
    pub fn new(name: &str, tasks: Vec<TaskSpec>) -> Self {
        Self {
            name: name.to_string(),
            tasks,
        }
    }
}

/// Partition a shared work list across `task_count` tasks using ceiling
/// division, so the last slice may be shorter than the others.
pub fn partition_work_items(items: &[String], task_count: usize) -> Vec<Vec<String>> {
    if task_count == 0 {
        return Vec::new();
    }
    let chunk = items.len().div_ceil(task_count).max(1);
    let mut slices: Vec<Vec<String>> = items.chunks(chunk).map(|c| c.to_vec()).collect();
    slices.resize(task_count, Vec::new());
    slices
}

/// Split task ordinals into concurrency-capped batches, preserving order.
pub fn batch_indices(task_count: usize, max_concurrent: usize) -> Vec<Vec<usize>> {
    let cap = max_concurrent.max(1);
    (0..task_count)
        .collect::<Vec<_>>()
        .chunks(cap)
        .map(|c| c.to_vec())
        .collect()
}

/// Build the fixed reference wave configuration: `stage_count` stages of
/// `tasks_per_stage` tasks, each stage partitioning the shared work list
/// across its tasks.
pub fn reference_stages(
    stage_count: usize,
    tasks_per_stage: usize,
    work_items: &[String],
) -> Vec<StageDefinition> {
    (0..stage_count)
        .map(|stage| {
            let slices = partition_work_items(work_items, tasks_per_stage);
            let tasks = (0..tasks_per_stage)
                .map(|ordinal| {
                    TaskSpec::new(&format!("Wave {} agent {}", stage + 1, ordinal + 1))
                        .with_work_items(slices[ordinal].clone())
                })
                .collect();
            StageDefinition::new(&format!("Wave {}", stage + 1), tasks)
        })
        .collect()
}

/// Instruction for a task, selected by stage and ordinal from the lookup
/// table with a generic fallback.
pub fn stage_instruction(stage_index: usize, ordinal: usize) -> &'static str {
    STAGE_INSTRUCTIONS
        .get(stage_index)
        .and_then(|stage| stage.get(ordinal))
        .copied()
        .unwrap_or(GENERIC_INSTRUCTION)
}

/// Progress events emitted to an optional observer. Purely observational.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    StageStarted {
        index: usize,
        name: String,
        total_stages: usize,
    },
    TaskStarted {
        stage: usize,
        name: String,
    },
    TaskOutput {
        stage: usize,
        name: String,
        line: String,
    },
    TaskFinished {
        stage: usize,
        name: String,
        status: RunStatus,
        error: Option<String>,
    },
    StageFinished {
        index: usize,
        name: String,
        failed: usize,
    },
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Cooperative stop flag shared between the orchestrator and its callers.
#[derive(Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Orchestrator configuration (consumed from the config layer).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum tasks started concurrently within a batch.
    pub max_concurrent: usize,
    /// Preferred report root. Unwritable roots fall back to a temp dir.
    pub output_root: std::path::PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            output_root: std::path::PathBuf::from(".convoy/reports"),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn with_output_root(mut self, root: std::path::PathBuf) -> Self {
        self.output_root = root;
        self
    }
}

/// Summary returned by a finished (or aborted) run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub success_pct: u8,
    pub report_root: Option<std::path::PathBuf>,
}

/// Drives an `Execution` through its stages via the tool invoker.
pub struct StageOrchestrator {
    invoker: Arc<dyn ToolInvoker>,
    config: OrchestratorConfig,
    stop: StopHandle,
    observer: Option<ProgressCallback>,
}

impl StageOrchestrator {
    pub fn new(invoker: Arc<dyn ToolInvoker>, config: OrchestratorConfig) -> Self {
        Self {
            invoker,
            config,
            stop: StopHandle::new(),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: ProgressCallback) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Handle for external cancellation (signal handlers, mode switches).
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(ref observer) = self.observer {
            observer(&event);
        }
    }

    /// Build an `Execution` from stage definitions. Every task snapshots the
    /// policy it was created under.
    pub fn initialize(
        &self,
        mode: Mode,
        policy: &TaskPolicy,
        definitions: &[StageDefinition],
    ) -> Execution {
        let stages = definitions
            .iter()
            .enumerate()
            .map(|(index, def)| {
                let tasks = def
                    .tasks
                    .iter()
                    .map(|spec| {
                        let mut task = Task::new(&spec.name, index, mode, policy.clone());
                        task.instruction = spec.instruction.clone();
                        task.work_items = spec.work_items.clone();
                        task
                    })
                    .collect();
                Stage::new(index, &def.name, tasks)
            })
            .collect();
        Execution::new(mode, stages)
    }

    /// Run every stage in order. Authentication is verified once, up front;
    /// an auth failure aborts the run before any task starts.
    pub async fn run(&self, exec: &mut Execution) -> Result<RunSummary, OrchestratorError> {
        self.invoker.preflight().await?;

        exec.status = RunStatus::Running;
        let reports = ReportWriter::new(&self.config.output_root, exec.id);

        let total_stages = exec.stages.len();
        for index in 0..total_stages {
            if self.stop.is_stopped() {
                self.fail_stopped(exec);
                reports.write_aggregate(exec);
                return Err(OrchestratorError::Stopped);
            }

            exec.current_stage = index;
            let result = self.execute_phase(exec, index).await;
            let report_path = reports.write_stage(&exec.stages[index]);
            exec.stages[index].report_path = report_path;

            if let Err(err) = result {
                self.fail_stopped(exec);
                reports.write_aggregate(exec);
                return Err(err);
            }

            // Phase gate: the run only advances past a stage in which every
            // task completed. Failures were tolerated inside the stage, but
            // they stop the run here, loudly.
            if !self.validate_phase_completion(exec, index) {
                let stage = &exec.stages[index];
                let gate = OrchestratorError::PhaseGateFailed {
                    index,
                    name: stage.name.clone(),
                    incomplete: stage.incomplete_count(),
                    failed: stage.failed_count,
                };
                tracing::error!(stage = index, error = %gate, "phase gate failed; aborting run");
                exec.status = RunStatus::Failed;
                exec.finished_at = Some(Utc::now());
                reports.write_aggregate(exec);
                return Err(gate);
            }
            exec.completed_stages.push(index);
        }

        exec.status = RunStatus::Completed;
        exec.finished_at = Some(Utc::now());
        reports.write_aggregate(exec);

        Ok(RunSummary {
            total_tasks: exec.total_tasks(),
            completed_tasks: exec.completed_tasks(),
            failed_tasks: exec.failed_tasks(),
            success_pct: exec.progress_pct,
            report_root: reports.root().map(|p| p.to_path_buf()),
        })
    }

    /// Execute one stage in concurrency-capped batches. Every task is left in
    /// a terminal status unless the run is stopped mid-stage. Task failures
    /// are recorded and tolerated here; the phase gate judges them later.
    pub async fn execute_phase(
        &self,
        exec: &mut Execution,
        index: usize,
    ) -> Result<(), OrchestratorError> {
        let total_stages = exec.stages.len();
        {
            let stage = &mut exec.stages[index];
            stage.status = RunStatus::Running;
            stage.started_at = Some(Utc::now());
            self.emit(ProgressEvent::StageStarted {
                index,
                name: stage.name.clone(),
                total_stages,
            });
            tracing::info!(stage = index, name = %stage.name, tasks = stage.tasks.len(), "stage started");
        }

        let task_count = exec.stages[index].tasks.len();
        let batches = batch_indices(task_count, self.config.max_concurrent);

        let mut stopped = false;
        for batch in batches {
            if self.stop.is_stopped() {
                stopped = true;
                break;
            }

            // Mark the whole batch running before racing it.
            let mut jobs = Vec::with_capacity(batch.len());
            for &ordinal in &batch {
                let stage = &mut exec.stages[index];
                let task = &mut stage.tasks[ordinal];
                task.mark_running();
                self.emit(ProgressEvent::TaskStarted {
                    stage: index,
                    name: task.name.clone(),
                });
                let prompt = self.build_prompt(task, ordinal);
                jobs.push((ordinal, task.name.clone(), prompt));
            }

            // Tasks in the same batch race independently; the batch is fully
            // awaited before the next one starts.
            let futures: Vec<_> = jobs
                .into_iter()
                .map(|(ordinal, name, prompt)| {
                    let invoker = Arc::clone(&self.invoker);
                    let observer = self.observer.clone();
                    async move {
                        let sink: Option<ProgressSink> = observer.map(|obs| {
                            let name = name.clone();
                            Arc::new(move |line: &str| {
                                obs(&ProgressEvent::TaskOutput {
                                    stage: index,
                                    name: name.clone(),
                                    line: line.to_string(),
                                });
                            }) as ProgressSink
                        });
                        (ordinal, invoker.invoke(&prompt, sink).await)
                    }
                })
                .collect();
            let results = join_all(futures).await;

            for (ordinal, result) in results {
                let stage = &mut exec.stages[index];
                let task = &mut stage.tasks[ordinal];
                match result {
                    Ok(output) => {
                        for line in output.stdout.lines() {
                            task.append_output(line);
                        }
                        task.mark_completed();
                    }
                    Err(err) => {
                        task.append_output(&err.to_string());
                        task.mark_failed(&err.to_string());
                    }
                }
                self.emit(ProgressEvent::TaskFinished {
                    stage: index,
                    name: task.name.clone(),
                    status: task.status,
                    error: task.error.clone(),
                });
            }
            exec.refresh_progress();
        }

        let stage = &mut exec.stages[index];
        stage.failed_count = stage
            .tasks
            .iter()
            .filter(|t| t.status == RunStatus::Failed)
            .count();
        stage.finished_at = Some(Utc::now());
        // Best effort, audit later: the stage is terminal once every task is,
        // independent of individual failures.
        stage.status = if stage.all_terminal() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        self.emit(ProgressEvent::StageFinished {
            index,
            name: stage.name.clone(),
            failed: stage.failed_count,
        });
        tracing::info!(
            stage = index,
            failed = stage.failed_count,
            status = %stage.status,
            "stage finished"
        );

        if stopped {
            self.fail_stopped(exec);
            return Err(OrchestratorError::Stopped);
        }
        Ok(())
    }

    /// The phase gate: true iff every task in the stage is `completed`.
    pub fn validate_phase_completion(&self, exec: &Execution, index: usize) -> bool {
        exec.stages
            .get(index)
            .map(Stage::fully_completed)
            .unwrap_or(false)
    }

    /// Mark the execution and any still-running task in the current stage as
    /// failed with the fixed stop message. In-flight subprocesses are not
    /// forcibly killed here; session timeouts bound them.
    fn fail_stopped(&self, exec: &mut Execution) {
        if exec.status.is_terminal() {
            return;
        }
        exec.status = RunStatus::Failed;
        exec.finished_at = Some(Utc::now());
        if let Some(stage) = exec.stages.get_mut(exec.current_stage) {
            for task in &mut stage.tasks {
                if task.status == RunStatus::Running {
                    task.mark_failed(STOPPED_BY_CALLER);
                }
            }
        }
    }

    /// Build the policy-aware prompt for a task: instruction (per-task or
    /// from the stage table), assigned work items, then the owning mode's
    /// guard questions and action policy.
    fn build_prompt(&self, task: &Task, ordinal: usize) -> String {
        let instruction = task
            .instruction
            .clone()
            .unwrap_or_else(|| stage_instruction(task.stage_index, ordinal).to_string());

        let mut prompt = format!(
            "## TASK\n{name}\n\n{instruction}\n",
            name = task.name,
            instruction = instruction
        );

        if !task.work_items.is_empty() {
            prompt.push_str("\n## ASSIGNED ITEMS\n");
            for item in &task.work_items {
                prompt.push_str(&format!("- {}\n", item));
            }
        }

        if !task.policy.guard_questions.is_empty() {
            prompt.push_str("\n## SELF-CHECKS\nBefore finishing, answer honestly:\n");
            for question in &task.policy.guard_questions {
                prompt.push_str(&format!("- {}\n", question));
            }
        }

        if !task.policy.allowed_actions.is_empty() {
            prompt.push_str("\n## ALLOWED ACTIONS\n");
            for action in &task.policy.allowed_actions {
                prompt.push_str(&format!("- {}\n", action));
            }
        }

        if !task.policy.forbidden_actions.is_empty() {
            prompt.push_str("\n## FORBIDDEN ACTIONS\nDo not:\n");
            for action in &task.policy.forbidden_actions {
                prompt.push_str(&format!("- {}\n", action));
            }
        }

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SessionError;
    use crate::session::SessionOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Test invoker: records prompts and concurrency, optionally failing
    /// prompts that contain a trigger string.
    struct MockInvoker {
        prompts: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_on: Option<String>,
        delay: Duration,
    }

    impl MockInvoker {
        fn new() -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                fail_on: None,
                delay: Duration::from_millis(10),
            }
        }

        fn failing_on(trigger: &str) -> Self {
            let mut mock = Self::new();
            mock.fail_on = Some(trigger.to_string());
            mock
        }
    }

    #[async_trait]
    impl ToolInvoker for MockInvoker {
        async fn invoke(
            &self,
            prompt: &str,
            _progress: Option<ProgressSink>,
        ) -> Result<SessionOutput, SessionError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());

            if let Some(ref trigger) = self.fail_on {
                if prompt.contains(trigger) {
                    return Err(SessionError::Timeout {
                        elapsed_ms: 1,
                        budget_ms: 1,
                    });
                }
            }
            Ok(SessionOutput {
                stdout: "done\n".to_string(),
                stderr: String::new(),
                exit_code: 0,
                duration: self.delay,
            })
        }
    }

    fn orchestrator_with(
        mock: Arc<MockInvoker>,
        max_concurrent: usize,
    ) -> (StageOrchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig::default()
            .with_max_concurrent(max_concurrent)
            .with_output_root(dir.path().join("reports"));
        (StageOrchestrator::new(mock, config), dir)
    }

    fn five_task_stage() -> Vec<StageDefinition> {
        vec![StageDefinition::new(
            "wave 1",
            (1..=5)
                .map(|i| TaskSpec::new(&format!("agent {}", i)))
                .collect(),
        )]
    }

    // =========================================
    // Pure helpers
    // =========================================

    #[test]
    fn test_batch_indices_five_tasks_cap_two_gives_three_batches() {
        let batches = batch_indices(5, 2);
        assert_eq!(batches, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn test_batch_indices_zero_cap_treated_as_one() {
        assert_eq!(batch_indices(2, 0), vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_partition_work_items_ceiling_division() {
        let items: Vec<String> = (0..10).map(|i| format!("item-{}", i)).collect();
        let slices = partition_work_items(&items, 4);
        assert_eq!(slices.len(), 4);
        assert_eq!(slices[0].len(), 3);
        assert_eq!(slices[1].len(), 3);
        assert_eq!(slices[2].len(), 3);
        assert_eq!(slices[3].len(), 1);
    }

    #[test]
    fn test_partition_work_items_fewer_items_than_tasks() {
        let items: Vec<String> = (0..2).map(|i| format!("item-{}", i)).collect();
        let slices = partition_work_items(&items, 5);
        assert_eq!(slices.len(), 5);
        assert_eq!(slices[0].len(), 1);
        assert_eq!(slices[1].len(), 1);
        assert!(slices[2].is_empty());
    }

    #[test]
    fn test_reference_stages_shape() {
        let items: Vec<String> = (0..50).map(|i| format!("diag-{}", i)).collect();
        let defs = reference_stages(5, 25, &items);
        assert_eq!(defs.len(), 5);
        for def in &defs {
            assert_eq!(def.tasks.len(), 25);
        }
        // Ceiling division: 50 items over 25 tasks is 2 each.
        assert_eq!(defs[0].tasks[0].work_items.len(), 2);
    }

    #[test]
    fn test_stage_instruction_falls_back_to_generic() {
        assert_ne!(stage_instruction(0, 0), GENERIC_INSTRUCTION);
        assert_eq!(stage_instruction(0, 99), GENERIC_INSTRUCTION);
        assert_eq!(stage_instruction(99, 0), GENERIC_INSTRUCTION);
    }

    // =========================================
    // Stage execution
    // =========================================

    #[tokio::test]
    async fn test_execute_phase_respects_concurrency_cap() {
        let mock = Arc::new(MockInvoker::new());
        let (orch, _dir) = orchestrator_with(Arc::clone(&mock), 2);
        let mut exec = orch.initialize(Mode::Build, &TaskPolicy::default(), &five_task_stage());

        orch.execute_phase(&mut exec, 0).await.unwrap();

        assert_eq!(mock.prompts.lock().unwrap().len(), 5);
        assert!(mock.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert!(exec.stages[0].all_terminal());
    }

    #[tokio::test]
    async fn test_execute_phase_leaves_all_tasks_terminal_despite_failures() {
        let mock = Arc::new(MockInvoker::failing_on("agent 3"));
        let (orch, _dir) = orchestrator_with(Arc::clone(&mock), 2);
        let mut exec = orch.initialize(Mode::Build, &TaskPolicy::default(), &five_task_stage());

        orch.execute_phase(&mut exec, 0).await.unwrap();

        let stage = &exec.stages[0];
        assert!(stage.all_terminal());
        assert_eq!(stage.failed_count, 1);
        assert_eq!(stage.status, RunStatus::Completed);
        assert!(!stage.fully_completed());
        let failed: Vec<_> = stage
            .tasks
            .iter()
            .filter(|t| t.status == RunStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "agent 3");
        assert!(failed[0].error.is_some());
    }

    #[tokio::test]
    async fn test_validate_phase_completion_single_failure_forces_false() {
        let mock = Arc::new(MockInvoker::failing_on("agent 5"));
        let (orch, _dir) = orchestrator_with(Arc::clone(&mock), 3);
        let mut exec = orch.initialize(Mode::Build, &TaskPolicy::default(), &five_task_stage());

        orch.execute_phase(&mut exec, 0).await.unwrap();
        assert!(!orch.validate_phase_completion(&exec, 0));

        let mock_ok = Arc::new(MockInvoker::new());
        let (orch_ok, _dir_ok) = orchestrator_with(Arc::clone(&mock_ok), 3);
        let mut exec_ok =
            orch_ok.initialize(Mode::Build, &TaskPolicy::default(), &five_task_stage());
        orch_ok.execute_phase(&mut exec_ok, 0).await.unwrap();
        assert!(orch_ok.validate_phase_completion(&exec_ok, 0));
    }

    #[tokio::test]
    async fn test_run_aborts_remaining_stages_on_gate_failure() {
        let mock = Arc::new(MockInvoker::failing_on("bad"));
        let (orch, _dir) = orchestrator_with(Arc::clone(&mock), 2);
        let defs = vec![
            StageDefinition::new(
                "first",
                vec![TaskSpec::new("good task"), TaskSpec::new("bad task")],
            ),
            StageDefinition::new("second", vec![TaskSpec::new("never runs")]),
        ];
        let mut exec = orch.initialize(Mode::Build, &TaskPolicy::default(), &defs);

        let err = orch.run(&mut exec).await.unwrap_err();
        match err {
            OrchestratorError::PhaseGateFailed {
                index,
                incomplete,
                failed,
                ..
            } => {
                assert_eq!(index, 0);
                assert_eq!(incomplete, 1);
                assert_eq!(failed, 1);
            }
            other => panic!("Expected PhaseGateFailed, got {other:?}"),
        }
        assert_eq!(exec.status, RunStatus::Failed);
        // The second stage never started.
        assert_eq!(exec.stages[1].status, RunStatus::Pending);
        assert_eq!(exec.stages[1].tasks[0].status, RunStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_completes_and_summarizes() {
        let mock = Arc::new(MockInvoker::new());
        let (orch, _dir) = orchestrator_with(Arc::clone(&mock), 2);
        let defs = vec![
            StageDefinition::new("first", vec![TaskSpec::new("a"), TaskSpec::new("b")]),
            StageDefinition::new("second", vec![TaskSpec::new("c")]),
        ];
        let mut exec = orch.initialize(Mode::Validation, &TaskPolicy::default(), &defs);

        let summary = orch.run(&mut exec).await.unwrap();
        assert_eq!(summary.total_tasks, 3);
        assert_eq!(summary.completed_tasks, 3);
        assert_eq!(summary.failed_tasks, 0);
        assert_eq!(summary.success_pct, 100);
        assert_eq!(exec.status, RunStatus::Completed);
        assert_eq!(exec.completed_stages, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_pre_triggered_stop_fails_run_immediately() {
        let mock = Arc::new(MockInvoker::new());
        let (orch, _dir) = orchestrator_with(Arc::clone(&mock), 2);
        let mut exec = orch.initialize(Mode::Build, &TaskPolicy::default(), &five_task_stage());

        orch.stop_handle().trigger();
        let err = orch.run(&mut exec).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Stopped));
        assert_eq!(exec.status, RunStatus::Failed);
        assert_eq!(mock.prompts.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_prompt_embeds_policy_lists() {
        let mock = Arc::new(MockInvoker::new());
        let (orch, _dir) = orchestrator_with(Arc::clone(&mock), 1);
        let policy = TaskPolicy {
            guard_questions: vec!["Is the change tested?".to_string()],
            allowed_actions: vec!["write tests".to_string()],
            forbidden_actions: vec!["deploy".to_string()],
        };
        let defs = vec![StageDefinition::new(
            "wave",
            vec![
                TaskSpec::new("agent 1")
                    .with_instruction("Fix the login flow.")
                    .with_work_items(vec!["login times out".to_string()]),
            ],
        )];
        let mut exec = orch.initialize(Mode::Completion, &policy, &defs);
        orch.execute_phase(&mut exec, 0).await.unwrap();

        let prompts = mock.prompts.lock().unwrap();
        let prompt = &prompts[0];
        assert!(prompt.contains("Fix the login flow."));
        assert!(prompt.contains("login times out"));
        assert!(prompt.contains("Is the change tested?"));
        assert!(prompt.contains("write tests"));
        assert!(prompt.contains("deploy"));
        assert!(prompt.contains("## FORBIDDEN ACTIONS"));
    }

    #[tokio::test]
    async fn test_task_output_appended_from_tool_stdout() {
        let mock = Arc::new(MockInvoker::new());
        let (orch, _dir) = orchestrator_with(Arc::clone(&mock), 1);
        let defs = vec![StageDefinition::new("wave", vec![TaskSpec::new("agent 1")])];
        let mut exec = orch.initialize(Mode::Build, &TaskPolicy::default(), &defs);
        orch.execute_phase(&mut exec, 0).await.unwrap();
        assert_eq!(exec.stages[0].tasks[0].output, vec!["done"]);
        assert_eq!(exec.stages[0].tasks[0].progress, 100);
    }

    #[tokio::test]
    async fn test_observer_receives_stage_and_task_events() {
        let mock = Arc::new(MockInvoker::new());
        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let (orch, _dir) = orchestrator_with(Arc::clone(&mock), 2);
        let orch = orch.with_observer(Arc::new(
            move |event: &ProgressEvent| {
                let tag = match event {
                    ProgressEvent::StageStarted { .. } => "stage_started",
                    ProgressEvent::TaskStarted { .. } => "task_started",
                    ProgressEvent::TaskOutput { .. } => "task_output",
                    ProgressEvent::TaskFinished { .. } => "task_finished",
                    ProgressEvent::StageFinished { .. } => "stage_finished",
                };
                sink.lock().unwrap().push(tag.to_string());
            },
        ));
        let defs = vec![StageDefinition::new(
            "wave",
            vec![TaskSpec::new("a"), TaskSpec::new("b")],
        )];
        let mut exec = orch.initialize(Mode::Build, &TaskPolicy::default(), &defs);
        orch.execute_phase(&mut exec, 0).await.unwrap();

        let seen = events.lock().unwrap();
        assert_eq!(seen.iter().filter(|t| *t == "stage_started").count(), 1);
        assert_eq!(seen.iter().filter(|t| *t == "task_started").count(), 2);
        assert_eq!(seen.iter().filter(|t| *t == "task_finished").count(), 2);
        assert_eq!(seen.iter().filter(|t| *t == "stage_finished").count(), 1);
    }
}

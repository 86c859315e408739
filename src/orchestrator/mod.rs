pub mod engine;
pub mod report;
pub mod task;

pub use engine::{
    OrchestratorConfig, ProgressCallback, ProgressEvent, RunSummary, StageDefinition,
    StageOrchestrator, StopHandle, TaskSpec, batch_indices, partition_work_items,
    reference_stages, stage_instruction,
};
pub use report::ReportWriter;
pub use task::{Execution, ExecutionSnapshot, RunStatus, Stage, Task, TaskPolicy};

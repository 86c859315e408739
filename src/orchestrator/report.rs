//! Markdown report generation for orchestrated runs.
//!
//! Reporting is best effort and must never cost task-level work: an
//! unwritable output root falls back to a process-temp directory, and if
//! that also fails the writer goes inert. Write errors are logged and
//! swallowed.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::orchestrator::task::{Execution, RunStatus, Stage, Task};
use crate::util::{format_duration, truncate_excerpt};

/// Longest output excerpt included per task in a stage report.
const OUTPUT_EXCERPT_CHARS: usize = 240;

/// Writes one markdown file per stage under a stage-named subdirectory of a
/// run-scoped root, plus one aggregate file at the root.
pub struct ReportWriter {
    root: Option<PathBuf>,
}

impl ReportWriter {
    /// Resolve the run-scoped report root. Tries the preferred root first,
    /// then the OS temp directory; if neither is writable, reporting is
    /// disabled for the run.
    pub fn new(preferred_root: &Path, run_id: Uuid) -> Self {
        let run_dir = format!("run-{}", &run_id.simple().to_string()[..8]);

        let preferred = preferred_root.join(&run_dir);
        if fs::create_dir_all(&preferred).is_ok() {
            return Self {
                root: Some(preferred),
            };
        }

        let fallback = std::env::temp_dir().join("convoy-reports").join(&run_dir);
        tracing::warn!(
            preferred = %preferred_root.display(),
            fallback = %fallback.display(),
            "report root not writable; using temp fallback"
        );
        if fs::create_dir_all(&fallback).is_ok() {
            return Self {
                root: Some(fallback),
            };
        }

        tracing::warn!("temp fallback not writable; reports disabled for this run");
        Self { root: None }
    }

    /// The resolved report root, if reporting is enabled.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Write the per-stage report. Returns the path on success.
    pub fn write_stage(&self, stage: &Stage) -> Option<PathBuf> {
        let root = self.root.as_ref()?;
        let dir = root.join(format!("stage-{:02}-{}", stage.index + 1, slugify(&stage.name)));
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!(error = %e, "failed to create stage report directory");
            return None;
        }

        let path = dir.join("report.md");
        match fs::write(&path, render_stage(stage)) {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to write stage report");
                None
            }
        }
    }

    /// Write the aggregate run report at the report root.
    pub fn write_aggregate(&self, exec: &Execution) -> Option<PathBuf> {
        let root = self.root.as_ref()?;
        let path = root.join("summary.md");
        match fs::write(&path, render_aggregate(exec)) {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to write aggregate report");
                None
            }
        }
    }
}

fn slugify(name: &str) -> String {
    let mut slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    while slug.contains("--") {
        slug = slug.replace("--", "-");
    }
    slug.trim_matches('-').to_string()
}

fn span(start: Option<chrono::DateTime<chrono::Utc>>, end: Option<chrono::DateTime<chrono::Utc>>) -> String {
    match (start, end) {
        (Some(start), Some(end)) => {
            let ms = (end - start).num_milliseconds().max(0) as u64;
            format_duration(std::time::Duration::from_millis(ms))
        }
        _ => "-".to_string(),
    }
}

fn render_task_row(task: &Task) -> String {
    let excerpt = truncate_excerpt(&task.output.join(" "), OUTPUT_EXCERPT_CHARS);
    format!(
        "| {} | {} | {} | {} | {} |\n",
        task.name,
        task.status,
        span(task.started_at, task.finished_at),
        task.error.as_deref().unwrap_or("-"),
        if excerpt.is_empty() { "-".to_string() } else { excerpt },
    )
}

fn render_stage(stage: &Stage) -> String {
    let mut out = format!(
        "# Stage {}: {}\n\n- Status: {}\n- Duration: {}\n- Tasks: {} ({} failed)\n\n",
        stage.index + 1,
        stage.name,
        stage.status,
        span(stage.started_at, stage.finished_at),
        stage.tasks.len(),
        stage.failed_count,
    );
    out.push_str("| Task | Status | Duration | Error | Output |\n");
    out.push_str("|------|--------|----------|-------|--------|\n");
    for task in &stage.tasks {
        out.push_str(&render_task_row(task));
    }
    out
}

fn render_aggregate(exec: &Execution) -> String {
    let total = exec.total_tasks();
    let completed = exec.completed_tasks();
    let pct = if total == 0 {
        100
    } else {
        (completed * 100) / total
    };
    let mut out = format!(
        "# Run {}\n\n- Mode: {}\n- Status: {}\n- Duration: {}\n- Tasks: {} total, {} completed, {} failed\n- Success: {}%\n\n## Stages\n\n",
        exec.id,
        exec.mode,
        exec.status,
        span(Some(exec.started_at), exec.finished_at),
        total,
        completed,
        exec.failed_tasks(),
        pct,
    );
    out.push_str("| # | Stage | Status | Tasks | Failed | Duration |\n");
    out.push_str("|---|-------|--------|-------|--------|----------|\n");
    for stage in &exec.stages {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            stage.index + 1,
            stage.name,
            stage.status,
            stage.tasks.len(),
            stage.failed_count,
            span(stage.started_at, stage.finished_at),
        ));
    }
    if exec.status == RunStatus::Failed {
        out.push_str(
            "\nThe run stopped before all stages fully completed; see the last stage report for details.\n",
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::Mode;
    use crate::orchestrator::task::TaskPolicy;
    use tempfile::tempdir;

    fn sample_execution() -> Execution {
        let mut tasks = vec![
            Task::new("agent 1", 0, Mode::Build, TaskPolicy::default()),
            Task::new("agent 2", 0, Mode::Build, TaskPolicy::default()),
        ];
        tasks[0].mark_running();
        tasks[0].append_output("all good");
        tasks[0].mark_completed();
        tasks[1].mark_running();
        tasks[1].mark_failed("timed out");
        let mut stage = Stage::new(0, "First wave", tasks);
        stage.status = RunStatus::Completed;
        stage.failed_count = 1;
        let mut exec = Execution::new(Mode::Build, vec![stage]);
        exec.status = RunStatus::Failed;
        exec.refresh_progress();
        exec
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("First wave"), "first-wave");
        assert_eq!(slugify("Wave 3 — verify!"), "wave-3-verify");
    }

    #[test]
    fn test_stage_report_written_under_stage_subdirectory() {
        let dir = tempdir().unwrap();
        let exec = sample_execution();
        let writer = ReportWriter::new(dir.path(), exec.id);

        let path = writer.write_stage(&exec.stages[0]).unwrap();
        assert!(path.ends_with("stage-01-first-wave/report.md"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("# Stage 1: First wave"));
        assert!(content.contains("agent 1"));
        assert!(content.contains("timed out"));
        assert!(content.contains("all good"));
    }

    #[test]
    fn test_aggregate_report_fields() {
        let dir = tempdir().unwrap();
        let exec = sample_execution();
        let writer = ReportWriter::new(dir.path(), exec.id);

        let path = writer.write_aggregate(&exec).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("2 total, 1 completed, 1 failed"));
        assert!(content.contains("Success: 50%"));
        assert!(content.contains("First wave"));
    }

    #[test]
    fn test_unwritable_root_falls_back_to_temp() {
        let dir = tempdir().unwrap();
        // A file where a directory is needed makes the preferred root unwritable.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "not a directory").unwrap();
        let exec = sample_execution();

        let writer = ReportWriter::new(&blocker.join("reports"), exec.id);
        let root = writer.root().expect("fallback root should resolve").to_path_buf();
        assert!(root.starts_with(std::env::temp_dir()));

        let path = writer.write_aggregate(&exec).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Success: 50%"));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_run_scoped_roots_are_distinct_per_run() {
        let dir = tempdir().unwrap();
        let a = ReportWriter::new(dir.path(), Uuid::new_v4());
        let b = ReportWriter::new(dir.path(), Uuid::new_v4());
        assert_ne!(a.root().unwrap(), b.root().unwrap());
    }
}

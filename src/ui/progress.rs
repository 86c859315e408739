//! Terminal UI for a convoy run, rendered via `indicatif` progress bars.
//!
//! Three bars are stacked vertically:
//! - Stage bar — tracks how many stages have completed
//! - Task bar — spinner with the task currently in flight
//! - Tally bar — running completed/failed counts for the run
//!
//! The UI is a passive observer of orchestrator progress events; losing it
//! never affects the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::orchestrator::engine::{ProgressCallback, ProgressEvent, RunSummary};
use crate::orchestrator::task::RunStatus;
use crate::util::truncate_excerpt;

const CHECK: &str = "✓";
const CROSS: &str = "✗";

pub struct RunUi {
    multi: MultiProgress,
    stage_bar: ProgressBar,
    task_bar: ProgressBar,
    tally_bar: ProgressBar,
    verbose: bool,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl RunUi {
    /// Create the UI and add all three bars to the multiplex renderer.
    pub fn new(total_stages: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let stage_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let stage_bar = multi.add(ProgressBar::new(total_stages));
        stage_bar.set_style(stage_style);
        stage_bar.set_prefix("Stages");

        let task_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let task_bar = multi.add(ProgressBar::new_spinner());
        task_bar.set_style(task_style);
        task_bar.set_prefix(" Tasks");
        task_bar.enable_steady_tick(Duration::from_millis(120));

        let tally_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} {msg}")
            .expect("progress bar template is a valid static string");
        let tally_bar = multi.add(ProgressBar::new(0));
        tally_bar.set_style(tally_style);
        tally_bar.set_prefix(" Tally");

        Self {
            multi,
            stage_bar,
            task_bar,
            tally_bar,
            verbose,
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the
    /// rich UI fails, so user-facing messages are never silently lost.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    fn refresh_tally(&self) {
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        self.tally_bar.set_message(format!(
            "{} completed · {} failed",
            style(completed).green(),
            style(failed).red()
        ));
    }

    /// Handle one orchestrator progress event.
    pub fn handle(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::StageStarted { index, name, .. } => {
                self.stage_bar
                    .set_message(format!("{}: {}", style(index + 1).yellow(), name));
            }
            ProgressEvent::TaskStarted { name, .. } => {
                self.task_bar.set_message(name.clone());
            }
            ProgressEvent::TaskOutput { name, line, .. } => {
                if self.verbose {
                    self.print_line(format!(
                        "  {} {}",
                        style(name).dim(),
                        style(truncate_excerpt(line, 100)).dim()
                    ));
                }
            }
            ProgressEvent::TaskFinished {
                name,
                status,
                error,
                ..
            } => {
                match status {
                    RunStatus::Completed => {
                        self.completed.fetch_add(1, Ordering::Relaxed);
                        self.print_line(format!("  {} {}", style(CHECK).green(), name));
                    }
                    RunStatus::Failed => {
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        let detail = error
                            .as_deref()
                            .map(|e| truncate_excerpt(e, 80))
                            .unwrap_or_default();
                        self.print_line(format!(
                            "  {} {} {}",
                            style(CROSS).red(),
                            name,
                            style(detail).dim()
                        ));
                    }
                    _ => {}
                }
                self.refresh_tally();
            }
            ProgressEvent::StageFinished { index, name, failed } => {
                self.stage_bar.inc(1);
                if *failed > 0 {
                    self.print_line(format!(
                        "{} Stage {} ({}) finished with {} failed task(s)",
                        style("!").yellow(),
                        index + 1,
                        name,
                        failed
                    ));
                }
            }
        }
    }

    /// Adapter handed to the orchestrator as its observer callback.
    pub fn observer(self: &Arc<Self>) -> ProgressCallback {
        let ui = Arc::clone(self);
        Arc::new(move |event: &ProgressEvent| ui.handle(event))
    }

    /// Verbose-only step line.
    pub fn log_step(&self, msg: &str) {
        if self.verbose {
            self.print_line(format!("  {} {}", style("→").dim(), msg));
        }
    }

    /// Tear the bars down and print the run summary.
    pub fn finish(&self, summary: &RunSummary) {
        self.task_bar.finish_and_clear();
        self.stage_bar.finish_and_clear();
        self.tally_bar.finish_and_clear();

        println!(
            "{} {}/{} tasks completed ({}%), {} failed",
            if summary.failed_tasks == 0 {
                style(CHECK).green()
            } else {
                style(CROSS).red()
            },
            summary.completed_tasks,
            summary.total_tasks,
            summary.success_pct,
            summary.failed_tasks
        );
        if let Some(ref root) = summary.report_root {
            println!("  reports: {}", style(root.display()).dim());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_counts_follow_task_events() {
        let ui = RunUi::new(1, false);
        ui.handle(&ProgressEvent::TaskFinished {
            stage: 0,
            name: "a".to_string(),
            status: RunStatus::Completed,
            error: None,
        });
        ui.handle(&ProgressEvent::TaskFinished {
            stage: 0,
            name: "b".to_string(),
            status: RunStatus::Failed,
            error: Some("boom".to_string()),
        });
        assert_eq!(ui.completed.load(Ordering::Relaxed), 1);
        assert_eq!(ui.failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_observer_adapter_dispatches() {
        let ui = Arc::new(RunUi::new(1, false));
        let observer = ui.observer();
        observer(&ProgressEvent::TaskFinished {
            stage: 0,
            name: "a".to_string(),
            status: RunStatus::Completed,
            error: None,
        });
        assert_eq!(ui.completed.load(Ordering::Relaxed), 1);
    }
}

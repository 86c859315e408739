use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};

use convoy::assess::ProjectAssessor;
use convoy::config::Config;
use convoy::errors::OrchestratorError;
use convoy::modes::Mode;
use convoy::modes::machine::{HistoryLog, ModeMachine};
use convoy::orchestrator::engine::{StageOrchestrator, reference_stages};
use convoy::session::SessionManager;
use convoy::ui::RunUi;

/// Run the selected (or recommended) mode's task set through the stage
/// orchestrator. With `--work-list`, run the fixed wave configuration over
/// the file's items instead of the mode's stage plan.
pub async fn execute(
    config: &Config,
    mode_arg: Option<String>,
    work_list: Option<PathBuf>,
    yes: bool,
) -> Result<()> {
    config.ensure_directories()?;

    let mode = resolve_mode(config, mode_arg, yes)?;
    let mut machine = ModeMachine::new(&config.project_dir, mode);

    let stage_total = match work_list {
        Some(_) => config.wave_shape().0,
        None => mode.stage_plan().len(),
    };
    let ui = Arc::new(RunUi::new(stage_total as u64, config.verbose));

    let session = SessionManager::new(config.session_config());
    let orchestrator = StageOrchestrator::new(Arc::new(session), config.orchestrator_config())
        .with_observer(ui.observer());

    let mut execution = match work_list {
        Some(ref path) => {
            let items = read_work_list(path)?;
            let (stage_count, tasks_per_stage) = config.wave_shape();
            ui.log_step(&format!(
                "Partitioning {} work items across {} waves of {} tasks",
                items.len(),
                stage_count,
                tasks_per_stage
            ));
            let definitions = reference_stages(stage_count, tasks_per_stage, &items);
            orchestrator.initialize(mode, &mode.policy(), &definitions)
        }
        None => machine.start_execution(&orchestrator)?,
    };

    // Ctrl-C marks the run stopped; in-flight sessions are bounded by their
    // own timeouts.
    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} stopping after the current batch...", style("!").yellow());
            stop.trigger();
        }
    });

    println!(
        "{} Running {} {} ({} stages, {} tasks, {} concurrent)",
        style("»").cyan(),
        mode.profile().icon,
        style(mode.profile().name).bold(),
        execution.stages.len(),
        execution.total_tasks(),
        config.orchestrator_config().max_concurrent
    );

    let outcome = orchestrator.run(&mut execution).await;
    match outcome {
        Ok(summary) => {
            ui.finish(&summary);
            suggest_next(config, &mut machine, yes).await?;
            Ok(())
        }
        Err(OrchestratorError::Stopped) => {
            println!("{} Run stopped by request.", style("!").yellow());
            Ok(())
        }
        Err(err) => {
            eprintln!("{} {}", style("Run failed:").red().bold(), err);
            Err(err.into())
        }
    }
}

/// Resolve the mode to run: an explicit `--mode`, or the assessment
/// recommendation confirmed interactively (auto-accepted with `--yes`).
fn resolve_mode(config: &Config, mode_arg: Option<String>, yes: bool) -> Result<Mode> {
    if let Some(raw) = mode_arg {
        return raw.parse::<Mode>().map_err(|e| anyhow!(e));
    }

    let recommendation = ProjectAssessor::with_defaults().assess(&config.project_dir);
    println!(
        "{} Assessment recommends {} {} ({}% confidence)",
        style("»").cyan(),
        recommendation.mode.profile().icon,
        style(recommendation.mode.profile().name).bold(),
        recommendation.confidence
    );
    for line in &recommendation.reasoning {
        println!("  {}", style(line).dim());
    }

    if yes {
        return Ok(recommendation.mode);
    }

    let mut options: Vec<String> = vec![format!("Run {}", recommendation.mode.profile().name)];
    options.extend(
        recommendation
            .alternatives
            .iter()
            .map(|m| format!("Run {} instead", m.profile().name)),
    );
    options.push("Abort".to_string());

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Proceed with this mode?")
        .items(&options)
        .default(0)
        .interact()?;

    if selection == 0 {
        Ok(recommendation.mode)
    } else if selection <= recommendation.alternatives.len() {
        Ok(recommendation.alternatives[selection - 1])
    } else {
        Err(anyhow!("aborted by user"))
    }
}

/// After a successful run, evaluate the mode's criteria and offer the
/// recommended successor. Accepted switches are appended to the history log.
async fn suggest_next(config: &Config, machine: &mut ModeMachine, yes: bool) -> Result<()> {
    let next = machine.recommended_next().await;
    if next == vec![machine.current()] {
        println!(
            "{} Mode {} has unmet required criteria; stay here and finish them.",
            style("»").cyan(),
            machine.current()
        );
        for criterion in machine.criteria().iter().filter(|c| c.required && !c.completed) {
            println!("  - {}", criterion.description);
        }
        return Ok(());
    }

    let names: Vec<&str> = next.iter().map(|m| m.profile().name).collect();
    println!(
        "{} Criteria satisfied. Recommended next: {}",
        style("»").cyan(),
        names.join(", ")
    );

    if yes {
        return Ok(());
    }

    let mut options: Vec<String> = next.iter().map(|m| format!("Switch to {}", m)).collect();
    options.push("Stay in the current mode".to_string());
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Switch modes?")
        .items(&options)
        .default(0)
        .interact()?;

    if selection < next.len() {
        let target = next[selection];
        let record = machine
            .switch_to(target, "run completed; required criteria satisfied")
            .clone();
        HistoryLog::new(config.history_file.clone())
            .append(&record)
            .context("Failed to record mode transition")?;
        println!(
            "{} Switched to {}. Start it with {}.",
            style("✓").green(),
            target,
            style(format!("convoy run --mode {}", target.profile().name.to_lowercase())).green()
        );
    }
    Ok(())
}

fn read_work_list(path: &PathBuf) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read work list: {}", path.display()))?;
    let items: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        return Err(anyhow!("work list {} contains no items", path.display()));
    }
    Ok(items)
}

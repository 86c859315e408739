//! Runtime configuration for convoy.
//!
//! Values are layered: CLI flags override environment variables, which
//! override `convoy.toml` at the project root, which overrides built-in
//! defaults. The config produces the session and orchestrator configs the
//! subsystems consume.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::orchestrator::engine::OrchestratorConfig;
use crate::session::SessionConfig;

/// `[tool]` section of convoy.toml.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolSection {
    pub command: String,
    pub args: Vec<String>,
    pub auth_marker: String,
}

impl Default for ToolSection {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            command: defaults.command,
            args: defaults.fixed_args,
            auth_marker: defaults.auth_marker,
        }
    }
}

/// `[timeouts]` section of convoy.toml (seconds per tier).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    pub quick_secs: u64,
    pub auth_secs: u64,
    pub execution_secs: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            quick_secs: defaults.quick_timeout.as_secs(),
            auth_secs: defaults.auth_timeout.as_secs(),
            execution_secs: defaults.execution_timeout.as_secs(),
        }
    }
}

/// `[retry]` section of convoy.toml.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            max_retries: defaults.max_retries,
            backoff_base_ms: defaults.backoff_base.as_millis() as u64,
        }
    }
}

/// `[orchestrator]` section of convoy.toml.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_concurrent: usize,
    pub stage_count: usize,
    pub tasks_per_stage: usize,
    pub output_root: Option<PathBuf>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_concurrent: OrchestratorConfig::default().max_concurrent,
            stage_count: 5,
            tasks_per_stage: 25,
            output_root: None,
        }
    }
}

/// Parsed convoy.toml.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConvoyToml {
    pub tool: ToolSection,
    pub timeouts: TimeoutsSection,
    pub retry: RetrySection,
    pub orchestrator: OrchestratorSection,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub convoy_dir: PathBuf,
    pub history_file: PathBuf,
    pub output_root: PathBuf,
    pub verbose: bool,
    file: ConvoyToml,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let config_path = project_dir.join("convoy.toml");
        let file = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            ConvoyToml::default()
        };

        let convoy_dir = project_dir.join(".convoy");
        let history_file = convoy_dir.join("history");
        let output_root = std::env::var("CONVOY_OUTPUT_ROOT")
            .map(PathBuf::from)
            .ok()
            .or_else(|| file.orchestrator.output_root.clone())
            .unwrap_or_else(|| convoy_dir.join("reports"));

        Ok(Self {
            project_dir,
            convoy_dir,
            history_file,
            output_root,
            verbose,
            file,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.convoy_dir).context("Failed to create .convoy directory")?;
        Ok(())
    }

    /// Reference wave shape: (stage count, tasks per stage).
    pub fn wave_shape(&self) -> (usize, usize) {
        (
            self.file.orchestrator.stage_count,
            self.file.orchestrator.tasks_per_stage,
        )
    }

    /// Session manager configuration, with env override for the tool command.
    pub fn session_config(&self) -> SessionConfig {
        let command = std::env::var("CONVOY_TOOL_CMD").unwrap_or_else(|_| self.file.tool.command.clone());
        SessionConfig::default()
            .with_command(&command)
            .with_fixed_args(self.file.tool.args.clone())
            .with_auth_marker(&self.file.tool.auth_marker)
            .with_quick_timeout(Duration::from_secs(self.file.timeouts.quick_secs))
            .with_auth_timeout(Duration::from_secs(self.file.timeouts.auth_secs))
            .with_execution_timeout(Duration::from_secs(self.file.timeouts.execution_secs))
            .with_max_retries(self.file.retry.max_retries)
            .with_backoff_base(Duration::from_millis(self.file.retry.backoff_base_ms))
    }

    /// Stage orchestrator configuration.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_max_concurrent(self.file.orchestrator.max_concurrent)
            .with_output_root(self.output_root.clone())
    }
}

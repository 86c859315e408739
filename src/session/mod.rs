//! Session manager for the external generative tool.
//!
//! One `Session` is a single attempt to invoke the tool for a single task.
//! The manager wraps invocation with:
//! - a cheap availability probe under a short timeout
//! - an authentication probe that checks for a marker string in stdout
//! - full executions under a long timeout, retried with exponential backoff
//!
//! The tool is slow, occasionally unauthenticated, and prone to silent hangs;
//! the tiered timeouts are the only per-invocation cancellation mechanism.

pub mod backoff;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use uuid::Uuid;

use crate::errors::SessionError;
use crate::util::truncate_excerpt;

/// Default external tool command.
const DEFAULT_TOOL_CMD: &str = "claude";

/// Default timeout for the version probe (quick tier).
const DEFAULT_QUICK_TIMEOUT_SECS: u64 = 20;

/// Default timeout for the authentication probe (auth tier).
const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 30;

/// Default timeout for a full invocation (execution tier).
const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 600;

/// Default number of retries after the initial attempt.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff base.
const DEFAULT_BACKOFF_BASE_MS: u64 = 2000;

/// Marker the authentication probe expects in the tool's stdout.
const DEFAULT_AUTH_MARKER: &str = "OK";

/// Fixed remediation steps rendered with every fatal session failure.
pub const TROUBLESHOOTING_CHECKLIST: [&str; 6] = [
    "Check your network connection and proxy settings",
    "Verify the tool is authenticated (run it interactively once)",
    "Reproduce manually: echo \"hello\" | <tool-command>",
    "Check the provider status page for ongoing incidents",
    "Restart the tool, then retry the run",
    "Check free memory and disk space on this machine",
];

/// Configuration for the session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// External tool command (default: "claude").
    pub command: String,
    /// Fixed flags appended to every invocation.
    pub fixed_args: Vec<String>,
    /// Marker substring the auth probe requires in stdout.
    pub auth_marker: String,
    /// Timeout for the version probe.
    pub quick_timeout: Duration,
    /// Timeout for the authentication probe.
    pub auth_timeout: Duration,
    /// Timeout for a full invocation.
    pub execution_timeout: Duration,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub backoff_base: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_TOOL_CMD.to_string(),
            fixed_args: vec!["--print".to_string()],
            auth_marker: DEFAULT_AUTH_MARKER.to_string(),
            quick_timeout: Duration::from_secs(DEFAULT_QUICK_TIMEOUT_SECS),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            execution_timeout: Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
        }
    }
}

impl SessionConfig {
    /// Set the tool command.
    pub fn with_command(mut self, cmd: &str) -> Self {
        self.command = cmd.to_string();
        self
    }

    /// Replace the fixed flags.
    pub fn with_fixed_args(mut self, args: Vec<String>) -> Self {
        self.fixed_args = args;
        self
    }

    /// Set the quick-tier (availability probe) timeout.
    pub fn with_quick_timeout(mut self, timeout: Duration) -> Self {
        self.quick_timeout = timeout;
        self
    }

    /// Set the auth-tier timeout.
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Set the execution-tier timeout.
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Set the retry count.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff base delay.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Set the auth marker.
    pub fn with_auth_marker(mut self, marker: &str) -> Self {
        self.auth_marker = marker.to_string();
        self
    }

    fn command_line(&self) -> String {
        if self.fixed_args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.fixed_args.join(" "))
        }
    }
}

/// One attempt to invoke the tool. Ephemeral — superseded by a new Session
/// on retry.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub attempt: u32,
    pub command_line: String,
    pub started_at: DateTime<Utc>,
    pub budget: Duration,
    pub pid: Option<u32>,
}

/// Captured result of a completed invocation.
#[derive(Debug, Clone)]
pub struct SessionOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl SessionOutput {
    /// The external contract for success: exit code zero plus non-empty stdout.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.stdout.trim().is_empty()
    }
}

/// Diagnostic bundle recorded for each failed attempt and carried by
/// `SessionError::Exhausted` after retries run out.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDiagnostics {
    pub session_id: Uuid,
    pub command_line: String,
    pub attempt: u32,
    pub elapsed_ms: u64,
    pub budget_ms: u64,
    pub pid: Option<u32>,
    pub output_received: bool,
    pub stderr_excerpt: String,
}

impl std::fmt::Display for SessionDiagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Session {} (attempt {})", self.session_id, self.attempt)?;
        writeln!(f, "  command: {}", self.command_line)?;
        writeln!(
            f,
            "  elapsed: {}ms of {}ms budget",
            self.elapsed_ms, self.budget_ms
        )?;
        match self.pid {
            Some(pid) => writeln!(f, "  pid: {}", pid)?,
            None => writeln!(f, "  pid: <not spawned>")?,
        }
        writeln!(f, "  output received: {}", self.output_received)?;
        if !self.stderr_excerpt.is_empty() {
            writeln!(f, "  stderr: {}", self.stderr_excerpt)?;
        }
        writeln!(f, "Troubleshooting:")?;
        for (i, step) in TROUBLESHOOTING_CHECKLIST.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, step)?;
        }
        Ok(())
    }
}

/// Advisory sink for partial-output lines. Never gates completion.
pub type ProgressSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Seam between the orchestrator and the subprocess layer, so stage execution
/// can be exercised without spawning real processes.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// One-time checks before a run starts. The default is a no-op; the real
    /// session manager probes availability and authentication here, so an
    /// unauthenticated tool aborts the run instead of failing per task.
    async fn preflight(&self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn invoke(
        &self,
        prompt: &str,
        progress: Option<ProgressSink>,
    ) -> Result<SessionOutput, SessionError>;
}

/// Outcome of a single attempt plus the bookkeeping the retry loop needs.
struct AttemptReport {
    outcome: Result<SessionOutput, SessionError>,
    pid: Option<u32>,
    output_received: bool,
    elapsed: Duration,
    stderr_excerpt: String,
}

/// Invokes the external tool reliably despite latency, auth lapses, and
/// silent hangs.
pub struct SessionManager {
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(SessionConfig::default())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Probe that the tool binary exists and answers a version query within
    /// the quick timeout. Returns the trimmed version string.
    pub async fn check_availability(&self) -> Result<String, SessionError> {
        let started = Instant::now();
        let mut cmd = Command::new(&self.config.command);
        cmd.arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let probe = match tokio::time::timeout(self.config.quick_timeout, cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(_)) | Err(_) => {
                return Err(SessionError::ToolNotFound {
                    command: self.config.command.clone(),
                });
            }
        };

        let version = String::from_utf8_lossy(&probe.stdout).trim().to_string();
        if !probe.status.success() || version.is_empty() {
            return Err(SessionError::ToolNotFound {
                command: self.config.command.clone(),
            });
        }
        tracing::debug!(
            version = %version,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "availability probe ok"
        );
        Ok(version)
    }

    /// Probe that the tool is authenticated: a minimal generation request must
    /// echo the configured marker. A timeout here is a timeout, not an auth
    /// failure — callers give different remediation for each.
    pub async fn check_authentication(&self) -> Result<(), SessionError> {
        let prompt = format!(
            "Reply with the single word {} and nothing else.",
            self.config.auth_marker
        );
        let report = self
            .run_once(&prompt, self.config.auth_timeout, None, Uuid::new_v4(), 0)
            .await;
        let output = report.outcome?;
        if output.exit_code == 0 && output.stdout.contains(&self.config.auth_marker) {
            Ok(())
        } else {
            Err(SessionError::AuthenticationFailed {
                marker: self.config.auth_marker.clone(),
                stdout_excerpt: truncate_excerpt(&output.stdout, 120),
            })
        }
    }

    /// Run a full invocation under the execution timeout, retrying failed
    /// attempts with exponential backoff plus jitter. The prompt is delivered
    /// over stdin; stdout lines are forwarded to `progress` as they arrive.
    pub async fn execute(
        &self,
        prompt: &str,
        progress: Option<ProgressSink>,
    ) -> Result<SessionOutput, SessionError> {
        let session_id = Uuid::new_v4();
        let budget = self.config.execution_timeout;
        let total_attempts = self.config.max_retries + 1;
        let mut last_diagnostics: Option<SessionDiagnostics> = None;

        for attempt in 0..total_attempts {
            let report = self
                .run_once(prompt, budget, progress.clone(), session_id, attempt)
                .await;

            match report.outcome {
                Ok(output) if output.is_success() => {
                    tracing::info!(
                        session = %session_id,
                        attempt,
                        elapsed_ms = report.elapsed.as_millis() as u64,
                        "invocation succeeded"
                    );
                    return Ok(output);
                }
                Ok(output) => {
                    tracing::warn!(
                        session = %session_id,
                        attempt,
                        exit_code = output.exit_code,
                        "invocation returned failure"
                    );
                }
                Err(SessionError::ToolNotFound { command }) => {
                    // Missing binary will not come back on retry.
                    return Err(SessionError::ToolNotFound { command });
                }
                Err(err) => {
                    tracing::warn!(session = %session_id, attempt, error = %err, "invocation attempt failed");
                }
            }

            let diagnostics = SessionDiagnostics {
                session_id,
                command_line: self.config.command_line(),
                attempt: attempt + 1,
                elapsed_ms: report.elapsed.as_millis() as u64,
                budget_ms: budget.as_millis() as u64,
                pid: report.pid,
                output_received: report.output_received,
                stderr_excerpt: report.stderr_excerpt,
            };
            tracing::warn!(session = %session_id, attempt, %diagnostics, "attempt diagnostics");
            last_diagnostics = Some(diagnostics);

            if attempt + 1 < total_attempts {
                let seed = session_id.as_u64_pair().0;
                let delay = backoff::retry_delay(attempt, self.config.backoff_base, seed);
                tracing::debug!(session = %session_id, delay_ms = delay.as_millis() as u64, "backing off before retry");
                tokio::time::sleep(delay).await;
            }
        }

        let diagnostics = last_diagnostics.unwrap_or_else(|| SessionDiagnostics {
            session_id,
            command_line: self.config.command_line(),
            attempt: total_attempts,
            elapsed_ms: 0,
            budget_ms: budget.as_millis() as u64,
            pid: None,
            output_received: false,
            stderr_excerpt: String::new(),
        });
        Err(SessionError::Exhausted {
            attempts: total_attempts,
            diagnostics: Box::new(diagnostics),
        })
    }

    /// One attempt: spawn, feed stdin, stream stdout, enforce the timeout.
    /// The child is killed (best effort) when the budget elapses.
    async fn run_once(
        &self,
        prompt: &str,
        budget: Duration,
        progress: Option<ProgressSink>,
        session_id: Uuid,
        attempt: u32,
    ) -> AttemptReport {
        let started = Instant::now();
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.fixed_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let outcome = if e.kind() == std::io::ErrorKind::NotFound {
                    Err(SessionError::ToolNotFound {
                        command: self.config.command.clone(),
                    })
                } else {
                    Err(SessionError::SpawnFailed(e))
                };
                return AttemptReport {
                    outcome,
                    pid: None,
                    output_received: false,
                    elapsed: started.elapsed(),
                    stderr_excerpt: String::new(),
                };
            }
        };
        let session = Session {
            id: session_id,
            attempt,
            command_line: self.config.command_line(),
            started_at: Utc::now(),
            budget,
            pid: child.id(),
        };
        let pid = session.pid;
        tracing::debug!(
            session = %session.id,
            attempt = session.attempt,
            pid = session.pid,
            started = %session.started_at,
            budget_ms = session.budget.as_millis() as u64,
            command = %session.command_line,
            "process spawned"
        );

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                return AttemptReport {
                    outcome: Err(SessionError::Io(e)),
                    pid,
                    output_received: false,
                    elapsed: started.elapsed(),
                    stderr_excerpt: String::new(),
                };
            }
            if let Err(e) = stdin.shutdown().await {
                return AttemptReport {
                    outcome: Err(SessionError::Io(e)),
                    pid,
                    output_received: false,
                    elapsed: started.elapsed(),
                    stderr_excerpt: String::new(),
                };
            }
        }

        // Shared so the timeout path can still report whether anything arrived.
        let collected = Arc::new(Mutex::new(String::new()));
        let received = Arc::new(AtomicBool::new(false));

        let stderr_buf = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            if let Some(mut stderr) = stderr_buf {
                let _ = stderr.read_to_string(&mut text).await;
            }
            text
        });

        let stdout = child.stdout.take();
        let outcome = {
            let collected = Arc::clone(&collected);
            let received = Arc::clone(&received);
            let progress = progress.clone();
            let work = async {
                if let Some(stdout) = stdout {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Some(line) = lines.next_line().await? {
                        received.store(true, Ordering::Relaxed);
                        if let Some(ref sink) = progress {
                            sink(&line);
                        }
                        let mut buf = collected
                            .lock()
                            .unwrap_or_else(std::sync::PoisonError::into_inner);
                        buf.push_str(&line);
                        buf.push('\n');
                    }
                }
                child.wait().await
            };
            tokio::time::timeout(budget, work).await
        };

        let elapsed = started.elapsed();
        match outcome {
            Ok(Ok(status)) => {
                let stderr_text = stderr_task.await.unwrap_or_default();
                let stdout_text = collected
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .clone();
                let output_received = received.load(Ordering::Relaxed);
                AttemptReport {
                    outcome: Ok(SessionOutput {
                        stdout: stdout_text,
                        stderr: truncate_excerpt(&stderr_text, 2000),
                        exit_code: status.code().unwrap_or(-1),
                        duration: elapsed,
                    }),
                    pid,
                    output_received,
                    elapsed,
                    stderr_excerpt: truncate_excerpt(&stderr_text, 200),
                }
            }
            Ok(Err(e)) => {
                stderr_task.abort();
                AttemptReport {
                    outcome: Err(SessionError::Io(e)),
                    pid,
                    output_received: received.load(Ordering::Relaxed),
                    elapsed,
                    stderr_excerpt: String::new(),
                }
            }
            Err(_elapsed) => {
                let _ = child.kill().await;
                stderr_task.abort();
                AttemptReport {
                    outcome: Err(SessionError::Timeout {
                        elapsed_ms: elapsed.as_millis() as u64,
                        budget_ms: budget.as_millis() as u64,
                    }),
                    pid,
                    output_received: received.load(Ordering::Relaxed),
                    elapsed,
                    stderr_excerpt: String::new(),
                }
            }
        }
    }
}

#[async_trait]
impl ToolInvoker for SessionManager {
    async fn preflight(&self) -> Result<(), SessionError> {
        let version = self.check_availability().await?;
        tracing::info!(%version, "external tool available");
        self.check_authentication().await
    }

    async fn invoke(
        &self,
        prompt: &str,
        progress: Option<ProgressSink>,
    ) -> Result<SessionOutput, SessionError> {
        self.execute(prompt, progress).await
    }
}

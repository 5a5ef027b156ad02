//! daka-exec: uniform adapter around the concrete automation tasks.
//!
//! The scheduler core never knows task specifics (portal URLs, credentials,
//! browser driving); it sees only `execute(kind) -> Outcome`. The production
//! implementation spawns a configured external command per task kind and maps
//! its exit status to an outcome.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use daka_types::{Outcome, TaskKind};

/// Maximum captured output kept in an outcome message.
const MAX_MESSAGE_CHARS: usize = 2000;

/// A schedulable automation task body.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Run the task to a definite outcome. Long-running (tens of seconds to
    /// minutes); must not panic and must not leave ledger or lock state
    /// behind — recording is the dispatcher's job.
    async fn execute(&self, kind: TaskKind) -> Outcome;
}

/// Runs each task kind as an external shell command with a bounded timeout.
pub struct CommandRunner {
    commands: HashMap<TaskKind, String>,
    /// Extra environment handed to every command (credentials and the like).
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(
        commands: HashMap<TaskKind, String>,
        env: Vec<(String, String)>,
        timeout: Duration,
    ) -> Self {
        Self {
            commands,
            env,
            timeout,
        }
    }
}

#[async_trait]
impl TaskRunner for CommandRunner {
    async fn execute(&self, kind: TaskKind) -> Outcome {
        let Some(command) = self.commands.get(&kind) else {
            return Outcome::failure(format!("no command configured for {kind}"));
        };

        tracing::info!(kind = %kind, "Running task command");
        let started = Instant::now();

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Outcome::failure(format!("failed to spawn task command: {e}"));
            }
            Err(_) => {
                return Outcome::failure(format!(
                    "task timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
        };

        let elapsed = started.elapsed().as_secs();
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = last_line(&stdout).unwrap_or("done");
            Outcome::success(truncate(format!("{detail} ({elapsed}s)")))
        } else {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = last_line(&stderr).unwrap_or("no error output");
            Outcome::failure(truncate(format!(
                "exit code {code} after {elapsed}s: {detail}"
            )))
        }
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().find(|l| !l.trim().is_empty())
}

fn truncate(mut message: String) -> String {
    if message.len() > MAX_MESSAGE_CHARS {
        let mut end = MAX_MESSAGE_CHARS;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
        message.push_str("… [truncated]");
    }
    message
}

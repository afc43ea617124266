//! External collaborator seams: reasoning providers and project executors.
//!
//! The pipeline never talks to a model API directly. Reviewers, planners,
//! and auditors go through [`ReasoningProvider`]; the implementation phase
//! goes through [`ProjectExecutor`]. The production implementation shells
//! out to a configured CLI with the prompt on stdin; scripted in-memory
//! doubles back the test suite.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Identifies a provider/model pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderKey {
    pub provider: String,
    pub model: String,
}

impl ProviderKey {
    pub fn new(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }
}

/// A text-completion backend. Failure surfaces as a single error; the
/// consensus runner maps it to a synthetic REJECT vote.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    fn key(&self) -> ProviderKey;
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Performs implementation work against the project tree.
#[async_trait]
pub trait ProjectExecutor: Send + Sync {
    async fn execute(&self, project_dir: &Path, system_prompt: Option<&str>) -> Result<()>;
}

/// Shells out to a reasoning CLI, prompt on stdin, completion on stdout.
pub struct CommandProvider {
    key: ProviderKey,
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandProvider {
    pub fn new(key: ProviderKey, command: &str, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            key,
            command: command.to_string(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl ReasoningProvider for CommandProvider {
    fn key(&self) -> ProviderKey {
        self.key.clone()
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn provider command '{}'", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("Failed to write prompt to provider stdin")?;
            stdin.shutdown().await.context("Failed to close provider stdin")?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("Provider call timed out"))?
            .context("Failed to wait for provider process")?;

        if !output.status.success() {
            bail!(
                "Provider command exited with code {}",
                output.status.code().unwrap_or(-1)
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// In-memory provider that pops queued responses in order, then repeats the
/// last one. Backs tests and dry runs; never touches the network.
pub struct ScriptedProvider {
    key: ProviderKey,
    responses: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
}

impl ScriptedProvider {
    pub fn new(key: ProviderKey, responses: impl IntoIterator<Item = String>) -> Self {
        Self {
            key,
            responses: Mutex::new(responses.into_iter().collect()),
            last: Mutex::new(None),
        }
    }

    /// A provider that always returns the same response.
    pub fn constant(key: ProviderKey, response: &str) -> Self {
        let provider = Self::new(key, []);
        *provider.last.lock().expect("scripted provider lock") = Some(response.to_string());
        provider
    }
}

#[async_trait]
impl ReasoningProvider for ScriptedProvider {
    fn key(&self) -> ProviderKey {
        self.key.clone()
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        let mut queue = self.responses.lock().expect("scripted provider lock");
        if let Some(next) = queue.pop_front() {
            *self.last.lock().expect("scripted provider lock") = Some(next.clone());
            return Ok(next);
        }
        match self.last.lock().expect("scripted provider lock").clone() {
            Some(last) => Ok(last),
            None => bail!("Scripted provider has no responses"),
        }
    }
}

/// A provider that always fails, for exercising reviewer-failure paths.
pub struct FailingProvider {
    key: ProviderKey,
}

impl FailingProvider {
    pub fn new(key: ProviderKey) -> Self {
        Self { key }
    }
}

#[async_trait]
impl ReasoningProvider for FailingProvider {
    fn key(&self) -> ProviderKey {
        self.key.clone()
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("provider unavailable")
    }
}

/// Executor that shells out to an implementation CLI in the project
/// directory, system prompt on stdin.
pub struct CommandExecutor {
    command: String,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(command: &str, timeout: Duration) -> Self {
        Self {
            command: command.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl ProjectExecutor for CommandExecutor {
    async fn execute(&self, project_dir: &Path, system_prompt: Option<&str>) -> Result<()> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn executor command '{}'", self.command))?;

        if let Some(prompt) = system_prompt
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("Failed to write prompt to executor stdin")?;
            stdin.shutdown().await.context("Failed to close executor stdin")?;
        }

        let status = tokio::time::timeout(self.timeout, child.wait())
            .await
            .map_err(|_| anyhow::anyhow!("Executor timed out"))?
            .context("Failed to wait for executor process")?;

        if !status.success() {
            bail!("Executor exited with code {}", status.code().unwrap_or(-1));
        }
        Ok(())
    }
}

/// Test executor driven by a closure; runs it once per invocation.
pub struct ScriptedExecutor {
    #[allow(clippy::type_complexity)]
    action: Mutex<Box<dyn FnMut(&Path) -> Result<()> + Send>>,
}

impl ScriptedExecutor {
    pub fn new(action: impl FnMut(&Path) -> Result<()> + Send + 'static) -> Self {
        Self {
            action: Mutex::new(Box::new(action)),
        }
    }

    /// An executor that does nothing and succeeds.
    pub fn noop() -> Self {
        Self::new(|_| Ok(()))
    }
}

#[async_trait]
impl ProjectExecutor for ScriptedExecutor {
    async fn execute(&self, project_dir: &Path, _system_prompt: Option<&str>) -> Result<()> {
        (self.action.lock().expect("scripted executor lock"))(project_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ProviderKey {
        ProviderKey::new("test", "model-1")
    }

    #[tokio::test]
    async fn test_scripted_provider_pops_then_repeats() {
        let provider = ScriptedProvider::new(key(), ["one".to_string(), "two".to_string()]);
        assert_eq!(provider.complete("p").await.unwrap(), "one");
        assert_eq!(provider.complete("p").await.unwrap(), "two");
        assert_eq!(provider.complete("p").await.unwrap(), "two");
    }

    #[tokio::test]
    async fn test_scripted_provider_constant() {
        let provider = ScriptedProvider::constant(key(), "always");
        assert_eq!(provider.complete("a").await.unwrap(), "always");
        assert_eq!(provider.complete("b").await.unwrap(), "always");
    }

    #[tokio::test]
    async fn test_scripted_provider_empty_errors() {
        let provider = ScriptedProvider::new(key(), []);
        assert!(provider.complete("p").await.is_err());
    }

    #[tokio::test]
    async fn test_failing_provider_errors() {
        let provider = FailingProvider::new(key());
        assert!(provider.complete("p").await.is_err());
    }

    #[tokio::test]
    async fn test_command_provider_roundtrip() {
        let provider = CommandProvider::new(
            key(),
            "cat",
            vec![],
            Duration::from_secs(5),
        );
        let out = provider.complete("echo back").await.unwrap();
        assert_eq!(out, "echo back");
    }

    #[tokio::test]
    async fn test_command_provider_nonzero_exit_is_error() {
        let provider = CommandProvider::new(key(), "false", vec![], Duration::from_secs(5));
        assert!(provider.complete("p").await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_executor_runs_action() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ScriptedExecutor::new(|project_dir: &Path| {
            std::fs::write(project_dir.join("made.txt"), "done")?;
            Ok(())
        });
        executor.execute(dir.path(), None).await.unwrap();
        assert!(dir.path().join("made.txt").exists());
    }

    #[tokio::test]
    async fn test_command_executor_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CommandExecutor::new("exit 3", Duration::from_secs(5));
        assert!(executor.execute(dir.path(), None).await.is_err());
    }
}

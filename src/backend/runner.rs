//! Command execution for RUN-type directives

use crate::pipeline::directive::DirectiveKind;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Variable holding the host path of the image root in every command
pub const ROOTFS_ENV: &str = "BOTPACK_ROOTFS";

/// One shell command to run for a directive
#[derive(Debug, Clone)]
pub struct RunInvocation {
    pub directive: DirectiveKind,
    pub command: String,
    /// Host path of the image root filesystem
    pub rootfs: PathBuf,
    /// Host path of the image working directory
    pub workdir: PathBuf,
    /// Environment in effect at this point of the build
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last `lines` lines of stderr (stdout when stderr is empty)
    pub fn tail(&self, lines: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let all: Vec<&str> = source.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &RunInvocation) -> Result<RunOutput>;
}

/// Runs commands with `sh -c` on the host, in the staged working directory,
/// with [`ROOTFS_ENV`] pointing at the image root.
///
/// The local backend rewrites install commands to write under that root, so
/// what they add becomes the layer above the base image. The host itself
/// stands in for the base image: this runner belongs inside a container of
/// the recipe's base (a CI job, for instance), where the package manager and
/// interpreter are the ones the image will carry.
#[derive(Debug, Clone)]
pub struct HostRunner {
    shell: String,
    timeout: Duration,
}

impl HostRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            shell: "sh".to_string(),
            timeout,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

impl Default for HostRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(1800))
    }
}

#[async_trait]
impl CommandRunner for HostRunner {
    async fn run(&self, invocation: &RunInvocation) -> Result<RunOutput> {
        debug!(
            directive = %invocation.directive,
            command = %invocation.command,
            cwd = %invocation.workdir.display(),
            "Running command"
        );

        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(&invocation.command)
            .current_dir(&invocation.workdir)
            .envs(&invocation.env)
            .env(ROOTFS_ENV, &invocation.rootfs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.shell))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                anyhow::anyhow!("Command timed out after {}s", self.timeout.as_secs())
            })?
            .context("Failed to wait for command")?;

        let result = RunOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(
            directive = %invocation.directive,
            code = ?result.code,
            "Command finished"
        );
        Ok(result)
    }
}

/// Skips every command and reports success. File directives still run, so a
/// dry run exercises staging, caching and the committed config.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipRunner;

#[async_trait]
impl CommandRunner for SkipRunner {
    async fn run(&self, invocation: &RunInvocation) -> Result<RunOutput> {
        info!(
            directive = %invocation.directive,
            command = %invocation.command,
            "Skipping command (dry run)"
        );
        Ok(RunOutput::success())
    }
}

// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Container engine invocation.
//!
//! The engine is driven through its compose command line. A non-zero exit code is the only
//! failure signal; its stderr is passed on verbatim.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::utils::split_with_quotes;

pub mod mock;

pub use mock::MockRuntime;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Container engine command is empty")]
    EmptyCommand,
    #[error("Failed to launch {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("Exit code {exit_code}: {stderr}")]
    ExitCode { exit_code: i32, stderr: String },
}

/// Everything the engine needs to address one instance's services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeProject {
    pub descriptor: PathBuf,
    /// Namespaces the engine's containers, networks and volumes per instance
    pub project: String,
    pub workdir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn into_result(self) -> Result<CommandOutput, RuntimeError> {
        if self.success() {
            Ok(self)
        } else {
            Err(RuntimeError::ExitCode {
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Builds and starts all services in detached mode.
    async fn up(&self, project: &ComposeProject) -> Result<CommandOutput, RuntimeError>;

    /// Tears all services down, optionally dropping the project's named volumes.
    async fn down(
        &self,
        project: &ComposeProject,
        remove_volumes: bool,
    ) -> Result<CommandOutput, RuntimeError>;

    /// Returns the last `tail` log lines of every service.
    async fn logs(&self, project: &ComposeProject, tail: u32)
    -> Result<CommandOutput, RuntimeError>;
}

/// Drives `docker compose` (or any CLI-compatible replacement).
#[derive(Debug, Clone)]
pub struct ComposeDriver {
    program: String,
    base_args: Vec<String>,
}

impl ComposeDriver {
    /// Parses a command line such as `docker compose` or `podman compose`.
    pub fn from_command_line(command_line: &str) -> Result<Self, RuntimeError> {
        let mut parts = split_with_quotes(command_line).into_iter();
        let program = parts.next().ok_or(RuntimeError::EmptyCommand)?;
        Ok(ComposeDriver {
            program,
            base_args: parts.collect(),
        })
    }

    async fn run(
        &self,
        project: &ComposeProject,
        args: &[&str],
    ) -> Result<CommandOutput, RuntimeError> {
        tracing::debug!(
            "Running {} {} -p {} {}",
            self.program,
            self.base_args.join(" "),
            project.project,
            args.join(" ")
        );
        let output = Command::new(&self.program)
            .args(&self.base_args)
            .arg("-f")
            .arg(&project.descriptor)
            .arg("-p")
            .arg(&project.project)
            .args(args)
            .current_dir(&project.workdir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RuntimeError::Spawn(self.program.clone(), e))?;
        Ok(CommandOutput {
            // Killed by a signal
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl RuntimeDriver for ComposeDriver {
    async fn up(&self, project: &ComposeProject) -> Result<CommandOutput, RuntimeError> {
        self.run(project, &["up", "-d", "--build"]).await
    }

    async fn down(
        &self,
        project: &ComposeProject,
        remove_volumes: bool,
    ) -> Result<CommandOutput, RuntimeError> {
        if remove_volumes {
            self.run(project, &["down", "--remove-orphans", "--volumes"])
                .await
        } else {
            self.run(project, &["down", "--remove-orphans"]).await
        }
    }

    async fn logs(
        &self,
        project: &ComposeProject,
        tail: u32,
    ) -> Result<CommandOutput, RuntimeError> {
        let tail = tail.to_string();
        self.run(project, &["logs", "--no-color", "--tail", &tail])
            .await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn project(dir: &tempfile::TempDir) -> ComposeProject {
        ComposeProject {
            descriptor: dir.path().join("docker-compose.yml"),
            project: "chalbox-test".to_string(),
            workdir: dir.path().to_path_buf(),
        }
    }

    #[test]
    fn test_empty_command_line() {
        assert!(matches!(
            ComposeDriver::from_command_line("  "),
            Err(RuntimeError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn test_arguments_are_passed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let driver = ComposeDriver::from_command_line("echo compose").unwrap();
        let output = driver.logs(&project(&dir), 50).await.unwrap();
        assert!(output.success());
        let expected = format!(
            "compose -f {} -p chalbox-test logs --no-color --tail 50",
            dir.path().join("docker-compose.yml").to_string_lossy()
        );
        assert_eq!(output.stdout.trim(), expected);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let driver =
            ComposeDriver::from_command_line(r#"sh -c "echo boom >&2; exit 3" sh"#).unwrap();
        let output = driver.up(&project(&dir)).await.unwrap();
        assert_eq!(output.exit_code, 3);
        match output.into_result() {
            Err(RuntimeError::ExitCode { exit_code, stderr }) => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr.trim(), "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let driver = ComposeDriver::from_command_line("chalbox-no-such-binary compose").unwrap();
        assert!(matches!(
            driver.down(&project(&dir), false).await,
            Err(RuntimeError::Spawn(_, _))
        ));
    }
}

// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory runtime for tests. Records every call instead of touching a container engine.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{CommandOutput, ComposeProject, RuntimeDriver, RuntimeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Up(ComposeProject),
    Down {
        project: ComposeProject,
        remove_volumes: bool,
    },
    Logs {
        project: ComposeProject,
        tail: u32,
    },
}

#[derive(Debug, Default)]
pub struct MockRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
    fail_up: AtomicBool,
    fail_down: AtomicBool,
    log_output: Mutex<String>,
    up_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `up` calls exit with code 1.
    pub fn set_fail_up(&self, fail: bool) {
        self.fail_up.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_down(&self, fail: bool) {
        self.fail_down.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `up` calls wait until the returned handle is notified.
    pub fn hold_up(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.up_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn set_log_output(&self, output: impl Into<String>) {
        *self.log_output.lock().unwrap() = output.into();
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn up_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RuntimeCall::Up(_)))
            .count()
    }

    pub fn down_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RuntimeCall::Down { .. }))
            .count()
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn output(fail: bool, stdout: String, stderr: &str) -> CommandOutput {
        if fail {
            CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: stderr.to_string(),
            }
        } else {
            CommandOutput {
                exit_code: 0,
                stdout,
                stderr: String::new(),
            }
        }
    }
}

#[async_trait]
impl RuntimeDriver for MockRuntime {
    async fn up(&self, project: &ComposeProject) -> Result<CommandOutput, RuntimeError> {
        self.record(RuntimeCall::Up(project.clone()));
        let gate = self.up_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(Self::output(
            self.fail_up.load(Ordering::SeqCst),
            String::new(),
            "mock: up failed",
        ))
    }

    async fn down(
        &self,
        project: &ComposeProject,
        remove_volumes: bool,
    ) -> Result<CommandOutput, RuntimeError> {
        self.record(RuntimeCall::Down {
            project: project.clone(),
            remove_volumes,
        });
        Ok(Self::output(
            self.fail_down.load(Ordering::SeqCst),
            String::new(),
            "mock: down failed",
        ))
    }

    async fn logs(
        &self,
        project: &ComposeProject,
        tail: u32,
    ) -> Result<CommandOutput, RuntimeError> {
        self.record(RuntimeCall::Logs {
            project: project.clone(),
            tail,
        });
        let stdout = self.log_output.lock().unwrap().clone();
        Ok(Self::output(false, stdout, ""))
    }
}

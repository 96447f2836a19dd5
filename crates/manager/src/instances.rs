// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Instance lifecycle.
//!
//! A challenge has at most one instance. Starting a challenge either creates it, resumes the
//! stopped (or failed) one, or rebuilds it from scratch when its workspace went missing.

use chrono::Utc;
use serde::Serialize;
use slugify::slugify;
use uuid::Uuid;

use crate::db::models::{Challenge, Instance, InstanceStatus};
use crate::settings::Settings;
use crate::{ChallengeManager, ManagerError};

pub mod deploy;

pub const DEFAULT_LOG_TAIL: u32 = 200;
pub const MAX_LOG_TAIL: u32 = 5000;

/// An instance as shown to clients.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceView {
    #[serde(flatten)]
    pub instance: Instance,
    pub challenge_name: String,
    pub url: Option<String>,
}

impl InstanceView {
    fn new(instance: Instance, challenge_name: String, settings: &Settings) -> Self {
        let url = instance.port().map(|port| settings.instance_url(port));
        InstanceView {
            instance,
            challenge_name,
            url,
        }
    }
}

/// Engine project name, unique per instance and still recognisable in `docker ps`.
fn project_name(challenge_name: &str, instance_id: &str) -> String {
    let slug = slugify!(challenge_name, max_length = 24);
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "challenge" } else { slug };
    let hex: String = instance_id
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    // The random tail of the UUID
    let suffix = &hex[hex.len().saturating_sub(12)..];
    format!("chalbox-{}-{}", slug, suffix)
}

impl ChallengeManager {
    /// Starts the instance of a challenge, creating or repairing it as needed.
    pub async fn start_instance(&self, challenge_id: &str) -> Result<InstanceView, ManagerError> {
        let (challenge, _guard) = self.lock_existing_challenge(challenge_id).await?;
        let settings = self.store.load_settings().await?;

        let instance = match self.store.get_instance_for_challenge(challenge_id).await? {
            Some(existing) if existing.status == InstanceStatus::Running => {
                return Err(ManagerError::Conflict(format!(
                    "Challenge {} is already running as instance {}",
                    challenge.name, existing.id
                )));
            }
            Some(existing) => {
                let workspace = self.workspaces.workspace(&existing.id);
                if workspace.is_intact() {
                    self.resume_instance(&challenge, existing, &settings).await?
                } else {
                    tracing::warn!(
                        "Workspace of instance {} is missing, recreating it from scratch",
                        existing.id
                    );
                    self.store.delete_instance(&existing.id).await?;
                    workspace.remove().await?;
                    self.start_fresh(&challenge, &settings).await?
                }
            }
            None => self.start_fresh(&challenge, &settings).await?,
        };
        Ok(InstanceView::new(instance, challenge.name, &settings))
    }

    async fn start_fresh(
        &self,
        challenge: &Challenge,
        settings: &Settings,
    ) -> Result<Instance, ManagerError> {
        let instance_id = Uuid::now_v7().to_string();
        let workspace = self.workspaces.workspace(&instance_id);
        let reservation = self.allocate_port(settings, None).await?;
        let host_port = reservation.port();

        if let Err(e) = deploy::prepare_workspace(&workspace, challenge, host_port, settings).await
        {
            if let Err(cleanup) = workspace.remove().await {
                tracing::warn!("Failed to clean up workspace of {instance_id}: {cleanup}");
            }
            return Err(e);
        }

        let project_name = project_name(&challenge.name, &instance_id);
        let project = workspace.compose_project(&project_name);
        let result = deploy::bring_up(self.runtime.as_ref(), &project).await;

        let now = Utc::now();
        let instance = Instance {
            id: instance_id,
            challenge_id: challenge.id.clone(),
            status: if result.is_ok() {
                InstanceStatus::Running
            } else {
                InstanceStatus::Error
            },
            host_port: host_port as i32,
            container_port: challenge.runtime.container_port() as i32,
            project_name,
            created_at: now,
            updated_at: now,
        };
        // The failed attempt is persisted too, so it can be inspected and cleaned up later
        self.store.insert_instance(&instance).await?;
        drop(reservation);

        match result {
            Ok(()) => {
                tracing::info!(
                    "Started instance {} of {} on port {}",
                    instance.id,
                    challenge.name,
                    host_port
                );
                Ok(instance)
            }
            Err(e) => {
                tracing::error!(
                    "Failed to start instance {} of {}: {}",
                    instance.id,
                    challenge.name,
                    e
                );
                Err(e.into())
            }
        }
    }

    async fn resume_instance(
        &self,
        challenge: &Challenge,
        instance: Instance,
        settings: &Settings,
    ) -> Result<Instance, ManagerError> {
        let workspace = self.workspaces.workspace(&instance.id);
        let previous_port = instance.port();
        let reservation = self.allocate_port(settings, previous_port).await?;
        let host_port = reservation.port();
        if previous_port != Some(host_port) {
            tracing::info!(
                "Moving instance {} from port {:?} to {}",
                instance.id,
                previous_port,
                host_port
            );
        }

        deploy::render_descriptors(&workspace, challenge, host_port, settings).await?;
        let project = workspace.compose_project(&instance.project_name);
        let result = deploy::bring_up(self.runtime.as_ref(), &project).await;
        let status = if result.is_ok() {
            InstanceStatus::Running
        } else {
            InstanceStatus::Error
        };
        self.store
            .update_instance(&instance.id, status, host_port)
            .await?;
        drop(reservation);

        if let Err(e) = result {
            tracing::error!("Failed to resume instance {}: {}", instance.id, e);
            return Err(e.into());
        }
        tracing::info!("Resumed instance {} on port {}", instance.id, host_port);
        self.find_instance(&instance.id).await
    }

    async fn find_instance(&self, instance_id: &str) -> Result<Instance, ManagerError> {
        self.store
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| ManagerError::NotFound(format!("instance {instance_id}")))
    }

    /// Looks the instance up and takes the lock of its challenge. The row is read again under
    /// the lock, it may have changed while waiting.
    async fn lock_instance(
        &self,
        instance_id: &str,
    ) -> Result<(Instance, tokio::sync::OwnedMutexGuard<()>), ManagerError> {
        let instance = self.find_instance(instance_id).await?;
        let guard = self.lock_challenge(&instance.challenge_id).await;
        let instance = self.find_instance(instance_id).await?;
        Ok((instance, guard))
    }

    pub async fn stop_instance(&self, instance_id: &str) -> Result<InstanceView, ManagerError> {
        let (instance, _guard) = self.lock_instance(instance_id).await?;
        let stopped = self.stop_instance_locked(instance).await?;
        self.view(stopped).await
    }

    /// Stops the services. The status only changes once the engine reports success.
    async fn stop_instance_locked(&self, mut instance: Instance) -> Result<Instance, ManagerError> {
        if instance.status == InstanceStatus::Stopped {
            return Err(ManagerError::Conflict(format!(
                "Instance {} is not running",
                instance.id
            )));
        }
        let project = self
            .workspaces
            .workspace(&instance.id)
            .compose_project(&instance.project_name);
        if let Err(e) = deploy::tear_down(self.runtime.as_ref(), &project, false).await {
            tracing::error!("Failed to stop instance {}: {}", instance.id, e);
            return Err(e.into());
        }
        self.store
            .set_instance_status(&instance.id, InstanceStatus::Stopped)
            .await?;
        tracing::info!("Stopped instance {}", instance.id);
        instance.status = InstanceStatus::Stopped;
        instance.updated_at = Utc::now();
        Ok(instance)
    }

    pub async fn delete_instance(&self, instance_id: &str) -> Result<(), ManagerError> {
        let (instance, _guard) = self.lock_instance(instance_id).await?;
        self.delete_instance_locked(instance).await
    }

    /// Removes services, volumes, workspace and row.
    ///
    /// A running instance must be torn down first, otherwise nothing is touched. For stopped or
    /// failed instances the teardown only collects leftovers and may fail.
    pub(crate) async fn delete_instance_locked(&self, instance: Instance) -> Result<(), ManagerError> {
        let workspace = self.workspaces.workspace(&instance.id);
        let project = workspace.compose_project(&instance.project_name);

        if instance.status == InstanceStatus::Running {
            if let Err(e) = deploy::tear_down(self.runtime.as_ref(), &project, true).await {
                tracing::error!(
                    "Failed to stop instance {}, not deleting it: {}",
                    instance.id,
                    e
                );
                return Err(e.into());
            }
            self.store
                .set_instance_status(&instance.id, InstanceStatus::Stopped)
                .await?;
        } else if workspace.compose_file().is_file() {
            if let Err(e) = deploy::tear_down(self.runtime.as_ref(), &project, true).await {
                tracing::warn!("Cleanup of instance {} failed: {}", instance.id, e);
            }
        }

        workspace.remove().await?;
        self.store.delete_instance(&instance.id).await?;
        tracing::info!("Deleted instance {}", instance.id);
        Ok(())
    }

    /// Fetches the last `tail` log lines of all services. Does not wait for lifecycle
    /// operations on the same challenge.
    pub async fn instance_logs(
        &self,
        instance_id: &str,
        tail: Option<u32>,
    ) -> Result<String, ManagerError> {
        let instance = self.find_instance(instance_id).await?;
        let workspace = self.workspaces.workspace(&instance.id);
        if !workspace.compose_file().is_file() {
            return Err(ManagerError::Conflict(format!(
                "Instance {} has no rendered services",
                instance.id
            )));
        }
        let tail = tail.unwrap_or(DEFAULT_LOG_TAIL).clamp(1, MAX_LOG_TAIL);
        let output = self
            .runtime
            .logs(&workspace.compose_project(&instance.project_name), tail)
            .await?
            .into_result()?;
        Ok(output.stdout)
    }

    pub async fn list_instances(&self) -> Result<Vec<InstanceView>, ManagerError> {
        let settings = self.store.load_settings().await?;
        Ok(self
            .store
            .list_instances()
            .await?
            .into_iter()
            .map(|(instance, challenge_name)| InstanceView::new(instance, challenge_name, &settings))
            .collect())
    }

    pub async fn get_instance(&self, instance_id: &str) -> Result<InstanceView, ManagerError> {
        let instance = self.find_instance(instance_id).await?;
        self.view(instance).await
    }

    async fn view(&self, instance: Instance) -> Result<InstanceView, ManagerError> {
        let settings = self.store.load_settings().await?;
        let challenge = self.get_challenge(&instance.challenge_id).await?;
        Ok(InstanceView::new(instance, challenge.name, &settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_name() {
        let name = project_name("SQL Injection 101!", "0192a3b4-c5d6-7e8f-9a0b-1c2d3e4f5a6b");
        assert_eq!(name, "chalbox-sql-injection-101-1c2d3e4f5a6b");
    }

    #[test]
    fn test_project_name_without_usable_characters() {
        let name = project_name("???", "0192a3b4-c5d6-7e8f-9a0b-1c2d3e4f5a6b");
        assert_eq!(name, "chalbox-challenge-1c2d3e4f5a6b");
    }

    #[test]
    fn test_project_name_is_truncated() {
        let name = project_name(
            "a very long challenge name that keeps going",
            "0192a3b4-c5d6-7e8f-9a0b-1c2d3e4f5a6b",
        );
        let slug = name
            .strip_prefix("chalbox-")
            .unwrap()
            .strip_suffix("-1c2d3e4f5a6b")
            .unwrap();
        assert!(slug.len() <= 24);
        assert!(!slug.ends_with('-'));
    }
}

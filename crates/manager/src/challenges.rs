// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::db::models::{Challenge, DbType, RuntimeKind};
use crate::utils::{copy_dir_recursively, remove_dir_if_exists};
use crate::{ChallengeManager, ManagerError};

pub mod hash;

/// A sanitized, flattened challenge file tree plus its metadata.
#[derive(Debug, Clone)]
pub struct NewChallenge {
    pub name: String,
    pub runtime: RuntimeKind,
    pub runtime_version: String,
    pub db_type: DbType,
    pub source_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChallengeUpdate {
    pub name: Option<String>,
    pub runtime_version: Option<String>,
}

fn validate_name(name: &str) -> Result<String, ManagerError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ManagerError::Validation(
            "Challenge name must not be empty".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// The version ends up in an image tag, so only tag-safe characters are accepted.
fn validate_runtime_version(version: &str) -> Result<String, ManagerError> {
    let version = version.trim();
    if version.is_empty()
        || version.len() > 64
        || !version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ManagerError::Validation(format!(
            "Invalid runtime version: {version:?}"
        )));
    }
    Ok(version.to_string())
}

/// Removes a partially registered tree. Failures are only logged, the caller reports the
/// error that caused the cleanup.
async fn discard_storage(storage_path: &Path) {
    if let Err(e) = remove_dir_if_exists(storage_path).await {
        tracing::warn!(
            "Failed to clean up challenge storage {}: {}",
            storage_path.to_string_lossy(),
            e
        );
    }
}

impl ChallengeManager {
    pub async fn register_challenge(&self, new: NewChallenge) -> Result<Challenge, ManagerError> {
        let name = validate_name(&new.name)?;
        let runtime_version = validate_runtime_version(&new.runtime_version)?;
        if !new.source_dir.is_dir() {
            return Err(ManagerError::Validation(format!(
                "Challenge source {} is not a directory",
                new.source_dir.to_string_lossy()
            )));
        }

        let id = Uuid::now_v7().to_string();
        let storage_path = self.challenges_dir.join(&id);
        if let Err(e) = copy_dir_recursively(&new.source_dir, &storage_path).await {
            discard_storage(&storage_path).await;
            return Err(e.into());
        }

        let hash_root = storage_path.clone();
        let content_hash =
            match tokio::task::spawn_blocking(move || hash::hash_tree(&hash_root)).await {
                Ok(Ok(hash)) => hash,
                Ok(Err(e)) => {
                    discard_storage(&storage_path).await;
                    return Err(e.into());
                }
                Err(e) => {
                    discard_storage(&storage_path).await;
                    return Err(e.into());
                }
            };

        let now = Utc::now();
        let challenge = Challenge {
            id,
            name,
            runtime: new.runtime,
            runtime_version,
            db_type: new.db_type,
            content_hash,
            storage_path: storage_path.to_string_lossy().to_string(),
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.store.insert_challenge(&challenge).await {
            discard_storage(&storage_path).await;
            return Err(e.into());
        }
        tracing::info!(
            "Registered challenge {} ({}, {} {}, db {:?}, hash {})",
            challenge.name,
            challenge.id,
            challenge.runtime.as_str(),
            challenge.runtime_version,
            challenge.db_type,
            challenge.content_hash
        );
        Ok(challenge)
    }

    pub async fn list_challenges(&self) -> Result<Vec<Challenge>, ManagerError> {
        Ok(self.store.list_challenges().await?)
    }

    pub async fn get_challenge(&self, challenge_id: &str) -> Result<Challenge, ManagerError> {
        self.store
            .get_challenge(challenge_id)
            .await?
            .ok_or_else(|| ManagerError::NotFound(format!("challenge {challenge_id}")))
    }

    /// Refreshes metadata only. The file tree of a challenge never changes after registration.
    pub async fn update_challenge(
        &self,
        challenge_id: &str,
        update: ChallengeUpdate,
    ) -> Result<Challenge, ManagerError> {
        let (challenge, _guard) = self.lock_existing_challenge(challenge_id).await?;
        let name = match update.name {
            Some(name) => validate_name(&name)?,
            None => challenge.name,
        };
        let runtime_version = match update.runtime_version {
            Some(version) => validate_runtime_version(&version)?,
            None => challenge.runtime_version,
        };
        self.store
            .update_challenge_metadata(challenge_id, &name, &runtime_version)
            .await?;
        self.get_challenge(challenge_id).await
    }

    /// Deletes the challenge together with its instance and stored files.
    ///
    /// A running instance that cannot be stopped aborts the deletion.
    pub async fn delete_challenge(&self, challenge_id: &str) -> Result<(), ManagerError> {
        {
            let (challenge, _guard) = self.lock_existing_challenge(challenge_id).await?;
            if let Some(instance) = self.store.get_instance_for_challenge(challenge_id).await? {
                self.delete_instance_locked(instance).await?;
            }
            remove_dir_if_exists(Path::new(&challenge.storage_path)).await?;
            self.store.delete_challenge(challenge_id).await?;
            tracing::info!("Deleted challenge {} ({})", challenge.name, challenge.id);
        }
        self.forget_challenge_lock(challenge_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_version_validation() {
        assert_eq!(validate_runtime_version(" 8.2 ").unwrap(), "8.2");
        assert!(validate_runtime_version("3.12-slim").is_ok());
        assert!(validate_runtime_version("").is_err());
        assert!(validate_runtime_version("8.2 ; rm").is_err());
        assert!(validate_runtime_version("8.2:latest").is_err());
        assert!(validate_runtime_version("../8").is_err());
    }

    #[test]
    fn test_name_validation() {
        assert_eq!(validate_name("  Login Bypass ").unwrap(), "Login Bypass");
        assert!(matches!(
            validate_name("   "),
            Err(ManagerError::Validation(_))
        ));
    }
}

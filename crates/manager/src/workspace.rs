// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-instance working directories.
//!
//! ```text
//! <root>/<instance-id>/
//!   pack/                 deep copy of the challenge files
//!   docker-compose.yml    rendered service descriptor
//!   Dockerfile            rendered build descriptor
//!   secrets.json          database credentials baked into this instance
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::ComposeProject;
use crate::settings::MysqlSettings;
use crate::utils::{copy_dir_recursively, remove_dir_if_exists};

pub const PACK_DIR: &str = "pack";
pub const COMPOSE_FILE: &str = "docker-compose.yml";
pub const BUILD_FILE: &str = "Dockerfile";
pub const SECRETS_FILE: &str = "secrets.json";
/// Optional database seed inside the pack
pub const SEED_FILE: &str = "init.sql";

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Challenge files not found at {0}")]
    MissingSource(String),
    #[error("Failed to copy challenge files into {0}: {1}")]
    Copy(String, std::io::Error),
    #[error("Failed to read secrets file {0}: {1}")]
    SecretsRead(String, std::io::Error),
    #[error("Secrets file {0} is malformed: {1}")]
    SecretsParse(String, serde_json::Error),
    #[error("Failed to encode secrets for {0}: {1}")]
    SecretsEncode(String, serde_json::Error),
    #[error("Failed to write secrets file {0}: {1}")]
    SecretsWrite(String, std::io::Error),
    #[error("Failed to remove workspace {0}: {1}")]
    Remove(String, std::io::Error),
}

/// Credentials a database instance was initialised with.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MysqlSecrets {
    pub mysql_root_password: String,
    pub mysql_database: String,
    pub mysql_user: String,
    pub mysql_password: String,
}

#[derive(Deserialize, Debug, Default)]
struct StoredSecrets {
    #[serde(default)]
    mysql_root_password: Option<String>,
    #[serde(default)]
    mysql_database: Option<String>,
    #[serde(default)]
    mysql_user: Option<String>,
    #[serde(default)]
    mysql_password: Option<String>,
}

fn prefer_stored(stored: Option<String>, current: &str) -> String {
    stored
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| current.to_string())
}

impl MysqlSecrets {
    fn merge(stored: StoredSecrets, settings: &MysqlSettings) -> Self {
        let mut secrets = MysqlSecrets {
            mysql_root_password: prefer_stored(stored.mysql_root_password, &settings.root_password),
            mysql_database: prefer_stored(stored.mysql_database, &settings.database),
            mysql_user: prefer_stored(stored.mysql_user, &settings.user),
            mysql_password: prefer_stored(stored.mysql_password, &settings.password),
        };
        if secrets.mysql_user == "root" {
            secrets.mysql_password = secrets.mysql_root_password.clone();
        }
        secrets
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        WorkspaceLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workspace(&self, instance_id: &str) -> Workspace {
        Workspace {
            dir: self.root.join(instance_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pack_dir(&self) -> PathBuf {
        self.dir.join(PACK_DIR)
    }

    pub fn compose_file(&self) -> PathBuf {
        self.dir.join(COMPOSE_FILE)
    }

    pub fn build_file(&self) -> PathBuf {
        self.dir.join(BUILD_FILE)
    }

    pub fn secrets_file(&self) -> PathBuf {
        self.dir.join(SECRETS_FILE)
    }

    pub fn exists(&self) -> bool {
        self.dir.exists()
    }

    /// Both the pack and the rendered descriptor must be present for the workspace to be reused.
    pub fn is_intact(&self) -> bool {
        self.pack_dir().is_dir() && self.compose_file().is_file()
    }

    pub fn has_seed(&self) -> bool {
        self.pack_dir().join(SEED_FILE).is_file()
    }

    pub fn compose_project(&self, project_name: &str) -> ComposeProject {
        ComposeProject {
            descriptor: self.compose_file(),
            project: project_name.to_string(),
            workdir: self.dir.clone(),
        }
    }

    /// Creates the workspace from scratch with a fresh copy of the challenge files.
    pub async fn materialize(&self, canonical: &Path) -> Result<(), WorkspaceError> {
        if !canonical.is_dir() {
            return Err(WorkspaceError::MissingSource(
                canonical.to_string_lossy().to_string(),
            ));
        }
        self.remove().await?;
        let pack_dir = self.pack_dir();
        copy_dir_recursively(canonical, &pack_dir)
            .await
            .map_err(|e| WorkspaceError::Copy(pack_dir.to_string_lossy().to_string(), e))?;
        tracing::debug!(
            "Materialized {} into {}",
            canonical.to_string_lossy(),
            pack_dir.to_string_lossy()
        );
        Ok(())
    }

    pub async fn remove(&self) -> Result<(), WorkspaceError> {
        remove_dir_if_exists(&self.dir)
            .await
            .map_err(|e| WorkspaceError::Remove(self.dir.to_string_lossy().to_string(), e))
    }

    /// Resolves the database credentials for this workspace.
    ///
    /// Credentials already stored in the workspace win over the current settings, since the
    /// database volume was initialised with them. The merged result is written back.
    pub async fn load_mysql_secrets(
        &self,
        settings: &MysqlSettings,
    ) -> Result<MysqlSecrets, WorkspaceError> {
        let path = self.secrets_file();
        let path_str = path.to_string_lossy().to_string();
        let stored = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<StoredSecrets>(&content)
                .map_err(|e| WorkspaceError::SecretsParse(path_str.clone(), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredSecrets::default(),
            Err(e) => return Err(WorkspaceError::SecretsRead(path_str, e)),
        };
        let secrets = MysqlSecrets::merge(stored, settings);
        self.write_secrets(&secrets).await?;
        Ok(secrets)
    }

    async fn write_secrets(&self, secrets: &MysqlSecrets) -> Result<(), WorkspaceError> {
        let path = self.secrets_file();
        let path_str = path.to_string_lossy().to_string();
        let content = serde_json::to_string_pretty(secrets)
            .map_err(|e| WorkspaceError::SecretsEncode(path_str.clone(), e))?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| WorkspaceError::SecretsWrite(path_str.clone(), e))?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| WorkspaceError::SecretsWrite(path_str.clone(), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| WorkspaceError::SecretsWrite(path_str, e))?;
        }
        Ok(())
    }
}

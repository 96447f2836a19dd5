// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use thiserror::Error;

use crate::{
    db::StoreError, descriptor::DescriptorError, ports::PortError, runtime::RuntimeError,
    settings::SettingsError, workspace::WorkspaceError,
};

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    PortsExhausted(#[from] PortError),
    #[error("Container engine error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("Database error: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to join Tokio task: {0}")]
    TokioJoin(#[from] tokio::task::JoinError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SettingsError> for ManagerError {
    fn from(err: SettingsError) -> Self {
        ManagerError::Validation(err.to_string())
    }
}

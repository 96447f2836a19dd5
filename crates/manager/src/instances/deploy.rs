// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::Path;

use crate::ManagerError;
use crate::db::models::{Challenge, DbType};
use crate::descriptor::{DescriptorParams, write_compose_files};
use crate::runtime::{ComposeProject, RuntimeDriver, RuntimeError};
use crate::settings::Settings;
use crate::workspace::Workspace;

/// Copies the challenge files into a fresh workspace and renders its descriptors.
pub(crate) async fn prepare_workspace(
    workspace: &Workspace,
    challenge: &Challenge,
    host_port: u16,
    settings: &Settings,
) -> Result<(), ManagerError> {
    workspace
        .materialize(Path::new(&challenge.storage_path))
        .await?;
    render_descriptors(workspace, challenge, host_port, settings).await
}

/// (Re-)renders the descriptors of an existing workspace.
///
/// Database credentials come from the workspace's secrets file when present, so a resumed
/// instance keeps the credentials its database volume was initialised with.
pub(crate) async fn render_descriptors(
    workspace: &Workspace,
    challenge: &Challenge,
    host_port: u16,
    settings: &Settings,
) -> Result<(), ManagerError> {
    let secrets = match challenge.db_type {
        DbType::Mysql => Some(workspace.load_mysql_secrets(&settings.mysql).await?),
        DbType::None => None,
    };
    let params = DescriptorParams {
        runtime: challenge.runtime,
        runtime_version: &challenge.runtime_version,
        host_port,
        db_type: challenge.db_type,
        mysql: secrets.as_ref(),
        has_seed: workspace.has_seed(),
    };
    write_compose_files(workspace.dir(), &params).await?;
    Ok(())
}

pub(crate) async fn bring_up(
    runtime: &dyn RuntimeDriver,
    project: &ComposeProject,
) -> Result<(), RuntimeError> {
    let output = runtime.up(project).await?.into_result()?;
    if !output.stderr.is_empty() {
        tracing::debug!("{} up: {}", project.project, output.stderr.trim_end());
    }
    Ok(())
}

pub(crate) async fn tear_down(
    runtime: &dyn RuntimeDriver,
    project: &ComposeProject,
    remove_volumes: bool,
) -> Result<(), RuntimeError> {
    runtime.down(project, remove_volumes).await?.into_result()?;
    Ok(())
}

// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;
use std::sync::Arc;

use chalbox_manager::ChallengeManager;
use chalbox_manager::challenges::{ChallengeUpdate, NewChallenge};
use chalbox_manager::db::models::{DbType, RuntimeKind};
use hyper::{Response, StatusCode};
use serde::Deserialize;

use crate::error::ApiError;
use crate::routes::{detached, json, no_content, parse_body};

/// Registration of an already extracted and sanitized challenge tree
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct RegisterChallengeRequest {
    pub name: String,
    pub runtime: RuntimeKind,
    pub runtime_version: String,
    #[serde(default = "no_database")]
    pub db_type: DbType,
    pub source_dir: PathBuf,
}

fn no_database() -> DbType {
    DbType::None
}

pub async fn list_challenges(
    manager: Arc<ChallengeManager>,
) -> Result<Response<String>, ApiError> {
    let challenges = manager.list_challenges().await?;
    Ok(json(StatusCode::OK, &challenges))
}

pub async fn register_challenge(
    manager: Arc<ChallengeManager>,
    body: &[u8],
) -> Result<Response<String>, ApiError> {
    let request: RegisterChallengeRequest = parse_body(body)?;
    let challenge = detached(async move {
        manager
            .register_challenge(NewChallenge {
                name: request.name,
                runtime: request.runtime,
                runtime_version: request.runtime_version,
                db_type: request.db_type,
                source_dir: request.source_dir,
            })
            .await
    })
    .await?;
    Ok(json(StatusCode::CREATED, &challenge))
}

pub async fn get_challenge(
    manager: Arc<ChallengeManager>,
    id: &str,
) -> Result<Response<String>, ApiError> {
    let challenge = manager.get_challenge(id).await?;
    Ok(json(StatusCode::OK, &challenge))
}

pub async fn update_challenge(
    manager: Arc<ChallengeManager>,
    id: &str,
    body: &[u8],
) -> Result<Response<String>, ApiError> {
    let update: ChallengeUpdate = parse_body(body)?;
    let id = id.to_string();
    let challenge = detached(async move { manager.update_challenge(&id, update).await }).await?;
    Ok(json(StatusCode::OK, &challenge))
}

pub async fn delete_challenge(
    manager: Arc<ChallengeManager>,
    id: &str,
) -> Result<Response<String>, ApiError> {
    let id = id.to_string();
    detached(async move { manager.delete_challenge(&id).await }).await?;
    Ok(no_content())
}

pub async fn start_challenge(
    manager: Arc<ChallengeManager>,
    id: &str,
) -> Result<Response<String>, ApiError> {
    let id = id.to_string();
    let instance = detached(async move { manager.start_instance(&id).await }).await?;
    Ok(json(StatusCode::OK, &instance))
}

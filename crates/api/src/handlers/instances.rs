// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use chalbox_manager::ChallengeManager;
use hyper::{Response, StatusCode};

use crate::error::ApiError;
use crate::routes::{detached, json, no_content, query_param};

pub async fn list_instances(manager: Arc<ChallengeManager>) -> Result<Response<String>, ApiError> {
    let instances = manager.list_instances().await?;
    Ok(json(StatusCode::OK, &instances))
}

pub async fn get_instance(
    manager: Arc<ChallengeManager>,
    id: &str,
) -> Result<Response<String>, ApiError> {
    let instance = manager.get_instance(id).await?;
    Ok(json(StatusCode::OK, &instance))
}

pub async fn stop_instance(
    manager: Arc<ChallengeManager>,
    id: &str,
) -> Result<Response<String>, ApiError> {
    let id = id.to_string();
    let instance = detached(async move { manager.stop_instance(&id).await }).await?;
    Ok(json(StatusCode::OK, &instance))
}

pub async fn delete_instance(
    manager: Arc<ChallengeManager>,
    id: &str,
) -> Result<Response<String>, ApiError> {
    let id = id.to_string();
    detached(async move { manager.delete_instance(&id).await }).await?;
    Ok(no_content())
}

pub async fn instance_logs(
    manager: Arc<ChallengeManager>,
    id: &str,
    query: Option<&str>,
) -> Result<Response<String>, ApiError> {
    let tail = match query_param(query, "tail") {
        Some(raw) => Some(
            raw.parse::<u32>()
                .map_err(|_| ApiError::BadRequest(format!("Invalid tail: {raw:?}")))?,
        ),
        None => None,
    };
    let logs = manager.instance_logs(id, tail).await?;
    Ok(json(StatusCode::OK, &serde_json::json!({ "logs": logs })))
}

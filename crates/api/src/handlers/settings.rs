// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use chalbox_manager::ChallengeManager;
use chalbox_manager::settings::SettingsUpdate;
use hyper::{Response, StatusCode};

use crate::error::ApiError;
use crate::routes::{detached, json, parse_body};

pub async fn get_settings(manager: Arc<ChallengeManager>) -> Result<Response<String>, ApiError> {
    let settings = manager.settings().await?;
    Ok(json(StatusCode::OK, &settings))
}

pub async fn update_settings(
    manager: Arc<ChallengeManager>,
    body: &[u8],
) -> Result<Response<String>, ApiError> {
    let update: SettingsUpdate = parse_body(body)?;
    let settings = detached(async move { manager.update_settings(update).await }).await?;
    Ok(json(StatusCode::OK, &settings))
}

pub async fn port_summary(manager: Arc<ChallengeManager>) -> Result<Response<String>, ApiError> {
    let summary = manager.port_summary().await?;
    Ok(json(StatusCode::OK, &summary))
}

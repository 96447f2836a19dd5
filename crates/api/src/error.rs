// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chalbox_manager::ManagerError;
use hyper::{Response, StatusCode};
use thiserror::Error;

use crate::routes::json;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error("Malformed request body: {0}")]
    BadRequest(String),
    #[error("No such route")]
    NotFound,
    #[error("Method not allowed")]
    MethodNotAllowed,
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Manager(ManagerError::TokioJoin(err))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Manager(e) => match e {
                ManagerError::Validation(_) => StatusCode::BAD_REQUEST,
                ManagerError::NotFound(_) => StatusCode::NOT_FOUND,
                ManagerError::Conflict(_) => StatusCode::CONFLICT,
                ManagerError::PortsExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
                ManagerError::Runtime(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    pub fn into_response(self) -> Response<String> {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {self}");
        } else {
            tracing::debug!("Request rejected: {self}");
        }
        json(status, &serde_json::json!({ "error": self.to_string() }))
    }
}

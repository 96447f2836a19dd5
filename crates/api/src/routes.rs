// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::future::Future;
use std::sync::Arc;

use chalbox_manager::{ChallengeManager, ManagerError};
use http_body_util::{BodyExt, Limited};
use hyper::body::Body;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ApiError;
use crate::handlers::{challenges, instances, settings};

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<String> {
    let (status, body) = match serde_json::to_string(value) {
        Ok(body) => (status, body),
        Err(e) => {
            tracing::error!("Failed to serialize response: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"error":"Failed to serialize response"}"#.to_string(),
            )
        }
    };
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

pub fn no_content() -> Response<String> {
    let mut resp = Response::new(String::new());
    *resp.status_mut() = StatusCode::NO_CONTENT;
    resp
}

pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

pub fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == name).then(|| value.to_string())
    })
}

/// Runs a manager operation on its own task, so it completes even if the client goes away.
pub async fn detached<T, F>(operation: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ManagerError>> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::spawn(operation).await??)
}

pub async fn handle<B>(manager: Arc<ChallengeManager>, req: Request<B>) -> Response<String>
where
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return ApiError::BadRequest(e.to_string()).into_response(),
    };
    let path = parts.uri.path().trim_end_matches('/');
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    tracing::debug!("{} {}", parts.method, parts.uri);

    let result = match segments.as_slice() {
        ["api", rest @ ..] => {
            dispatch(manager, &parts.method, rest, parts.uri.query(), &body).await
        }
        _ => Err(ApiError::NotFound),
    };
    result.unwrap_or_else(ApiError::into_response)
}

async fn dispatch(
    manager: Arc<ChallengeManager>,
    method: &Method,
    segments: &[&str],
    query: Option<&str>,
    body: &[u8],
) -> Result<Response<String>, ApiError> {
    match (segments, method) {
        (["settings"], &Method::GET) => settings::get_settings(manager).await,
        (["settings"], &Method::PUT) => settings::update_settings(manager, body).await,
        (["ports", "summary"], &Method::GET) => settings::port_summary(manager).await,

        (["challenges"], &Method::GET) => challenges::list_challenges(manager).await,
        (["challenges"], &Method::POST) => challenges::register_challenge(manager, body).await,
        (["challenges", id], &Method::GET) => challenges::get_challenge(manager, id).await,
        (["challenges", id], &Method::PATCH) => {
            challenges::update_challenge(manager, id, body).await
        }
        (["challenges", id], &Method::DELETE) => challenges::delete_challenge(manager, id).await,
        (["challenges", id, "start"], &Method::POST) => {
            challenges::start_challenge(manager, id).await
        }

        (["instances"], &Method::GET) => instances::list_instances(manager).await,
        (["instances", id], &Method::GET) => instances::get_instance(manager, id).await,
        (["instances", id], &Method::DELETE) => instances::delete_instance(manager, id).await,
        (["instances", id, "stop"], &Method::POST) => instances::stop_instance(manager, id).await,
        (["instances", id, "logs"], &Method::GET) => {
            instances::instance_logs(manager, id, query).await
        }

        (
            ["settings"]
            | ["ports", "summary"]
            | ["challenges"]
            | ["challenges", _]
            | ["challenges", _, "start"]
            | ["instances"]
            | ["instances", _]
            | ["instances", _, "stop" | "logs"],
            _,
        ) => Err(ApiError::MethodNotAllowed),
        _ => Err(ApiError::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chalbox_manager::db::Store;
    use chalbox_manager::ports::TcpPortProbe;
    use chalbox_manager::runtime::MockRuntime;

    async fn manager(dir: &tempfile::TempDir) -> Arc<ChallengeManager> {
        let store = Store::open(&dir.path().join("chalbox.db").to_string_lossy())
            .await
            .unwrap();
        Arc::new(ChallengeManager::new(
            store,
            dir.path(),
            Arc::new(MockRuntime::new()),
            Arc::new(TcpPortProbe),
        ))
    }

    async fn call(
        manager: &Arc<ChallengeManager>,
        method: Method,
        uri: &str,
        body: &str,
    ) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(body.to_string())
            .unwrap();
        let resp = handle(manager.clone(), req).await;
        let status = resp.status();
        let body = resp.into_body();
        let value = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&body).unwrap()
        };
        (status, value)
    }

    #[test]
    fn test_query_param() {
        assert_eq!(query_param(Some("tail=50&x=1"), "tail").as_deref(), Some("50"));
        assert_eq!(query_param(Some("x=1"), "tail"), None);
        assert_eq!(query_param(None, "tail"), None);
    }

    #[tokio::test]
    async fn test_unknown_routes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir).await;
        let (status, body) = call(&manager, Method::GET, "/nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
        let (status, _) = call(&manager, Method::POST, "/api/instances", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_settings_roundtrip_and_validation() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir).await;
        let (status, body) = call(&manager, Method::GET, "/api/settings", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["port_ranges"], serde_json::json!([[20000, 20999]]));

        let (status, _) = call(
            &manager,
            Method::PUT,
            "/api/settings",
            r#"{"port_ranges": [[2000, 1000]]}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &manager,
            Method::PUT,
            "/api/settings/",
            r#"{"public_host": "10.0.0.5"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["public_host"], "10.0.0.5");
    }

    #[tokio::test]
    async fn test_challenge_and_instance_flow() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir).await;
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let (status, _) = call(
            &manager,
            Method::PUT,
            "/api/settings",
            &format!(r#"{{"port_ranges": [[{port}, {port}]]}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let source = dir.path().join("upload");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("index.php"), "<?php echo 1;").unwrap();
        let request = serde_json::json!({
            "name": "Hello",
            "runtime": "php",
            "runtime_version": "8.2",
            "source_dir": source,
        });
        let (status, challenge) = call(
            &manager,
            Method::POST,
            "/api/challenges",
            &request.to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(challenge["db_type"], "none");
        let id = challenge["id"].as_str().unwrap().to_string();

        let (status, instance) =
            call(&manager, Method::POST, &format!("/api/challenges/{id}/start"), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(instance["status"], "running");
        assert_eq!(instance["host_port"], port);
        assert_eq!(instance["url"], format!("http://localhost:{port}"));
        let instance_id = instance["id"].as_str().unwrap().to_string();

        let (status, _) =
            call(&manager, Method::POST, &format!("/api/challenges/{id}/start"), "").await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            &manager,
            Method::GET,
            &format!("/api/instances/{instance_id}/logs?tail=10"),
            "",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["logs"], "");

        let (status, body) =
            call(&manager, Method::POST, &format!("/api/instances/{instance_id}/stop"), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "stopped");

        let (status, _) = call(&manager, Method::DELETE, &format!("/api/challenges/{id}"), "").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&manager, Method::GET, &format!("/api/instances/{instance_id}"), "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_challenge_input() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir).await;
        let (status, _) = call(
            &manager,
            Method::POST,
            "/api/challenges",
            r#"{"name": "x", "runtime": "ruby", "runtime_version": "3", "source_dir": "/tmp"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(
            &manager,
            Method::POST,
            "/api/challenges",
            r#"{"name": "x", "runtime": "php", "runtime_version": "8.2", "source_dir": "/definitely/missing"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

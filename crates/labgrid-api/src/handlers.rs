//! REST API handlers.
//!
//! Each handler delegates to `ServerLifecycle` and returns JSON responses.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{error, warn};

use labgrid_lifecycle::LifecycleError;
use labgrid_state::Server;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn status_for(e: &LifecycleError) -> StatusCode {
    match e {
        LifecycleError::Validation(_) => StatusCode::BAD_REQUEST,
        LifecycleError::Authorization(_) => StatusCode::FORBIDDEN,
        LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
        LifecycleError::Provider(_) => StatusCode::BAD_GATEWAY,
        LifecycleError::DeployVerification { .. } => StatusCode::GATEWAY_TIMEOUT,
        LifecycleError::Superseded { .. } => StatusCode::CONFLICT,
        LifecycleError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn lifecycle_error(e: LifecycleError) -> Response {
    let status = status_for(&e);
    if status.is_server_error() {
        error!(error = %e, status = status.as_u16(), "request failed");
    } else {
        warn!(error = %e, status = status.as_u16(), "request rejected");
    }
    error_response(&e.to_string(), status)
}

// ── Registration ───────────────────────────────────────────────

/// Register request body.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub subscription_id: String,
    pub user_principal_name: String,
    pub user_principal_id: String,
}

/// POST /api/v1/servers
pub async fn register_subscription(
    State(state): State<ApiState>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    match state
        .lifecycle
        .register_subscription(&req.subscription_id, &req.user_principal_name, &req.user_principal_id)
        .await
    {
        Ok(server) => (StatusCode::CREATED, ApiResponse::ok(server)).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

// ── Servers ────────────────────────────────────────────────────

/// GET /api/v1/servers/{upn}
///
/// Users with no record get a synthetic `unregistered` server, not 404.
pub async fn get_server(State(state): State<ApiState>, Path(upn): Path<String>) -> Response {
    match state.lifecycle.get_server(&upn) {
        Ok(server) => ApiResponse::ok(server).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

/// Update request body. Absent fields keep their stored value.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequest {
    pub user_principal_name: Option<String>,
    pub auto_create: Option<bool>,
    pub auto_destroy: Option<bool>,
    pub inactivity_duration_in_seconds: Option<u64>,
}

/// PUT /api/v1/servers/{upn}
///
/// Only `auto_create`, `auto_destroy` and `inactivity_duration_in_seconds`
/// are taken from the body.
pub async fn update_server(
    State(state): State<ApiState>,
    Path(upn): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> Response {
    if req.user_principal_name.as_ref().is_some_and(|name| *name != upn) {
        return error_response(
            "user_principal_name in body does not match path",
            StatusCode::BAD_REQUEST,
        );
    }
    let mut server = match state.lifecycle.get_server(&upn) {
        Ok(server) => server,
        Err(e) => return lifecycle_error(e),
    };
    if let Some(auto_create) = req.auto_create {
        server.auto_create = auto_create;
    }
    if let Some(auto_destroy) = req.auto_destroy {
        server.auto_destroy = auto_destroy;
    }
    if let Some(inactivity) = req.inactivity_duration_in_seconds {
        server.inactivity_duration_in_seconds = inactivity;
    }
    match state.lifecycle.update_server(&server).await {
        Ok(server) => ApiResponse::ok(server).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

/// POST /api/v1/servers/{upn}/deploy
///
/// Returns once the server answers its readiness probe, or the wait
/// budget runs out (504). A client disconnect cancels the wait.
pub async fn deploy(State(state): State<ApiState>, Path(upn): Path<String>) -> Response {
    match state.lifecycle.deploy(&Server::unregistered(&upn)).await {
        Ok(server) => ApiResponse::ok(server).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

/// POST /api/v1/servers/{upn}/destroy
pub async fn destroy(State(state): State<ApiState>, Path(upn): Path<String>) -> Response {
    match state.lifecycle.destroy(&upn).await {
        Ok(server) => ApiResponse::ok(server).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

/// POST /api/v1/servers/{upn}/activity
pub async fn update_activity(State(state): State<ApiState>, Path(upn): Path<String>) -> Response {
    match state.lifecycle.update_activity_status(&upn) {
        Ok(server) => ApiResponse::ok(server).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use labgrid_lifecycle::{LifecycleConfig, ServerLifecycle};
    use labgrid_provider::MockProvider;
    use labgrid_state::{ServerStatus, ServerStore, StateStore};

    const USER: &str = "alice@x.com";

    fn test_state(provider: MockProvider) -> (ApiState, Arc<StateStore>) {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let lifecycle = ServerLifecycle::new(
            store.clone(),
            Arc::new(provider),
            LifecycleConfig::default(),
        );
        (
            ApiState {
                lifecycle: Arc::new(lifecycle),
            },
            store,
        )
    }

    fn register_request() -> RegisterRequest {
        RegisterRequest {
            subscription_id: "sub-1".to_string(),
            user_principal_name: USER.to_string(),
            user_principal_id: "oid-1".to_string(),
        }
    }

    #[tokio::test]
    async fn register_returns_created() {
        let (state, store) = test_state(MockProvider::new());
        let resp = register_subscription(State(state), Json(register_request())).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(store.require(USER).unwrap().status, ServerStatus::Registered);
    }

    #[tokio::test]
    async fn register_by_non_owner_is_forbidden() {
        let (state, store) = test_state(MockProvider::new().with_owner(false));
        let resp = register_subscription(State(state), Json(register_request())).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(store.get(USER).unwrap().is_none());
    }

    #[tokio::test]
    async fn register_with_missing_fields_is_bad_request() {
        let (state, _) = test_state(MockProvider::new());
        let mut req = register_request();
        req.subscription_id.clear();
        let resp = register_subscription(State(state), Json(req)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_unknown_user_is_unregistered_not_404() {
        let (state, _) = test_state(MockProvider::new());
        let resp = get_server(State(state), Path("nobody@x.com".to_string())).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn deploy_unregistered_user_is_not_found() {
        let (state, _) = test_state(MockProvider::new());
        let resp = deploy(State(state), Path(USER.to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_never_ready_is_gateway_timeout() {
        let (state, store) = test_state(MockProvider::new().never_ready());
        register_subscription(State(state.clone()), Json(register_request())).await;

        let resp = deploy(State(state), Path(USER.to_string())).await;
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(store.require(USER).unwrap().status, ServerStatus::Unknown);
    }

    #[tokio::test]
    async fn provider_failure_is_bad_gateway() {
        let (state, _) = test_state(MockProvider::new().fail_deploy_for(USER));
        register_subscription(State(state.clone()), Json(register_request())).await;

        let resp = deploy(State(state), Path(USER.to_string())).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn update_rejects_mismatched_principal() {
        let (state, _) = test_state(MockProvider::new());
        register_subscription(State(state.clone()), Json(register_request())).await;

        let body = UpdateRequest {
            user_principal_name: Some("mallory@x.com".to_string()),
            ..UpdateRequest::default()
        };
        let resp = update_server(State(state), Path(USER.to_string()), Json(body)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_keeps_flags_missing_from_body() {
        let (state, store) = test_state(MockProvider::new());
        register_subscription(State(state.clone()), Json(register_request())).await;

        let disable = UpdateRequest {
            auto_destroy: Some(false),
            ..UpdateRequest::default()
        };
        let resp = update_server(State(state.clone()), Path(USER.to_string()), Json(disable)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let only_window = UpdateRequest {
            inactivity_duration_in_seconds: Some(900),
            ..UpdateRequest::default()
        };
        let resp = update_server(State(state), Path(USER.to_string()), Json(only_window)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let server = store.require(USER).unwrap();
        assert!(!server.auto_destroy);
        assert!(server.auto_create);
        assert_eq!(server.inactivity_duration_in_seconds, 900);
    }

    #[tokio::test]
    async fn update_unregistered_user_is_not_found() {
        let (state, _) = test_state(MockProvider::new());
        let body = UpdateRequest {
            auto_destroy: Some(false),
            ..UpdateRequest::default()
        };
        let resp = update_server(State(state), Path(USER.to_string()), Json(body)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn activity_for_unregistered_user_is_not_found() {
        let (state, _) = test_state(MockProvider::new());
        let resp = update_activity(State(state), Path(USER.to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let resp = healthz().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

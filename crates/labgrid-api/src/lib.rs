//! labgrid-api: REST API for per-user sandbox servers.
//!
//! Thin axum surface over [`ServerLifecycle`]. Callers are expected to
//! be authenticated upstream; the principal name in the path is trusted.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/servers` | Register a subscription |
//! | GET | `/api/v1/servers/{upn}` | Get a user's server |
//! | PUT | `/api/v1/servers/{upn}` | Update policy flags |
//! | POST | `/api/v1/servers/{upn}/deploy` | Deploy and wait for readiness |
//! | POST | `/api/v1/servers/{upn}/destroy` | Tear down |
//! | POST | `/api/v1/servers/{upn}/activity` | Record user activity |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use labgrid_lifecycle::ServerLifecycle;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub lifecycle: Arc<ServerLifecycle>,
}

/// Build the complete API router.
pub fn build_router(lifecycle: Arc<ServerLifecycle>) -> Router {
    let api_state = ApiState { lifecycle };

    let api_routes = Router::new()
        .route("/servers", post(handlers::register_subscription))
        .route(
            "/servers/{upn}",
            get(handlers::get_server).put(handlers::update_server),
        )
        .route("/servers/{upn}/deploy", post(handlers::deploy))
        .route("/servers/{upn}/destroy", post(handlers::destroy))
        .route("/servers/{upn}/activity", post(handlers::update_activity))
        .with_state(api_state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}

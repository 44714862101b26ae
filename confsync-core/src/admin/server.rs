//! Admin HTTP server using axum.

use super::{AdminAuth, AdminConfig};
use crate::backend::SharedStore;
use crate::error::StoreError;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State shared by every admin handler.
pub struct AdminState {
    store: SharedStore,
    auth: AdminAuth,
    started_at: DateTime<Utc>,
}

pub type SharedAdmin = Arc<AdminState>;

impl AdminState {
    pub fn new(store: SharedStore, auth: AdminAuth) -> Self {
        Self {
            store,
            auth,
            started_at: Utc::now(),
        }
    }

    pub fn shared(store: SharedStore, auth: AdminAuth) -> SharedAdmin {
        Arc::new(Self::new(store, auth))
    }

    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        let value = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if self.auth.validate(value) {
            return Ok(());
        }
        Err((
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"confsync\"")],
            Json(serde_json::json!({ "error": "unauthorized" })),
        )
            .into_response())
    }
}

/// Build an axum Router with `/health` and `/keys/{*key}` routes.
pub fn router(state: SharedAdmin) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/keys/{*key}",
            get(get_key_handler)
                .put(put_key_handler)
                .delete(delete_key_handler),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_handler(State(state): State<SharedAdmin>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ok",
        "backend": state.store.name(),
        "supports_watch": state.store.capabilities().supports_watch,
        "uptime_secs": state.uptime_secs(),
    });
    Json(body)
}

fn store_key(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

fn error_response(error: &StoreError) -> Response {
    let status = if error.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(serde_json::json!({ "error": error.to_string() }))).into_response()
}

async fn get_key_handler(
    State(state): State<SharedAdmin>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Response {
    if let Err(denied) = state.authorize(&headers) {
        return denied;
    }
    let key = store_key(&key);
    match state.store.get_values(std::slice::from_ref(&key)).await {
        Ok(values) => Json(values).into_response(),
        Err(e) => {
            warn!(key = %key, error = %e, "Admin read failed");
            error_response(&e.source)
        }
    }
}

async fn put_key_handler(
    State(state): State<SharedAdmin>,
    headers: HeaderMap,
    Path(key): Path<String>,
    body: String,
) -> Response {
    if let Err(denied) = state.authorize(&headers) {
        return denied;
    }
    let key = store_key(&key);
    match state.store.set(&key, &body).await {
        Ok(()) => {
            debug!(key = %key, "Admin set key");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Admin write failed");
            error_response(&e)
        }
    }
}

async fn delete_key_handler(
    State(state): State<SharedAdmin>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Response {
    if let Err(denied) = state.authorize(&headers) {
        return denied;
    }
    let key = store_key(&key);
    match state.store.remove(&key).await {
        Ok(()) => {
            debug!(key = %key, "Admin removed key");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            if !e.is_not_found() {
                warn!(key = %key, error = %e, "Admin delete failed");
            }
            error_response(&e)
        }
    }
}

/// Serve on an already bound listener until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    state: SharedAdmin,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("Admin server stopped");
    Ok(())
}

/// Bind the configured address and serve until `cancel` fires.
pub async fn run(
    config: &AdminConfig,
    state: SharedAdmin,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, open = state.auth.is_open_mode(), "Admin server listening");
    serve(listener, state, cancel).await
}

use std::collections::HashMap;
use std::future::Future;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::HttpServerConfig;
use crate::error::{ChemkgError, Result};
use crate::query::QueryEngine;

/// Largest `limit` a search request may ask for.
const MAX_SEARCH_LIMIT: usize = 1000;

/// JSON query API over a [`QueryEngine`].
pub struct ApiServer {
    query: QueryEngine,
    allowed_origins: Vec<String>,
}

#[derive(Clone)]
struct AppState {
    query: QueryEngine,
}

impl ApiServer {
    pub fn new(query: QueryEngine, config: &HttpServerConfig) -> Self {
        Self {
            query,
            allowed_origins: config.allowed_origins.clone(),
        }
    }

    /// Serve on 127.0.0.1:`port` until `shutdown` resolves.
    pub async fn run<F>(&self, port: u16, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("127.0.0.1:{}", port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            ChemkgError::Config(format!(
                "cannot bind {}: {} (set http_server.port in config.toml to use another port)",
                addr, e
            ))
        })?;

        log::info!("Query API listening on http://{}", addr);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    pub fn router(&self) -> Router {
        let cors = if self.allowed_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<axum::http::HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route("/api/stats", get(handle_stats))
            .route("/api/energies", get(handle_energies))
            .route("/api/molecules", get(handle_molecules))
            .route("/api/search", get(handle_search))
            .route("/api/files", get(handle_files))
            .route("/health", get(handle_health))
            .fallback(handle_not_found)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors),
            )
            .with_state(AppState {
                query: self.query.clone(),
            })
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn status_for(err: &ChemkgError) -> StatusCode {
    match err {
        ChemkgError::Query(_) | ChemkgError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Queries read the store file, so they run on the blocking pool.
async fn run_query<T, F>(query: QueryEngine, f: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce(&QueryEngine) -> Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || f(&query)).await {
        Ok(Ok(value)) => Json(value).into_response(),
        Ok(Err(e)) => {
            let status = status_for(&e);
            if status.is_server_error() {
                log::error!("api: query failed: {}", e);
            }
            error_response(status, e.to_string())
        }
        Err(e) => {
            log::error!("api: query task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "query task failed")
        }
    }
}

async fn handle_stats(State(state): State<AppState>) -> Response {
    run_query(state.query, |q| q.aggregate_stats()).await
}

async fn handle_energies(State(state): State<AppState>) -> Response {
    run_query(state.query, |q| q.energies_by_file()).await
}

async fn handle_molecules(State(state): State<AppState>) -> Response {
    run_query(state.query, |q| q.molecular_properties_by_file()).await
}

async fn handle_files(State(state): State<AppState>) -> Response {
    run_query(state.query, |q| q.list_files()).await
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(text) = params.get("q").filter(|q| !q.trim().is_empty()).cloned() else {
        return error_response(StatusCode::BAD_REQUEST, "missing query parameter 'q'");
    };

    let limit = match params.get("limit") {
        None => state.query.options().search_limit,
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) if (1..=MAX_SEARCH_LIMIT).contains(&n) => n,
            _ => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("'limit' must be an integer between 1 and {}", MAX_SEARCH_LIMIT),
                )
            }
        },
    };

    run_query(state.query, move |q| q.search_limited(&text, limit)).await
}

async fn handle_health() -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

async fn handle_not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

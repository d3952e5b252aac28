//! Purpose: Serve an in-memory, size-limited parameter store over HTTP.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum-based loopback server speaking the protocol `HttpStore` consumes.
//! Invariants: Error envelopes carry the same codes `MemoryStore` produces.
//! Invariants: Loopback-only unless explicitly allowed; state lives in memory only.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use paramstash::api::{
    CODE_ACCESS_DENIED, CODE_INVALID_REQUEST, CODE_NOT_FOUND, CODE_TOO_LARGE, Error, ErrorKind,
    MemoryStore, ParamStore, remote_error,
};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub token: Option<String>,
    pub max_value_bytes: usize,
    pub allow_non_loopback: bool,
}

struct AppState {
    store: MemoryStore,
    token: Option<String>,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let state = Arc::new(AppState {
        store: MemoryStore::with_max_value_bytes(config.max_value_bytes),
        token: config.token,
    });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v0/limits", get(limits))
        .route("/v0/params", get(list_params))
        .route(
            "/v0/params/value",
            get(get_param).put(put_param).delete(delete_param),
        )
        .route("/v0/params/exists", get(param_exists))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    info!(bind = %config.bind, max_value_bytes = config.max_value_bytes, "serving parameters");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::InvalidCall)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }
    if config.max_value_bytes == 0 {
        return Err(Error::new(ErrorKind::InvalidCall)
            .with_message("--max-value-bytes must be greater than zero")
            .with_hint("Use a positive value like 4096."));
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

fn authorize(headers: &HeaderMap, state: &AppState) -> Result<(), Error> {
    let Some(token) = state.token.as_ref() else {
        return Ok(());
    };
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Err(remote_error(CODE_ACCESS_DENIED, "missing bearer token"));
    };
    let value = value.to_str().unwrap_or_default();
    let expected = format!("Bearer {token}");
    if value != expected {
        return Err(remote_error(CODE_ACCESS_DENIED, "invalid bearer token"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct NameQuery {
    name: String,
    decrypt: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct PutRequest {
    name: String,
    value: String,
    key_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

async fn healthz() -> Response {
    json_response(json!({ "ok": true }))
}

async fn limits(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    json_response(json!({ "max_value_bytes": state.store.max_value_bytes() }))
}

async fn list_params(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    match state.store.list_names() {
        Ok(names) => json_response(json!({ "names": names })),
        Err(err) => error_response(err),
    }
}

async fn get_param(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<NameQuery>,
) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    let decrypt = query.decrypt.unwrap_or(true);
    match state.store.get_value(&query.name, decrypt) {
        Ok(value) => json_response(json!({ "param": { "name": query.name, "value": value } })),
        Err(err) => error_response(err),
    }
}

async fn put_param(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<PutRequest>,
) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    let key_id = payload.key_id.unwrap_or_default();
    match state.store.put_value(&payload.name, &payload.value, &key_id) {
        Ok(()) => json_response(json!({ "param": { "name": payload.name } })),
        Err(err) => error_response(err),
    }
}

async fn delete_param(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<NameQuery>,
) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    match state.store.delete_value(&query.name) {
        Ok(()) => json_response(json!({ "deleted": query.name })),
        Err(err) => error_response(err),
    }
}

async fn param_exists(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<NameQuery>,
) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    match state.store.exists(&query.name) {
        Ok(exists) => json_response(json!({ "exists": exists })),
        Err(err) => error_response(err),
    }
}

fn json_response(payload: serde_json::Value) -> Response {
    let mut response = Json(payload).into_response();
    response
        .headers_mut()
        .insert("paramstash-version", HeaderValue::from_static("0"));
    response
}

fn status_for_code(code: Option<&str>) -> StatusCode {
    match code {
        Some(CODE_NOT_FOUND) => StatusCode::NOT_FOUND,
        Some(CODE_TOO_LARGE) => StatusCode::PAYLOAD_TOO_LARGE,
        Some(CODE_INVALID_REQUEST) => StatusCode::BAD_REQUEST,
        Some(CODE_ACCESS_DENIED) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for_code(err.code());
    let body = ErrorEnvelope {
        error: ErrorBody {
            code: err.code().unwrap_or("Internal").to_string(),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
            name: err.name().map(str::to_string),
        },
    };
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert("paramstash-version", HeaderValue::from_static("0"));
    response
}

//! Purpose: Provide the HTTP/CSV server for csvd.
//! Exports: `ServeConfig`, `serve`, `validate_config`.
//! Role: Axum-based adapter translating routes into `LocalClient` calls.
//! Invariants: Storage calls run on blocking workers, never on the async executor.
//! Invariants: Error kinds map to status codes without inspecting messages.
//! Invariants: The store is opened once here and closed after the server drains.

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path as AxumPath, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use csvd::api::{DeleteOutcome, Error, ErrorKind, LocalClient, Store, TableScan, listing};

const CSV_CONTENT_TYPE: &str = "text/csv";

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub allow_non_loopback: bool,
    pub max_body_bytes: u64,
    pub max_concurrent_scans: usize,
}

#[derive(Clone)]
struct AppState {
    client: LocalClient,
    scan_semaphore: Arc<Semaphore>,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config.max_body_bytes.try_into().map_err(|_| {
        Error::new(ErrorKind::InvalidInput).with_message("--max-body-bytes is too large")
    })?;

    let store = Arc::new(Store::open(&config.data_dir)?);
    let state = Arc::new(AppState {
        client: LocalClient::new(store.clone()),
        scan_semaphore: Arc::new(Semaphore::new(config.max_concurrent_scans)),
    });

    let app = router(state).layer(DefaultBodyLimit::max(max_body_bytes));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    tracing::info!(bind = %config.bind, data_dir = %config.data_dir.display(), "csvd listening");

    let result = run_until_shutdown(listener, app).await;
    close_store(store);
    result
}

/// Serves until the listener fails or a shutdown signal arrives, then drains
/// in-flight requests. The router (and its store handle) is dropped on return.
async fn run_until_shutdown(listener: tokio::net::TcpListener, app: Router) -> Result<(), Error> {
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

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/tables", get(list_tables))
        .route(
            "/tables/:name",
            post(post_table).get(read_table).delete(delete_table),
        )
        .route("/tables/:name/tags/:tag", post(tag_table).delete(untag_table))
        .route("/tags", get(list_tags))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Closes the store once no blocking worker still holds it.
fn close_store(store: Arc<Store>) {
    match Arc::try_unwrap(store) {
        Ok(store) => {
            if let Err(err) = store.close() {
                tracing::error!(error = %err, "failed to close store");
            }
        }
        Err(_) => tracing::warn!("store still in use at shutdown; releasing on exit"),
    }
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

pub fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::InvalidInput)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::InvalidInput)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 16777216."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::InvalidInput)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    if config.max_concurrent_scans == 0 {
        return Err(Error::new(ErrorKind::InvalidInput)
            .with_message("--max-concurrent-scans must be greater than zero")
            .with_hint("Use a positive value like 64."));
    }

    if config.data_dir.is_file() {
        return Err(Error::new(ErrorKind::InvalidInput)
            .with_message("data directory path is a file")
            .with_hint("Point --dir at a directory; csvd creates its database file inside it."));
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
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
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

/// Runs a storage call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("storage worker failed")
            .with_source(err)
    })?
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    tag: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
}

async fn healthz() -> Response {
    Json(json!({ "ok": true })).into_response()
}

async fn list_tables(State(state): State<Arc<AppState>>, Query(query): Query<ListQuery>) -> Response {
    let client = state.client.clone();
    let tag = query.tag.filter(|tag| !tag.is_empty());
    let result = blocking(move || client.list_tables(tag.as_deref())).await;
    match result {
        Ok(defs) => csv_response(listing::tables_csv(&defs)),
        Err(err) => error_response(err),
    }
}

async fn post_table(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
    body: Bytes,
) -> Response {
    let client = state.client.clone();
    let table = name.clone();
    let result = blocking(move || client.ingest(&table, &body)).await;
    match result {
        Ok(outcome) => {
            tracing::debug!(table = %name, rows = outcome.rows_written, created = outcome.created, "ingested");
            csv_response(format!(
                "table,created,rows_written\n{name},{},{}\n",
                outcome.created, outcome.rows_written
            ))
        }
        Err(err) => error_response(err),
    }
}

async fn read_table(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> Response {
    let permit = match state.scan_semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            return error_response_with_status(
                Error::new(ErrorKind::Internal)
                    .with_message("too many concurrent table scans")
                    .with_hint("Try again later."),
                StatusCode::SERVICE_UNAVAILABLE,
            );
        }
    };

    let client = state.client.clone();
    let table = name.clone();
    let scan = match blocking(move || client.read_table(&table)).await {
        Ok(scan) => scan,
        Err(err) => return error_response(err),
    };

    let (tx, rx) = mpsc::channel::<Result<Bytes, Error>>(16);
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let TableScan { def, mut rows } = scan;
        let mut header = def.header_line().into_bytes();
        header.push(b'\n');
        if tx.blocking_send(Ok(Bytes::from(header))).is_err() {
            return;
        }
        loop {
            match rows.next_row() {
                Ok(Some(mut row)) => {
                    row.push(b'\n');
                    if tx.blocking_send(Ok(Bytes::from(row))).is_err() {
                        tracing::debug!(table = %name, "client went away during scan");
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(table = %name, error = %err, "table scan failed");
                    let _ = tx.blocking_send(Err(err));
                    break;
                }
            }
        }
        rows.close();
    });

    let stream = ReceiverStream::new(rx)
        .map(|result| result.map_err(|err| std::io::Error::other(err.to_string())));
    let mut response = Response::new(Body::from_stream(stream));
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static(CSV_CONTENT_TYPE));
    response
}

async fn delete_table(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
    body: Bytes,
) -> Response {
    let client = state.client.clone();
    let result = blocking(move || client.delete(&name, &body)).await;
    match result {
        Ok(DeleteOutcome::Table(_)) => text_response("table deleted\n"),
        Ok(DeleteOutcome::Rows { deleted }) => text_response(format!("{deleted} rows deleted\n")),
        Err(err) => error_response(err),
    }
}

async fn tag_table(
    State(state): State<Arc<AppState>>,
    AxumPath((table, tag)): AxumPath<(String, String)>,
) -> Response {
    let client = state.client.clone();
    match blocking(move || client.tag(&table, &tag)).await {
        Ok(()) => text_response("tagged\n"),
        Err(err) => error_response(err),
    }
}

async fn untag_table(
    State(state): State<Arc<AppState>>,
    AxumPath((table, tag)): AxumPath<(String, String)>,
) -> Response {
    let client = state.client.clone();
    match blocking(move || client.untag(&table, &tag)).await {
        Ok(()) => text_response("untagged\n"),
        Err(err) => error_response(err),
    }
}

async fn list_tags(State(state): State<Arc<AppState>>) -> Response {
    let client = state.client.clone();
    match blocking(move || client.tag_info()).await {
        Ok(infos) => csv_response(listing::tags_csv(&infos)),
        Err(err) => error_response(err),
    }
}

fn csv_response(body: String) -> Response {
    let mut response = body.into_response();
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static(CSV_CONTENT_TYPE));
    response
}

fn text_response(body: impl Into<String>) -> Response {
    body.into().into_response()
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::Storage | ErrorKind::MalformedKey | ErrorKind::Io | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(err.kind());
    error_response_with_status(err, status)
}

fn error_response_with_status(err: Error, status: StatusCode) -> Response {
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
            table: err.table().map(str::to_string),
            key: err.key().map(str::to_string),
        },
    };
    (status, Json(body)).into_response()
}

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::{BridgeError, Result};
use crate::orchestrator::{
    ApplyCodeRequest, InstallPackagesRequest, Orchestrator, RunCommandRequest,
};

const EVENT_BUFFER: usize = 64;

/// HTTP surface of the orchestrator, `/sandbox/*`.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/sandbox/create", post(create))
        .route("/sandbox/apply-code", post(apply_code))
        .route("/sandbox/install-packages", post(install_packages))
        .route("/sandbox/run-command", post(run_command))
        .route("/sandbox/destroy", post(destroy))
        .route("/sandbox/status", get(status))
        .fallback(not_found)
        .with_state(orchestrator)
        .layer(middleware::from_fn(cors))
        .layer(TraceLayer::new_for_http())
}

/// Answers preflights directly and stamps every response with the
/// permissive CORS headers.
async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    response
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Parse a JSON body; an empty body counts as `{}`.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(body)
        .map_err(|e| BridgeError::Validation(format!("Malformed request body: {}", e)))
}

fn to_sse_event<T: Serialize>(event: &T) -> Event {
    Event::default()
        .json_data(event)
        .unwrap_or_else(|_| Event::default().data("{}"))
}

/// Relay everything sent on `rx` as `data:` events until the sender is gone.
fn event_stream<T>(rx: mpsc::Receiver<T>) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>
where
    T: Serialize + Send + 'static,
{
    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(to_sse_event(&event)), rx))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn create(State(orchestrator): State<Arc<Orchestrator>>) -> Result<Response> {
    let created = orchestrator.create_sandbox().await?;
    Ok(Json(created).into_response())
}

async fn apply_code(
    State(orchestrator): State<Arc<Orchestrator>>,
    body: Bytes,
) -> Result<Response> {
    let active = orchestrator.active_session().await?;
    let request: ApplyCodeRequest = parse_body(&body)?;

    if !request.stream {
        let summary = orchestrator.apply_code(&active, request.files, None).await;
        return Ok(Json(summary).into_response());
    }

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(async move {
        orchestrator.apply_code(&active, request.files, Some(tx)).await;
    });
    Ok(event_stream(rx).into_response())
}

async fn install_packages(
    State(orchestrator): State<Arc<Orchestrator>>,
    body: Bytes,
) -> Result<Response> {
    let active = orchestrator.active_session().await?;
    let request: InstallPackagesRequest = parse_body(&body)?;
    crate::orchestrator::validate_packages(&request.packages)?;

    if !request.stream {
        let summary = orchestrator
            .install_packages(&active, request.packages, None)
            .await?;
        return Ok(Json(summary).into_response());
    }

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(async move {
        if let Err(e) = orchestrator
            .install_packages(&active, request.packages, Some(tx))
            .await
        {
            warn!(error = %e, "Package installation failed");
        }
    });
    Ok(event_stream(rx).into_response())
}

async fn run_command(
    State(orchestrator): State<Arc<Orchestrator>>,
    body: Bytes,
) -> Result<Response> {
    let active = orchestrator.active_session().await?;
    let request: RunCommandRequest = parse_body(&body)?;
    let result = orchestrator.run_command(&active, &request.command).await?;
    Ok(Json(result).into_response())
}

async fn destroy(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    Json(orchestrator.destroy().await)
}

async fn status(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    Json(orchestrator.status().await)
}

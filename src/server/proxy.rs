//! Client-facing `/api/*` routes that forward to the orchestrator.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::envelope::ErrorEnvelope;
use crate::error::{BridgeError, Result};

pub const WORKER_ERROR_DETAILS: &str = "Error communicating with Cloudflare Worker";

/// Forwarding target shared by every proxy route.
#[derive(Clone)]
pub struct ProxyState {
    client: reqwest::Client,
    backend_url: String,
}

impl ProxyState {
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            backend_url: backend_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    /// POST `body` to `<backend>/sandbox/<path>` and relay the answer:
    /// event streams pass through byte for byte, everything else must be JSON.
    async fn forward(&self, path: &str, body: &Value) -> Result<Response> {
        let url = format!("{}/sandbox/{}", self.backend_url, path);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::UpstreamStatus {
                status: status.as_u16(),
            });
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));

        if is_event_stream {
            return Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache")
                .header(CONNECTION, "keep-alive")
                .body(Body::from_stream(response.bytes_stream()))
                .map_err(|e| BridgeError::Other(e.into()));
        }

        let payload: Value = response.json().await?;
        Ok(Json(payload).into_response())
    }
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/api/create-ai-sandbox", post(create_ai_sandbox))
        .route("/api/apply-ai-code-stream", post(apply_ai_code_stream))
        .route("/api/install-packages", post(install_packages))
        .route("/api/run-command", post(run_command))
        .route("/api/kill-sandbox", post(kill_sandbox))
        .with_state(Arc::new(state))
        .layer(TraceLayer::new_for_http())
}

/// Every proxy failure is a 500 carrying the fixed details string.
fn worker_error(route: &str, err: BridgeError) -> Response {
    error!(route, error = %err, "Proxy request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorEnvelope::with_details(err.to_string(), WORKER_ERROR_DETAILS)),
    )
        .into_response()
}

async fn relay(state: &ProxyState, route: &str, path: &str, body: Result<Value>) -> Response {
    info!(route, "Proxying to sandbox worker...");
    let result = match body {
        Ok(body) => state.forward(path, &body).await,
        Err(e) => Err(e),
    };
    result.unwrap_or_else(|e| worker_error(route, e))
}

fn client_body(body: &Bytes) -> Result<Value> {
    Ok(serde_json::from_slice(body)?)
}

async fn create_ai_sandbox(State(state): State<Arc<ProxyState>>) -> Response {
    relay(&state, "create-ai-sandbox", "create", Ok(Value::Object(Default::default()))).await
}

async fn apply_ai_code_stream(State(state): State<Arc<ProxyState>>, body: Bytes) -> Response {
    relay(&state, "apply-ai-code-stream", "apply-code", client_body(&body)).await
}

async fn install_packages(State(state): State<Arc<ProxyState>>, body: Bytes) -> Response {
    relay(&state, "install-packages", "install-packages", client_body(&body)).await
}

async fn run_command(State(state): State<Arc<ProxyState>>, body: Bytes) -> Response {
    relay(&state, "run-command", "run-command", client_body(&body)).await
}

async fn kill_sandbox(State(state): State<Arc<ProxyState>>) -> Response {
    relay(&state, "kill-sandbox", "destroy", Ok(Value::Object(Default::default()))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Request;
    use axum::http::Method;
    use futures::{stream, StreamExt};
    use http_body_util::BodyExt;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;
    use tower::ServiceExt;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn post_raw(uri: &str, body: &str) -> Request {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_sends_empty_object_and_relays_json() {
        let backend = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandbox/create"))
            .and(body_json(json!({})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "sandboxId": "sandbox-1",
                "url": "https://5173-sandbox-1.example.dev",
                "message": "Cloudflare sandbox created and Vite React app initialized"
            })))
            .expect(1)
            .mount(&backend)
            .await;

        let app = router(ProxyState::new(backend.uri()));
        let response = app
            .oneshot(post_raw("/api/create-ai-sandbox", r#"{"ignored": true}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["sandboxId"], "sandbox-1");
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn run_command_forwards_body() {
        let backend = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandbox/run-command"))
            .and(body_json(json!({"command": "ls -la"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "output": "total 0", "exitCode": 0
            })))
            .mount(&backend)
            .await;

        let app = router(ProxyState::new(format!("{}/", backend.uri())));
        let response = app
            .oneshot(post_raw("/api/run-command", r#"{"command":"ls -la"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["output"], "total 0");
    }

    #[tokio::test]
    async fn event_stream_is_relayed_verbatim() {
        let sse = "data: {\"type\":\"start\",\"total\":1}\n\n\
                   data: {\"type\":\"complete\",\"applied\":[\"src/App.jsx\"],\"failed\":[]}\n\n";
        let backend = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandbox/apply-code"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&backend)
            .await;

        let app = router(ProxyState::new(backend.uri()));
        let response = app
            .oneshot(post_raw(
                "/api/apply-ai-code-stream",
                r#"{"files":[{"path":"src/App.jsx","content":"x"}]}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()[CONNECTION], "keep-alive");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], sse.as_bytes());
    }

    #[tokio::test]
    async fn event_stream_frames_arrive_before_upstream_finishes() {
        const FIRST: &[u8] = b"data: {\"type\":\"start\",\"packages\":[\"zod\"]}\n\n";
        const SECOND: &[u8] = b"data: {\"type\":\"complete\",\"success\":true}\n\n";

        let (release, held) = tokio::sync::oneshot::channel::<()>();
        let held = Arc::new(tokio::sync::Mutex::new(Some(held)));
        let upstream = Router::new().route(
            "/sandbox/install-packages",
            post(move || {
                let held = held.clone();
                async move {
                    let gate = held.lock().await.take();
                    let first = stream::once(async { Ok::<_, std::io::Error>(Bytes::from_static(FIRST)) });
                    let second = stream::once(async move {
                        if let Some(gate) = gate {
                            let _ = gate.await;
                        }
                        Ok(Bytes::from_static(SECOND))
                    });
                    (
                        [(CONTENT_TYPE, "text/event-stream")],
                        Body::from_stream(first.chain(second)),
                    )
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, upstream).await.unwrap();
        });

        let app = router(ProxyState::new(format!("http://{}", addr)));
        let response = app
            .oneshot(post_raw("/api/install-packages", r#"{"packages":["zod"]}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The upstream is still holding its second event.
        let mut body = response.into_body();
        let first = timeout(Duration::from_secs(2), body.frame())
            .await
            .expect("first event was buffered behind the open upstream")
            .unwrap()
            .unwrap()
            .into_data()
            .unwrap();
        assert!(!first.is_empty());
        assert!(FIRST.starts_with(&first));

        release.send(()).unwrap();
        let rest = body.collect().await.unwrap().to_bytes();
        let mut relayed = first.to_vec();
        relayed.extend_from_slice(&rest);
        assert_eq!(relayed, [FIRST, SECOND].concat());
    }

    #[tokio::test]
    async fn non_success_status_becomes_envelope() {
        let backend = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandbox/install-packages"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({"error": "No active sandbox"})))
            .mount(&backend)
            .await;

        let app = router(ProxyState::new(backend.uri()));
        let response = app
            .oneshot(post_raw("/api/install-packages", r#"{"packages":["zod"]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Worker response not ok: 409");
        assert_eq!(body["details"], WORKER_ERROR_DETAILS);
    }

    #[tokio::test]
    async fn unreachable_backend_becomes_envelope() {
        let app = router(ProxyState::new("http://127.0.0.1:1"));
        let response = app
            .oneshot(post_raw("/api/run-command", r#"{"command":"ls"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(!body["error"].as_str().unwrap().is_empty());
        assert_eq!(body["details"], WORKER_ERROR_DETAILS);
    }

    #[tokio::test]
    async fn malformed_backend_json_becomes_envelope() {
        let backend = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandbox/destroy"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html>oops</html>", "text/html"))
            .mount(&backend)
            .await;

        let app = router(ProxyState::new(backend.uri()));
        let response = app
            .oneshot(post_raw("/api/kill-sandbox", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["details"], WORKER_ERROR_DETAILS);
    }

    #[tokio::test]
    async fn malformed_client_body_becomes_envelope() {
        let backend = MockServer::start().await;
        let app = router(ProxyState::new(backend.uri()));
        let response = app
            .oneshot(post_raw("/api/run-command", "{oops"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["details"], WORKER_ERROR_DETAILS);
        assert!(backend.received_requests().await.unwrap().is_empty());
    }
}

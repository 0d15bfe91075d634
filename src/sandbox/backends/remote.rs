//! HTTP client for a remote sandbox runtime service.
//!
//! The service owns the actual containers; this adapter only speaks its JSON
//! API, one sandbox per session id:
//!
//! | Operation      | Request                                       |
//! |----------------|-----------------------------------------------|
//! | create         | `POST   /v1/sandboxes`                        |
//! | execute        | `POST   /v1/sandboxes/{id}/exec`              |
//! | write file     | `PUT    /v1/sandboxes/{id}/files`             |
//! | start process  | `POST   /v1/sandboxes/{id}/processes`         |
//! | kill process   | `DELETE /v1/sandboxes/{id}/processes/{pid}`   |
//! | expose port    | `POST   /v1/sandboxes/{id}/ports`             |
//! | destroy        | `DELETE /v1/sandboxes/{id}`                   |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::types::RemoteConfig;
use crate::error::{BridgeError, Result};
use crate::sandbox::traits::{ProcessHandle, SandboxProvider, SandboxRuntime};
use crate::sandbox::CommandResult;

/// Shared HTTP plumbing for provider and sandboxes.
#[derive(Clone)]
struct RuntimeApi {
    base_url: String,
    api_token: Option<String>,
    http: reqwest::Client,
}

impl RuntimeApi {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let builder = self.http.request(method, url);
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        let resp = builder.send().await.map_err(|e| BridgeError::RuntimeApi {
            message: format!("{} request failed: {}", what, e),
            status: None,
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable>".to_string());
            return Err(BridgeError::RuntimeApi {
                message: format!("{} returned {}: {}", what, status, body_text),
                status: Some(status.as_u16()),
            });
        }

        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> Result<T> {
        let resp = self.send(builder, what).await?;
        resp.json::<T>().await.map_err(|e| BridgeError::RuntimeApi {
            message: format!("Failed to parse {} response: {}", what, e),
            status: None,
        })
    }
}

/// Provider backed by a remote sandbox runtime.
pub struct RemoteProvider {
    api: RuntimeApi,
}

impl RemoteProvider {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(BridgeError::BackendNotAvailable {
                backend: "remote".to_string(),
                reason: "runtime.remote.base_url is not configured".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            api: RuntimeApi {
                base_url: config.base_url,
                api_token: config.api_token,
                http,
            },
        })
    }
}

#[derive(Debug, Deserialize)]
struct CreatedSandbox {
    id: String,
}

#[async_trait]
impl SandboxProvider for RemoteProvider {
    fn name(&self) -> &str {
        "remote"
    }

    async fn acquire(&self, session_id: &str) -> Result<Arc<dyn SandboxRuntime>> {
        let created: CreatedSandbox = self
            .api
            .send_json(
                self.api
                    .request(Method::POST, "/v1/sandboxes")
                    .json(&json!({ "id": session_id })),
                "create sandbox",
            )
            .await?;

        info!(session_id = %session_id, remote_id = %created.id, "Remote sandbox created");

        Ok(Arc::new(RemoteSandbox {
            session_id: session_id.to_string(),
            remote_id: created.id,
            api: self.api.clone(),
        }))
    }
}

/// A sandbox living in the remote runtime.
pub struct RemoteSandbox {
    session_id: String,
    remote_id: String,
    api: RuntimeApi,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecResponse {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default, alias = "exit_code")]
    exit_code: i32,
}

#[derive(Debug, Deserialize)]
struct StartedProcess {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ExposedPort {
    url: String,
}

#[derive(Serialize)]
struct WriteFileRequest<'a> {
    path: &'a str,
    content: &'a str,
}

impl RemoteSandbox {
    fn path(&self, suffix: &str) -> String {
        format!("/v1/sandboxes/{}{}", self.remote_id, suffix)
    }
}

#[async_trait]
impl SandboxRuntime for RemoteSandbox {
    fn name(&self) -> &str {
        "remote"
    }

    fn sandbox_id(&self) -> &str {
        &self.session_id
    }

    async fn execute(&self, command: &str) -> Result<CommandResult> {
        debug!(sandbox = %self.remote_id, command = %command, "Executing via runtime API");
        let parsed: ExecResponse = self
            .api
            .send_json(
                self.api
                    .request(Method::POST, &self.path("/exec"))
                    .json(&json!({ "command": command })),
                "exec",
            )
            .await?;

        Ok(CommandResult {
            stdout: parsed.stdout,
            stderr: parsed.stderr,
            exit_code: parsed.exit_code,
        })
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.api
            .send(
                self.api
                    .request(Method::PUT, &self.path("/files"))
                    .json(&WriteFileRequest { path, content }),
                "write file",
            )
            .await?;
        Ok(())
    }

    async fn start_process(&self, command: &str) -> Result<ProcessHandle> {
        let started: StartedProcess = self
            .api
            .send_json(
                self.api
                    .request(Method::POST, &self.path("/processes"))
                    .json(&json!({ "command": command })),
                "start process",
            )
            .await?;
        Ok(ProcessHandle { id: started.id })
    }

    async fn kill_process(&self, process_id: &str) -> Result<()> {
        self.api
            .send(
                self.api
                    .request(Method::DELETE, &self.path(&format!("/processes/{}", process_id))),
                "kill process",
            )
            .await?;
        Ok(())
    }

    async fn expose_port(&self, port: u16) -> Result<String> {
        let exposed: ExposedPort = self
            .api
            .send_json(
                self.api
                    .request(Method::POST, &self.path("/ports"))
                    .json(&json!({ "port": port })),
                "expose port",
            )
            .await?;

        if exposed.url.starts_with("http") {
            Ok(exposed.url)
        } else {
            Ok(format!("https://{}", exposed.url))
        }
    }

    async fn shutdown(&self) -> Result<()> {
        let resp = self
            .api
            .request(Method::DELETE, &self.path(""))
            .send()
            .await?;

        // Already gone counts as shut down
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND {
            info!(sandbox = %self.remote_id, "Remote sandbox destroyed");
            Ok(())
        } else {
            Err(BridgeError::RuntimeApi {
                message: format!("destroy returned {}", resp.status()),
                status: Some(resp.status().as_u16()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, token: Option<&str>) -> RemoteProvider {
        RemoteProvider::new(RemoteConfig {
            base_url: server.uri(),
            api_token: token.map(String::from),
            timeout_seconds: 5,
        })
        .unwrap()
    }

    async fn acquire(server: &MockServer) -> Arc<dyn SandboxRuntime> {
        Mock::given(method("POST"))
            .and(path("/v1/sandboxes"))
            .and(body_json(json!({ "id": "sandbox-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "rt-9" })))
            .mount(server)
            .await;
        provider(server, None).acquire("sandbox-1").await.unwrap()
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let result = RemoteProvider::new(RemoteConfig {
            base_url: " ".to_string(),
            ..RemoteConfig::default()
        });
        assert!(matches!(result, Err(BridgeError::BackendNotAvailable { .. })));
    }

    #[tokio::test]
    async fn acquire_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sandboxes"))
            .and(header("authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "rt-1" })))
            .expect(1)
            .mount(&server)
            .await;

        let sandbox = provider(&server, Some("t0ken"))
            .acquire("sandbox-1")
            .await
            .unwrap();
        assert_eq!(sandbox.sandbox_id(), "sandbox-1");

        // Later calls address the runtime's own id.
        Mock::given(method("DELETE"))
            .and(path("/v1/sandboxes/rt-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        sandbox.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn execute_parses_camel_case_exit_code() {
        let server = MockServer::start().await;
        let sandbox = acquire(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/sandboxes/rt-9/exec"))
            .and(body_json(json!({ "command": "echo hi" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({ "stdout": "hi\n", "stderr": "", "exitCode": 3 }),
            ))
            .mount(&server)
            .await;

        let result = sandbox.execute("echo hi").await.unwrap();
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn expose_port_normalizes_bare_hosts() {
        let server = MockServer::start().await;
        let sandbox = acquire(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/sandboxes/rt-9/ports"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "url": "5173-rt-9.example.dev" })),
            )
            .mount(&server)
            .await;

        let url = sandbox.expose_port(5173).await.unwrap();
        assert_eq!(url, "https://5173-rt-9.example.dev");
    }

    #[tokio::test]
    async fn non_success_status_surfaces_runtime_error() {
        let server = MockServer::start().await;
        let sandbox = acquire(&server).await;
        Mock::given(method("PUT"))
            .and(path("/v1/sandboxes/rt-9/files"))
            .respond_with(ResponseTemplate::new(507).set_body_string("disk full"))
            .mount(&server)
            .await;

        let err = sandbox.write_file("/workspace/a.txt", "x").await.unwrap_err();
        match err {
            BridgeError::RuntimeApi { message, status } => {
                assert_eq!(status, Some(507));
                assert!(message.contains("disk full"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_tolerates_missing_sandbox() {
        let server = MockServer::start().await;
        let sandbox = acquire(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/v1/sandboxes/rt-9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(sandbox.shutdown().await.is_ok());
    }
}

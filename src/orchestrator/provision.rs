use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use super::readiness::wait_for_dev_server;
use super::scaffold::{self, SCAFFOLD_PATHS};
use super::{shell_quote, Orchestrator};
use crate::error::{BridgeError, Result};
use crate::sandbox::SandboxRuntime;
use crate::session::{ActiveSession, SandboxSession};

pub const CREATE_MESSAGE: &str = "Cloudflare sandbox created and Vite React app initialized";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    pub success: bool,
    pub sandbox_id: String,
    pub url: String,
    pub message: String,
}

/// Undo action for a remote resource acquired during provisioning.
enum Compensation {
    KillProcess {
        runtime: Arc<dyn SandboxRuntime>,
        process_id: String,
    },
    DestroySandbox(Arc<dyn SandboxRuntime>),
}

/// Compensations for the resources a create has acquired so far.
///
/// Dropping an armed rollback (the create future was cancelled) spawns the
/// compensations onto the runtime instead of leaking the sandbox.
#[derive(Default)]
struct Rollback {
    steps: Vec<Compensation>,
}

impl Rollback {
    fn push(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    /// The resources now belong to a committed session.
    fn disarm(&mut self) {
        self.steps.clear();
    }

    async fn run(mut self) {
        run_compensations(std::mem::take(&mut self.steps)).await;
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        if self.steps.is_empty() {
            return;
        }
        let steps = std::mem::take(&mut self.steps);
        match Handle::try_current() {
            Ok(handle) => {
                warn!(steps = steps.len(), "Sandbox creation abandoned, rolling back");
                handle.spawn(run_compensations(steps));
            }
            Err(_) => warn!(
                steps = steps.len(),
                "Sandbox creation abandoned outside a runtime, resources leaked"
            ),
        }
    }
}

/// Run compensations newest first. Failures are logged.
async fn run_compensations(steps: Vec<Compensation>) {
    for step in steps.into_iter().rev() {
        match step {
            Compensation::KillProcess {
                runtime,
                process_id,
            } => {
                if let Err(e) = runtime.kill_process(&process_id).await {
                    warn!(process_id = %process_id, error = %e, "Rollback: failed to stop dev server");
                }
            }
            Compensation::DestroySandbox(runtime) => {
                if let Err(e) = runtime.shutdown().await {
                    warn!(sandbox_id = runtime.sandbox_id(), error = %e, "Rollback: failed to destroy sandbox");
                }
            }
        }
    }
}

impl Orchestrator {
    /// Provision a fresh sandbox with the Vite template and make it the
    /// active session, replacing whatever was active before.
    pub async fn create_sandbox(&self) -> Result<CreateResponse> {
        let _creating = self.store.begin_creation().await;
        info!("Creating sandbox");

        if let Some(previous) = self.store.take_active().await {
            info!(session_id = %previous.session.session_id, "Cleaning up existing sandbox");
            previous.terminate().await;
        }

        let session_id = self.store.generate_session_id();
        let mut rollback = Rollback::default();

        let active = match self.provision(&session_id, &mut rollback).await {
            Ok(active) => active,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Sandbox creation failed, rolling back");
                rollback.run().await;
                return Err(e);
            }
        };

        let response = CreateResponse {
            success: true,
            sandbox_id: active.session.session_id.clone(),
            url: active.session.url.clone(),
            message: CREATE_MESSAGE.to_string(),
        };

        let stale = self.store.commit(active, SCAFFOLD_PATHS).await;
        rollback.disarm();
        if let Some(stale) = stale {
            stale.terminate().await;
        }
        info!(session_id = %response.sandbox_id, url = %response.url, "Sandbox ready");
        Ok(response)
    }

    async fn provision(&self, session_id: &str, rollback: &mut Rollback) -> Result<ActiveSession> {
        let port = self.config.dev_server_port;

        let runtime = self.provider.acquire(session_id).await?;
        rollback.push(Compensation::DestroySandbox(runtime.clone()));
        info!(session_id, runtime = runtime.name(), "Sandbox acquired");

        let probe = runtime.execute(r#"echo "Hello from sandbox""#).await?;
        info!(
            stdout = %probe.stdout.trim(),
            exit_code = probe.exit_code,
            "Sandbox probe result"
        );

        let mkdir = format!("mkdir -p {}", shell_quote(&self.workspace_path("src")));
        self.run_checked(runtime.as_ref(), &mkdir).await?;

        info!("Writing Vite React app files");
        let manifest = scaffold::manifest_file()?;
        runtime
            .write_file(&self.workspace_path(manifest.path), &manifest.content)
            .await?;
        info!("✓ {}", manifest.path);

        for file in scaffold::project_files(port) {
            runtime
                .write_file(&self.workspace_path(file.path), &file.content)
                .await?;
            info!("✓ {}", file.path);
        }

        info!("Installing npm packages");
        let install = self
            .run_checked(runtime.as_ref(), &self.in_workspace("npm install"))
            .await?;
        info!(stdout_len = install.stdout.len(), "npm install finished");

        info!("Starting Vite dev server");
        let process = runtime.start_process(&self.in_workspace("npm run dev")).await?;
        rollback.push(Compensation::KillProcess {
            runtime: runtime.clone(),
            process_id: process.id.clone(),
        });

        wait_for_dev_server(runtime.as_ref(), port, &self.config).await?;

        let url = runtime.expose_port(port).await?;
        info!(port, url = %url, "Dev server exposed");

        Ok(ActiveSession {
            session: SandboxSession::new(
                session_id.to_string(),
                url,
                process.id,
                port,
                self.store.ttl(),
            ),
            runtime,
        })
    }

    /// Execute and turn a non-zero exit code into an error.
    async fn run_checked(
        &self,
        runtime: &dyn SandboxRuntime,
        command: &str,
    ) -> Result<crate::sandbox::CommandResult> {
        let result = runtime.execute(command).await?;
        if !result.success() {
            return Err(BridgeError::CommandFailed {
                command: command.to_string(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }
}

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{shell_quote, Orchestrator};
use crate::error::{BridgeError, Result};
use crate::sandbox::OutputChunk;
use crate::session::ActiveSession;

fn default_stream() -> bool {
    true
}

/// A single file to write into the workspace.
#[derive(Debug, Clone, Deserialize)]
pub struct FileEdit {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyCodeRequest {
    #[serde(default)]
    pub files: Vec<FileEdit>,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub path: String,
    pub error: String,
}

/// Progress events emitted while applying code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ApplyEvent {
    Start {
        total: usize,
    },
    File {
        path: String,
        status: FileStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Complete {
        applied: Vec<String>,
        failed: Vec<FailedFile>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplySummary {
    pub success: bool,
    pub applied: Vec<String>,
    pub failed: Vec<FailedFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallPackagesRequest {
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStreamKind {
    Stdout,
    Stderr,
}

/// Progress events emitted while installing packages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InstallEvent {
    Start {
        packages: Vec<String>,
    },
    Output {
        stream: OutputStreamKind,
        data: String,
    },
    Complete {
        success: bool,
        #[serde(rename = "exitCode")]
        exit_code: i32,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallSummary {
    pub success: bool,
    pub packages: Vec<String>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunCommandRequest {
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCommandResponse {
    pub success: bool,
    pub output: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestroyResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub files: Vec<String>,
}

/// Sends to the optional event channel. A client that went away is not an
/// error for the operation itself.
async fn emit<T>(events: Option<&mpsc::Sender<T>>, event: T) {
    if let Some(tx) = events {
        if tx.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }
}

/// Reject anything npm would read as a flag or a shell would interpret.
pub(crate) fn validate_packages(packages: &[String]) -> Result<()> {
    if packages.is_empty() {
        return Err(BridgeError::Validation(
            "No packages specified".to_string(),
        ));
    }
    for name in packages {
        let allowed = |c: char| c.is_ascii_alphanumeric() || "@/._~^<>=-".contains(c);
        if name.is_empty() || name.starts_with('-') || !name.chars().all(allowed) {
            return Err(BridgeError::Validation(format!(
                "Invalid package name: '{}'",
                name
            )));
        }
    }
    Ok(())
}

impl Orchestrator {
    /// The session every apply / install / run call operates on.
    pub async fn active_session(&self) -> Result<ActiveSession> {
        self.store.require_active().await
    }

    /// Terminate the active sandbox, if any.
    pub async fn destroy(&self) -> DestroyResponse {
        let message = match self.store.destroy().await {
            Some(session) => {
                info!(session_id = %session.session_id, "Sandbox destroyed");
                format!("Sandbox {} destroyed", session.session_id)
            }
            None => "No active sandbox".to_string(),
        };
        DestroyResponse {
            success: true,
            message,
        }
    }

    /// Snapshot of the active session without extending it.
    pub async fn status(&self) -> StatusResponse {
        let active = self.store.active().await.map(|a| a.session);
        let files = if active.is_some() {
            self.store.files().await
        } else {
            Vec::new()
        };
        StatusResponse {
            active: active.is_some(),
            sandbox_id: active.as_ref().map(|s| s.session_id.clone()),
            url: active.as_ref().map(|s| s.url.clone()),
            process_id: active.as_ref().map(|s| s.process_id.clone()),
            created_at: active.as_ref().map(|s| s.created_at),
            expires_at: active.as_ref().map(|s| s.expires_at),
            files,
        }
    }

    /// Write every file into the active workspace, reporting per-file
    /// progress on `events` when given.
    ///
    /// A file that fails does not stop the others; the summary lists both.
    pub async fn apply_code(
        &self,
        active: &ActiveSession,
        files: Vec<FileEdit>,
        events: Option<mpsc::Sender<ApplyEvent>>,
    ) -> ApplySummary {
        let events = events.as_ref();
        info!(session_id = %active.session.session_id, files = files.len(), "Applying code");
        emit(events, ApplyEvent::Start { total: files.len() }).await;

        let mut applied = Vec::new();
        let mut failed = Vec::new();

        for file in files {
            match self.write_workspace_file(active, &file).await {
                Ok(relative) => {
                    info!("✓ {}", relative);
                    emit(
                        events,
                        ApplyEvent::File {
                            path: relative.clone(),
                            status: FileStatus::Success,
                            error: None,
                        },
                    )
                    .await;
                    applied.push(relative);
                }
                Err(e) => {
                    warn!(path = %file.path, error = %e, "Failed to apply file");
                    emit(
                        events,
                        ApplyEvent::File {
                            path: file.path.clone(),
                            status: FileStatus::Error,
                            error: Some(e.to_string()),
                        },
                    )
                    .await;
                    failed.push(FailedFile {
                        path: file.path,
                        error: e.to_string(),
                    });
                }
            }
        }

        if !self
            .store
            .record_files(&active.session.session_id, applied.iter().cloned())
            .await
        {
            debug!(
                session_id = %active.session.session_id,
                "Session replaced during apply, registry left untouched"
            );
        }

        if applied.iter().any(|p| p.ends_with(".css")) {
            debug!(
                delay_ms = self.config.css_rebuild_delay_ms,
                "Waiting for stylesheet rebuild"
            );
            tokio::time::sleep(Duration::from_millis(self.config.css_rebuild_delay_ms)).await;
        }

        emit(
            events,
            ApplyEvent::Complete {
                applied: applied.clone(),
                failed: failed.clone(),
            },
        )
        .await;

        ApplySummary {
            success: failed.is_empty(),
            applied,
            failed,
        }
    }

    /// Create the parent directory, then write. Returns the normalized path.
    async fn write_workspace_file(&self, active: &ActiveSession, file: &FileEdit) -> Result<String> {
        let relative = self.relative_path(&file.path)?;
        if let Some((dir, _)) = relative.rsplit_once('/') {
            let mkdir = format!("mkdir -p {}", shell_quote(&self.workspace_path(dir)));
            let result = active.runtime.execute(&mkdir).await?;
            if !result.success() {
                return Err(BridgeError::CommandFailed {
                    command: mkdir,
                    exit_code: result.exit_code,
                    stderr: result.stderr.trim().to_string(),
                });
            }
        }
        active
            .runtime
            .write_file(&self.workspace_path(&relative), &file.content)
            .await?;
        Ok(relative)
    }

    /// Run `npm install` for `packages` in the active workspace, relaying
    /// output on `events` as it arrives.
    pub async fn install_packages(
        &self,
        active: &ActiveSession,
        packages: Vec<String>,
        events: Option<mpsc::Sender<InstallEvent>>,
    ) -> Result<InstallSummary> {
        validate_packages(&packages)?;
        let events = events.as_ref();

        // Validated names contain no quotes, so single-quoting is enough.
        let quoted: Vec<String> = packages.iter().map(|p| format!("'{}'", p)).collect();
        let command = self.in_workspace(&format!("npm install {}", quoted.join(" ")));
        info!(session_id = %active.session.session_id, packages = ?packages, "Installing packages");
        emit(
            events,
            InstallEvent::Start {
                packages: packages.clone(),
            },
        )
        .await;

        match self.relay_install(active, &command, events).await {
            Ok((stdout, stderr, exit_code)) => {
                let success = exit_code == 0;
                if !success {
                    warn!(exit_code, "npm install exited with non-zero status");
                }
                emit(events, InstallEvent::Complete { success, exit_code }).await;
                Ok(InstallSummary {
                    success,
                    packages,
                    stdout,
                    stderr,
                    exit_code,
                })
            }
            Err(e) => {
                emit(
                    events,
                    InstallEvent::Error {
                        error: e.to_string(),
                    },
                )
                .await;
                Err(e)
            }
        }
    }

    async fn relay_install(
        &self,
        active: &ActiveSession,
        command: &str,
        events: Option<&mpsc::Sender<InstallEvent>>,
    ) -> Result<(String, String, i32)> {
        let mut output = active.runtime.execute_stream(command).await?;
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut exit_code = None;

        while let Some(chunk) = output.next().await {
            match chunk? {
                OutputChunk::Stdout(data) => {
                    stdout.push_str(&data);
                    emit(
                        events,
                        InstallEvent::Output {
                            stream: OutputStreamKind::Stdout,
                            data,
                        },
                    )
                    .await;
                }
                OutputChunk::Stderr(data) => {
                    stderr.push_str(&data);
                    emit(
                        events,
                        InstallEvent::Output {
                            stream: OutputStreamKind::Stderr,
                            data,
                        },
                    )
                    .await;
                }
                OutputChunk::Exit(code) => exit_code = Some(code),
            }
        }

        let exit_code = exit_code.ok_or_else(|| {
            BridgeError::SandboxExecution(format!("`{}` ended without an exit code", command))
        })?;
        Ok((stdout, stderr, exit_code))
    }

    /// Run an arbitrary shell command in the active workspace.
    pub async fn run_command(
        &self,
        active: &ActiveSession,
        command: &str,
    ) -> Result<RunCommandResponse> {
        let command = command.trim();
        if command.is_empty() {
            return Err(BridgeError::Validation("Command is required".to_string()));
        }

        info!(session_id = %active.session.session_id, command, "Running command");
        let result = active.runtime.execute(&self.in_workspace(command)).await?;

        Ok(RunCommandResponse {
            success: result.success(),
            output: result.combined_output(),
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
        })
    }
}

//! Sandbox orchestrator: owns the single active session and drives the
//! provisioning sequence and the per-session operations.

mod operations;
mod provision;
mod readiness;
pub mod scaffold;

use std::sync::Arc;

use chrono::Duration;

use crate::config::types::OrchestratorConfig;
use crate::error::{BridgeError, Result};
use crate::sandbox::SandboxProvider;
use crate::session::SessionStore;

pub use operations::{
    ApplyCodeRequest, ApplyEvent, ApplySummary, DestroyResponse, FailedFile, FileEdit,
    FileStatus, InstallEvent, InstallPackagesRequest, InstallSummary, OutputStreamKind,
    RunCommandRequest, RunCommandResponse, StatusResponse,
};
pub(crate) use operations::validate_packages;
pub use provision::{CreateResponse, CREATE_MESSAGE};
pub use readiness::wait_for_dev_server;

/// Single-quote `value` for `sh -c`.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

pub struct Orchestrator {
    provider: Arc<dyn SandboxProvider>,
    store: SessionStore,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn SandboxProvider>, config: OrchestratorConfig) -> Self {
        let ttl = Duration::milliseconds(config.session_timeout_ms() as i64);
        Self {
            provider,
            store: SessionStore::new(ttl),
            config,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Absolute path of a workspace-relative file inside the sandbox.
    fn workspace_path(&self, relative: &str) -> String {
        format!(
            "{}/{}",
            self.config.workspace_dir.trim_end_matches('/'),
            relative.trim_start_matches('/')
        )
    }

    /// Shell prefix that runs the rest of the command in the workspace.
    fn in_workspace(&self, command: &str) -> String {
        format!("cd {} && {}", self.config.workspace_dir, command)
    }

    /// Normalize a client-supplied path to a workspace-relative one.
    ///
    /// Accepts `src/App.jsx`, `./src/App.jsx` and `/workspace/src/App.jsx`;
    /// rejects anything that would land outside the workspace.
    pub fn relative_path(&self, raw: &str) -> Result<String> {
        let raw = raw.trim();
        let workspace = self.config.workspace_dir.trim_end_matches('/');

        let relative = if raw.starts_with('/') {
            raw.strip_prefix(workspace)
                .filter(|rest| rest.starts_with('/'))
                .ok_or_else(|| {
                    BridgeError::Validation(format!("Path is outside the workspace: {}", raw))
                })?
        } else {
            raw
        };

        let mut parts = Vec::new();
        for part in relative.split('/') {
            match part {
                "" | "." => continue,
                ".." => {
                    return Err(BridgeError::Validation(format!(
                        "Path may not contain '..': {}",
                        raw
                    )))
                }
                other => parts.push(other),
            }
        }

        if parts.is_empty() {
            return Err(BridgeError::Validation(format!("Empty file path: '{}'", raw)));
        }
        Ok(parts.join("/"))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::types::{ReadinessConfig, ReadinessStrategy};
    use crate::sandbox::testing::{FakeBehavior, FakeProvider};

    /// Orchestrator over a fake runtime with timings shrunk for tests.
    pub(crate) fn fake_orchestrator(behavior: FakeBehavior) -> (Arc<Orchestrator>, Arc<FakeProvider>) {
        let provider = Arc::new(FakeProvider::new(behavior));
        let config = OrchestratorConfig {
            css_rebuild_delay_ms: 1,
            startup_delay_ms: 1,
            readiness: ReadinessConfig {
                strategy: ReadinessStrategy::Poll,
                poll_interval_ms: 1,
                timeout_ms: 50,
            },
            ..OrchestratorConfig::default()
        };
        let orchestrator = Arc::new(Orchestrator::new(provider.clone(), config));
        (orchestrator, provider)
    }

    #[test]
    fn relative_path_normalization() {
        let (orch, _) = fake_orchestrator(FakeBehavior::default());
        assert_eq!(orch.relative_path("src/App.jsx").unwrap(), "src/App.jsx");
        assert_eq!(orch.relative_path("./src//App.jsx").unwrap(), "src/App.jsx");
        assert_eq!(
            orch.relative_path("/workspace/src/App.jsx").unwrap(),
            "src/App.jsx"
        );
        assert!(orch.relative_path("/etc/passwd").is_err());
        assert!(orch.relative_path("/workspaces/x.js").is_err());
        assert!(orch.relative_path("src/../../etc/passwd").is_err());
        assert!(orch.relative_path("  ").is_err());
    }

    #[test]
    fn shell_quote_survives_metacharacters() {
        assert_eq!(shell_quote("/workspace/src"), "'/workspace/src'");
        assert_eq!(shell_quote("src/my components"), "'src/my components'");
        assert_eq!(shell_quote("src/(auth)"), "'src/(auth)'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn workspace_helpers() {
        let (orch, _) = fake_orchestrator(FakeBehavior::default());
        assert_eq!(orch.workspace_path("src/main.jsx"), "/workspace/src/main.jsx");
        assert_eq!(orch.in_workspace("npm install"), "cd /workspace && npm install");
    }
}

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Default worker URL used when neither the config file nor
/// `CLOUDFLARE_WORKER_URL` provide one.
pub const DEFAULT_BACKEND_URL: &str = "https://open-lovable-sandbox.your-subdomain.workers.dev";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub proxy: ProxyConfig,
    pub orchestrator: OrchestratorConfig,
    pub runtime: RuntimeConfig,
}

/// Client-facing proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address the proxy listens on
    pub listen: String,
    /// Base URL of the sandbox worker the proxy forwards to
    pub backend_url: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_string(),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Address the orchestrator listens on
    pub listen: String,
    /// Workspace root inside the sandbox
    pub workspace_dir: String,
    /// Idle lifetime of a sandbox session
    pub session_timeout_minutes: u64,
    /// Port the Vite dev server binds inside the sandbox
    pub dev_server_port: u16,
    /// Fixed wait used by the `delay` readiness strategy
    pub startup_delay_ms: u64,
    /// Wait after stylesheet edits so Tailwind can rebuild
    pub css_rebuild_delay_ms: u64,
    pub readiness: ReadinessConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8787".to_string(),
            workspace_dir: "/workspace".to_string(),
            session_timeout_minutes: 15,
            dev_server_port: 5173,
            startup_delay_ms: 7000,
            css_rebuild_delay_ms: 2000,
            readiness: ReadinessConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn session_timeout_ms(&self) -> u64 {
        self.session_timeout_minutes * 60 * 1000
    }
}

/// How the orchestrator decides the dev server is up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessStrategy {
    /// Probe the port inside the sandbox until it accepts connections
    #[default]
    Poll,
    /// Sleep for `startup_delay_ms` and assume the server is up
    Delay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub strategy: ReadinessStrategy,
    /// Interval between port probes
    pub poll_interval_ms: u64,
    /// Upper bound for polling before giving up
    pub timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            strategy: ReadinessStrategy::default(),
            poll_interval_ms: 500,
            timeout_ms: 30_000,
        }
    }
}

/// The type of sandbox runtime to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Local Docker containers, one per session
    #[default]
    Docker,
    /// A remote sandbox runtime reached over HTTP
    Remote,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Which runtime adapter to use
    pub backend: BackendType,
    pub docker: DockerConfig,
    pub remote: RemoteConfig,
}

/// Docker-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Image the sandbox container runs (needs node + npm)
    pub image: String,
    /// Memory limit in MB
    pub memory_limit_mb: u64,
    /// Host used to build the exposed URL
    pub public_host: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: "node:20-slim".to_string(),
            memory_limit_mb: 2048,
            public_host: "localhost".to_string(),
        }
    }
}

/// Remote runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the runtime API
    pub base_url: String,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000".to_string(),
            api_token: None,
            timeout_seconds: 300,
        }
    }
}

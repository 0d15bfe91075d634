pub mod loader;
pub mod types;

pub use loader::{get_config_path, load_config};
pub use types::{
    BackendType, BridgeConfig, DockerConfig, OrchestratorConfig, ProxyConfig, ReadinessConfig,
    ReadinessStrategy, RemoteConfig, RuntimeConfig,
};

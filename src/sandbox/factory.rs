use std::sync::Arc;

use tracing::info;

use crate::config::types::{BackendType, RuntimeConfig};
use crate::error::Result;
use crate::sandbox::backends::{DockerProvider, RemoteProvider};
use crate::sandbox::traits::SandboxProvider;

/// Create the sandbox provider selected in the configuration.
///
/// `published_ports` are the container ports that must be reachable from
/// outside; runtimes that publish ports at creation time (Docker) need them
/// up front.
pub fn create_provider(
    config: &RuntimeConfig,
    published_ports: Vec<u16>,
) -> Result<Arc<dyn SandboxProvider>> {
    let provider: Arc<dyn SandboxProvider> = match config.backend {
        BackendType::Docker => Arc::new(DockerProvider::new(config.docker.clone(), published_ports)?),
        BackendType::Remote => Arc::new(RemoteProvider::new(config.remote.clone())?),
    };

    info!(runtime = provider.name(), "Sandbox runtime selected");
    Ok(provider)
}

/// Get information about available runtimes on this system.
pub fn available_backends(config: &RuntimeConfig) -> Vec<BackendInfo> {
    let docker_available = DockerProvider::is_available();
    let remote_configured = !config.remote.base_url.trim().is_empty();

    vec![
        BackendInfo {
            name: "docker",
            available: docker_available,
            description: "Local Docker container per session",
            unavailable_reason: if docker_available {
                None
            } else {
                Some("Docker daemon not accessible")
            },
        },
        BackendInfo {
            name: "remote",
            available: remote_configured,
            description: "Remote sandbox runtime over HTTP",
            unavailable_reason: if remote_configured {
                None
            } else {
                Some("runtime.remote.base_url is empty")
            },
        },
    ]
}

/// Information about a sandbox runtime.
pub struct BackendInfo {
    pub name: &'static str,
    pub available: bool,
    pub description: &'static str,
    pub unavailable_reason: Option<&'static str>,
}

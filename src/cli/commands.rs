use std::sync::Arc;

use tracing::info;

use crate::cli::args::{ConfigAction, ConfigArgs, InitArgs, OrchestratorArgs, OutputFormat, ProxyArgs};
use crate::config::loader::get_config_path;
use crate::config::types::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::orchestrator::Orchestrator;
use crate::sandbox::{available_backends, create_provider};
use crate::server::{self, ProxyState};

// ============================================================================
// Server Commands
// ============================================================================

pub async fn proxy(args: ProxyArgs, mut config: BridgeConfig) -> Result<()> {
    if let Some(listen) = args.listen {
        config.proxy.listen = listen;
    }
    if let Some(backend_url) = args.backend_url {
        config.proxy.backend_url = backend_url;
    }

    let state = ProxyState::new(config.proxy.backend_url.clone());
    info!(backend_url = %state.backend_url(), "Starting proxy");
    server::serve(&config.proxy.listen, server::proxy::router(state), "proxy").await
}

pub async fn orchestrator(args: OrchestratorArgs, mut config: BridgeConfig) -> Result<()> {
    if let Some(listen) = args.listen {
        config.orchestrator.listen = listen;
    }
    if let Some(runtime) = args.runtime {
        config.runtime.backend = runtime;
    }
    if let Some(readiness) = args.readiness {
        config.orchestrator.readiness.strategy = readiness;
    }

    let provider = create_provider(&config.runtime, vec![config.orchestrator.dev_server_port])?;
    let listen = config.orchestrator.listen.clone();
    let orchestrator = Arc::new(Orchestrator::new(provider, config.orchestrator));

    let served = server::serve(
        &listen,
        server::orchestrator::router(orchestrator.clone()),
        "orchestrator",
    )
    .await;

    // Sandboxes do not survive the process.
    let destroyed = orchestrator.destroy().await;
    info!(message = %destroyed.message, "Orchestrator stopped");
    served
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let default_config = BridgeConfig::default();
    let toml_str =
        toml::to_string_pretty(&default_config).map_err(|e| BridgeError::Config(e.to_string()))?;

    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Start the orchestrator with the local Docker runtime");
    println!("  sandbox-bridge orchestrator --runtime docker");
    println!();
    println!("  # Point the proxy at it");
    println!("  sandbox-bridge proxy --backend-url http://127.0.0.1:8787");
    println!();
    println!("  # Create a sandbox through the proxy");
    println!("  curl -X POST http://127.0.0.1:3000/api/create-ai-sandbox");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: BridgeConfig, format: OutputFormat) -> Result<()> {
    match args.action {
        ConfigAction::Show => match format {
            OutputFormat::Text => {
                let toml_str = toml::to_string_pretty(&config)
                    .map_err(|e| BridgeError::Config(e.to_string()))?;
                println!("{}", toml_str);
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        },
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
        ConfigAction::Backends => {
            let backends = available_backends(&config.runtime);
            match format {
                OutputFormat::Text => {
                    println!("{:<10} {:<10} DESCRIPTION", "RUNTIME", "STATUS");
                    println!("{}", "-".repeat(60));
                    for backend in &backends {
                        let status = if backend.available { "ready" } else { "missing" };
                        println!("{:<10} {:<10} {}", backend.name, status, backend.description);
                        if let Some(reason) = backend.unavailable_reason {
                            println!("{:<21} {}", "", reason);
                        }
                    }
                }
                OutputFormat::Json => {
                    let json: Vec<_> = backends
                        .iter()
                        .map(|b| {
                            serde_json::json!({
                                "name": b.name,
                                "available": b.available,
                                "description": b.description,
                                "unavailable_reason": b.unavailable_reason,
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&json)?);
                }
            }
        }
    }

    Ok(())
}

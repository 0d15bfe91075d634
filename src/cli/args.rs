use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::types::{BackendType, ReadinessStrategy};

#[derive(Parser, Debug)]
#[clap(name = "sandbox-bridge")]
#[clap(
    version,
    about = "Proxy and orchestrator for ephemeral Vite sandboxes"
)]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "SANDBOX_BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the client-facing `/api/*` proxy
    Proxy(ProxyArgs),

    /// Run the sandbox orchestrator (`/sandbox/*`)
    Orchestrator(OrchestratorArgs),

    /// Write a default configuration file
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

// ============================================================================
// Server Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct ProxyArgs {
    /// Address to listen on (overrides `proxy.listen`)
    #[clap(long)]
    pub listen: Option<String>,

    /// Orchestrator base URL to forward to (overrides `proxy.backend_url`)
    #[clap(long)]
    pub backend_url: Option<String>,
}

#[derive(Args, Debug)]
pub struct OrchestratorArgs {
    /// Address to listen on (overrides `orchestrator.listen`)
    #[clap(long)]
    pub listen: Option<String>,

    /// Sandbox runtime to provision with (overrides `runtime.backend`)
    #[clap(long, value_enum)]
    pub runtime: Option<BackendType>,

    /// How to decide the dev server is up (overrides `orchestrator.readiness.strategy`)
    #[clap(long, value_enum)]
    pub readiness: Option<ReadinessStrategy>,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
    /// List sandbox runtimes and whether they can be used here
    Backends,
}

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_orchestrator_overrides() {
        let cli = Cli::try_parse_from([
            "sandbox-bridge",
            "-vv",
            "orchestrator",
            "--listen",
            "0.0.0.0:9000",
            "--runtime",
            "remote",
            "--readiness",
            "delay",
        ])
        .unwrap();

        assert_eq!(cli.global_opts.verbose, 2);
        match cli.command {
            Commands::Orchestrator(args) => {
                assert_eq!(args.listen.as_deref(), Some("0.0.0.0:9000"));
                assert_eq!(args.runtime, Some(BackendType::Remote));
                assert_eq!(args.readiness, Some(ReadinessStrategy::Delay));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn parses_proxy_backend_url() {
        let cli = Cli::try_parse_from([
            "sandbox-bridge",
            "proxy",
            "--backend-url",
            "http://127.0.0.1:8787",
        ])
        .unwrap();
        match cli.command {
            Commands::Proxy(args) => {
                assert_eq!(args.backend_url.as_deref(), Some("http://127.0.0.1:8787"));
                assert!(args.listen.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}

pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod sandbox;
pub mod server;
pub mod session;

pub use error::{BridgeError, Result};

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;

use crate::error::Result;
use crate::sandbox::CommandResult;

/// Handle to a long-running process started inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub id: String,
}

/// One piece of output from a streamed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
    /// Always the last chunk of a stream
    Exit(i32),
}

pub type OutputStream = BoxStream<'static, Result<OutputChunk>>;

/// One isolated sandbox instance.
///
/// This is the capability set the orchestrator relies on: run a command,
/// write a file, start a background process and expose a port. Everything
/// else has a default built on top of those.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Returns the runtime name (e.g., "docker", "remote")
    fn name(&self) -> &str;

    /// Session identifier this sandbox was acquired for
    fn sandbox_id(&self) -> &str;

    /// Execute a shell command inside the sandbox and wait for it
    async fn execute(&self, command: &str) -> Result<CommandResult>;

    /// Execute a shell command and yield its output as it is produced.
    /// Default implementation buffers the whole command.
    async fn execute_stream(&self, command: &str) -> Result<OutputStream> {
        let result = self.execute(command).await?;
        let mut chunks = Vec::with_capacity(3);
        if !result.stdout.is_empty() {
            chunks.push(Ok(OutputChunk::Stdout(result.stdout)));
        }
        if !result.stderr.is_empty() {
            chunks.push(Ok(OutputChunk::Stderr(result.stderr)));
        }
        chunks.push(Ok(OutputChunk::Exit(result.exit_code)));
        Ok(stream::iter(chunks).boxed())
    }

    /// Write a file inside the sandbox
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    /// Start a background process and return immediately
    async fn start_process(&self, command: &str) -> Result<ProcessHandle>;

    /// Terminate a process previously started with `start_process`
    async fn kill_process(&self, process_id: &str) -> Result<()>;

    /// Make a port reachable from outside the sandbox, returning its URL
    async fn expose_port(&self, port: u16) -> Result<String>;

    /// Tear the sandbox down.
    /// Default implementation is a no-op for runtimes without remote state.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Check whether something inside the sandbox accepts TCP connections
    /// on `port`. Default implementation probes with node, which every
    /// scaffolded workspace already needs.
    async fn port_ready(&self, port: u16) -> Result<bool> {
        let probe = format!(
            "node -e \"require('net').connect({port},'127.0.0.1')\
             .on('connect',()=>process.exit(0)).on('error',()=>process.exit(1))\""
        );
        Ok(self.execute(&probe).await?.exit_code == 0)
    }
}

/// Hands out sandbox instances keyed by session id.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Returns the provider name
    fn name(&self) -> &str;

    /// Obtain a fresh sandbox for `session_id`
    async fn acquire(&self, session_id: &str) -> Result<Arc<dyn SandboxRuntime>>;
}

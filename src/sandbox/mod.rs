mod backends;
mod factory;
mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use backends::{DockerProvider, DockerSandbox, RemoteProvider, RemoteSandbox};
pub use factory::{available_backends, create_provider, BackendInfo};
pub use traits::{
    OutputChunk, OutputStream, ProcessHandle, SandboxProvider, SandboxRuntime,
};

/// Result of executing a command in the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, the way a terminal would show them
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

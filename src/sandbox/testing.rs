//! In-memory sandbox runtime for tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{BridgeError, Result};
use crate::sandbox::traits::{ProcessHandle, SandboxProvider, SandboxRuntime};
use crate::sandbox::CommandResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Execute(String),
    WriteFile(String),
    StartProcess(String),
    KillProcess(String),
    ExposePort(u16),
    PortReady(u16),
    Shutdown,
}

#[derive(Debug, Clone, Default)]
pub struct FakeBehavior {
    /// Commands containing this substring fail at the transport level
    pub fail_execute_containing: Option<String>,
    /// Commands containing the key exit with the given code
    pub exit_codes: Vec<(String, i32)>,
    pub fail_acquire: bool,
    pub fail_write: bool,
    pub fail_start_process: bool,
    pub fail_expose: bool,
    /// Number of failed probes before the port reports ready
    pub probes_until_ready: u32,
    pub never_ready: bool,
}

pub struct FakeRuntime {
    id: String,
    behavior: FakeBehavior,
    calls: Mutex<Vec<Call>>,
    files: Mutex<BTreeMap<String, String>>,
    probes: AtomicU32,
}

impl FakeRuntime {
    pub fn new(id: &str, behavior: FakeBehavior) -> Self {
        Self {
            id: id.to_string(),
            behavior,
            calls: Mutex::new(Vec::new()),
            files: Mutex::new(BTreeMap::new()),
            probes: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn files(&self) -> BTreeMap<String, String> {
        self.files.lock().unwrap().clone()
    }

    pub fn was_shut_down(&self) -> bool {
        self.calls().contains(&Call::Shutdown)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    fn sandbox_id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, command: &str) -> Result<CommandResult> {
        self.record(Call::Execute(command.to_string()));

        if let Some(needle) = &self.behavior.fail_execute_containing {
            if command.contains(needle.as_str()) {
                return Err(BridgeError::SandboxExecution(format!(
                    "connection reset while running `{}`",
                    command
                )));
            }
        }

        let exit_code = self
            .behavior
            .exit_codes
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, code)| *code)
            .unwrap_or(0);

        Ok(CommandResult {
            stdout: format!("ran: {}\n", command),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                "npm ERR! something broke\n".to_string()
            },
            exit_code,
        })
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.record(Call::WriteFile(path.to_string()));
        if self.behavior.fail_write {
            return Err(BridgeError::SandboxExecution("read-only file system".to_string()));
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn start_process(&self, command: &str) -> Result<ProcessHandle> {
        self.record(Call::StartProcess(command.to_string()));
        if self.behavior.fail_start_process {
            return Err(BridgeError::SandboxExecution("fork failed".to_string()));
        }
        Ok(ProcessHandle {
            id: "4242".to_string(),
        })
    }

    async fn kill_process(&self, process_id: &str) -> Result<()> {
        self.record(Call::KillProcess(process_id.to_string()));
        Ok(())
    }

    async fn expose_port(&self, port: u16) -> Result<String> {
        self.record(Call::ExposePort(port));
        if self.behavior.fail_expose {
            return Err(BridgeError::RuntimeApi {
                message: "port exposure refused".to_string(),
                status: Some(503),
            });
        }
        Ok(format!("https://{}-{}.preview.test", port, self.id))
    }

    async fn shutdown(&self) -> Result<()> {
        self.record(Call::Shutdown);
        Ok(())
    }

    async fn port_ready(&self, port: u16) -> Result<bool> {
        self.record(Call::PortReady(port));
        if self.behavior.never_ready {
            return Ok(false);
        }
        let seen = self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(seen >= self.behavior.probes_until_ready)
    }
}

/// Provider handing out [`FakeRuntime`]s and remembering each of them.
#[derive(Default)]
pub struct FakeProvider {
    behavior: Mutex<FakeBehavior>,
    sandboxes: Mutex<Vec<Arc<FakeRuntime>>>,
}

impl FakeProvider {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            sandboxes: Mutex::new(Vec::new()),
        }
    }

    /// Change the behavior of sandboxes acquired from now on
    pub fn set_behavior(&self, behavior: FakeBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn sandboxes(&self) -> Vec<Arc<FakeRuntime>> {
        self.sandboxes.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<FakeRuntime> {
        self.sandboxes()
            .last()
            .cloned()
            .expect("no sandbox acquired yet")
    }
}

#[async_trait]
impl SandboxProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn acquire(&self, session_id: &str) -> Result<Arc<dyn SandboxRuntime>> {
        let behavior = self.behavior.lock().unwrap().clone();
        if behavior.fail_acquire {
            return Err(BridgeError::SandboxInit("no capacity".to_string()));
        }
        let sandbox = Arc::new(FakeRuntime::new(session_id, behavior));
        self.sandboxes.lock().unwrap().push(sandbox.clone());
        Ok(sandbox)
    }
}

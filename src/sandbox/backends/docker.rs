use std::process::{Output, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::types::DockerConfig;
use crate::error::{BridgeError, Result};
use crate::sandbox::traits::{
    OutputChunk, OutputStream, ProcessHandle, SandboxProvider, SandboxRuntime,
};
use crate::sandbox::CommandResult;

/// Label attached to every container so stray sandboxes can be found.
const SESSION_LABEL: &str = "sandbox-bridge.session";

/// Provides one Docker container per session.
///
/// The container idles on `tail -f /dev/null`; commands run through
/// `docker exec`, and the dev-server port is published to a random host port
/// at creation time.
pub struct DockerProvider {
    config: DockerConfig,
    published_ports: Vec<u16>,
}

impl DockerProvider {
    pub fn new(config: DockerConfig, published_ports: Vec<u16>) -> Result<Self> {
        // Verify Docker is available
        if !Self::is_available() {
            return Err(BridgeError::BackendNotAvailable {
                backend: "docker".to_string(),
                reason: "Docker daemon is not accessible. Ensure Docker is installed and running."
                    .to_string(),
            });
        }

        Ok(Self {
            config,
            published_ports,
        })
    }

    /// Check if the Docker runtime is available on this system.
    ///
    /// Returns true if Docker daemon is accessible.
    pub fn is_available() -> bool {
        // Check if docker command exists and daemon is responsive
        match std::process::Command::new("docker")
            .args(["info"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    fn run_args(&self, session_id: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            session_id.to_string(),
            "--label".to_string(),
            format!("{}={}", SESSION_LABEL, session_id),
            format!("--memory={}m", self.config.memory_limit_mb),
        ];

        // Publish each container port to an ephemeral host port
        for port in &self.published_ports {
            args.push("-p".to_string());
            args.push(port.to_string());
        }

        args.push(self.config.image.clone());
        args.extend(["tail", "-f", "/dev/null"].map(String::from));
        args
    }
}

#[async_trait]
impl SandboxProvider for DockerProvider {
    fn name(&self) -> &str {
        "docker"
    }

    async fn acquire(&self, session_id: &str) -> Result<Arc<dyn SandboxRuntime>> {
        info!(session_id = %session_id, image = %self.config.image, "Starting Docker sandbox container...");

        let output = docker(&self.run_args(session_id), None).await.map_err(|e| {
            BridgeError::SandboxInit(format!("Failed to start Docker container: {}", e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BridgeError::SandboxInit(format!(
                "Failed to start Docker container: {}",
                stderr.trim()
            )));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(container_id = %container_id, "Docker sandbox container started");

        Ok(Arc::new(DockerSandbox {
            session_id: session_id.to_string(),
            container_id,
            public_host: self.config.public_host.clone(),
        }))
    }
}

/// A single running sandbox container.
pub struct DockerSandbox {
    session_id: String,
    container_id: String,
    public_host: String,
}

impl DockerSandbox {
    fn exec_args(&self, interactive: bool, script: &str, extra: &[&str]) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if interactive {
            args.push("-i".to_string());
        }
        args.push(self.container_id.clone());
        args.extend(["sh", "-c", script].map(String::from));
        if !extra.is_empty() {
            // $0 for the inline script, then positional arguments
            args.push("sh".to_string());
            args.extend(extra.iter().map(|s| s.to_string()));
        }
        args
    }
}

#[async_trait]
impl SandboxRuntime for DockerSandbox {
    fn name(&self) -> &str {
        "docker"
    }

    fn sandbox_id(&self) -> &str {
        &self.session_id
    }

    async fn execute(&self, command: &str) -> Result<CommandResult> {
        debug!(container_id = %self.container_id, command = %command, "Executing via docker exec");

        let output = docker(&self.exec_args(false, command, &[]), None)
            .await
            .map_err(|e| {
                BridgeError::SandboxExecution(format!("Failed to execute docker exec: {}", e))
            })?;

        let result = CommandResult::from(output);
        debug!(
            exit_code = result.exit_code,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            "Command completed"
        );
        Ok(result)
    }

    async fn execute_stream(&self, command: &str) -> Result<OutputStream> {
        debug!(container_id = %self.container_id, command = %command, "Streaming via docker exec");

        let mut child = Command::new("docker")
            .args(self.exec_args(false, command, &[]))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                BridgeError::SandboxExecution(format!("Failed to spawn docker exec: {}", e))
            })?;

        let (tx, rx) = mpsc::channel::<Result<OutputChunk>>(64);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = stdout.map(|s| tokio::spawn(forward_lines(s, tx.clone(), OutputChunk::Stdout)));
        let err_task = stderr.map(|s| tokio::spawn(forward_lines(s, tx.clone(), OutputChunk::Stderr)));

        tokio::spawn(async move {
            // Drain both pipes before reporting the exit code
            for task in [out_task, err_task].into_iter().flatten() {
                let _ = task.await;
            }
            let chunk = match child.wait().await {
                Ok(status) => Ok(OutputChunk::Exit(status.code().unwrap_or(1))),
                Err(e) => Err(BridgeError::SandboxExecution(format!(
                    "Failed to wait for docker exec: {}",
                    e
                ))),
            };
            let _ = tx.send(chunk).await;
        });

        Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|c| (c, rx)) }).boxed())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        // Path goes in as a positional argument so it never needs quoting
        let script = "mkdir -p \"$(dirname \"$1\")\" && cat > \"$1\"";
        let output = docker(&self.exec_args(true, script, &[path]), Some(content))
            .await
            .map_err(|e| BridgeError::SandboxExecution(format!("Failed to write file: {}", e)))?;

        if !output.status.success() {
            return Err(BridgeError::SandboxExecution(format!(
                "Failed to write file {}: {}",
                path,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }

    async fn start_process(&self, command: &str) -> Result<ProcessHandle> {
        // setsid gives the process its own group so kill_process can take
        // down npm and everything it spawned
        let script = "setsid nohup sh -c \"$1\" > /tmp/process-$$.log 2>&1 & echo $!";
        let result = CommandResult::from(
            docker(&self.exec_args(false, script, &[command]), None)
                .await
                .map_err(|e| {
                    BridgeError::SandboxExecution(format!("Failed to start process: {}", e))
                })?,
        );

        let pid = result.stdout.trim();
        if result.exit_code != 0 || pid.parse::<u32>().is_err() {
            return Err(BridgeError::SandboxExecution(format!(
                "Failed to start process `{}`: {}",
                command,
                result.stderr.trim()
            )));
        }

        info!(container_id = %self.container_id, pid = %pid, "Background process started");
        Ok(ProcessHandle {
            id: pid.to_string(),
        })
    }

    async fn kill_process(&self, process_id: &str) -> Result<()> {
        let pid: u32 = process_id.parse().map_err(|_| {
            BridgeError::Validation(format!("Invalid process id: {}", process_id))
        })?;

        let result = self
            .execute(&format!("kill -TERM -- -{pid} 2>/dev/null || kill -TERM {pid}"))
            .await?;
        if result.exit_code != 0 {
            warn!(pid = pid, stderr = %result.stderr.trim(), "Failed to kill process");
        }
        Ok(())
    }

    async fn expose_port(&self, port: u16) -> Result<String> {
        let output = docker(
            &[
                "port".to_string(),
                self.container_id.clone(),
                format!("{}/tcp", port),
            ],
            None,
        )
        .await
        .map_err(|e| BridgeError::SandboxExecution(format!("Failed to query port: {}", e)))?;

        if !output.status.success() {
            return Err(BridgeError::SandboxExecution(format!(
                "Port {} is not published: {}",
                port,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let host_port = parse_docker_port(&stdout).ok_or_else(|| {
            BridgeError::SandboxExecution(format!("Unexpected `docker port` output: {}", stdout))
        })?;

        Ok(format!("http://{}:{}", self.public_host, host_port))
    }

    async fn shutdown(&self) -> Result<()> {
        info!(container_id = %self.container_id, "Removing Docker sandbox container...");

        let output = docker(&["rm".to_string(), "-f".to_string(), self.container_id.clone()], None)
            .await
            .map_err(|e| {
                BridgeError::SandboxExecution(format!("Failed to remove container: {}", e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(container_id = %self.container_id, error = %stderr, "Failed to remove container");
        }

        Ok(())
    }
}

impl From<Output> for CommandResult {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(1),
        }
    }
}

/// Run the docker CLI, optionally feeding `stdin`.
async fn docker(args: &[String], stdin: Option<&str>) -> std::io::Result<Output> {
    let mut cmd = Command::new("docker");
    cmd.args(args);
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes()).await?;
        // Dropping the pipe closes stdin so `cat` terminates
        drop(pipe);
    }
    child.wait_with_output().await
}

async fn forward_lines<R>(
    reader: R,
    tx: mpsc::Sender<Result<OutputChunk>>,
    wrap: fn(String) -> OutputChunk,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(Ok(wrap(line))).await.is_err() {
            break;
        }
    }
}

/// Extract the host port from `docker port` output such as
/// `0.0.0.0:49153\n[::]:49153`.
fn parse_docker_port(output: &str) -> Option<u16> {
    output
        .lines()
        .filter_map(|line| line.trim().rsplit(':').next())
        .find_map(|port| port.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_docker_port_output() {
        assert_eq!(parse_docker_port("0.0.0.0:49153\n[::]:49153\n"), Some(49153));
        assert_eq!(parse_docker_port("[::]:32768"), Some(32768));
        assert_eq!(parse_docker_port(""), None);
        assert_eq!(parse_docker_port("garbage"), None);
    }

    #[test]
    fn exec_args_pass_paths_positionally() {
        let sandbox = DockerSandbox {
            session_id: "sandbox-1".to_string(),
            container_id: "abc123".to_string(),
            public_host: "localhost".to_string(),
        };
        let args = sandbox.exec_args(true, "cat > \"$1\"", &["/workspace/it's.txt"]);
        assert_eq!(
            args,
            vec![
                "exec",
                "-i",
                "abc123",
                "sh",
                "-c",
                "cat > \"$1\"",
                "sh",
                "/workspace/it's.txt"
            ]
        );
    }

    #[test]
    fn run_args_publish_ports_and_label() {
        let provider = DockerProvider {
            config: DockerConfig::default(),
            published_ports: vec![5173],
        };
        let args = provider.run_args("sandbox-42");
        assert!(args.contains(&"sandbox-bridge.session=sandbox-42".to_string()));
        let p = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[p + 1], "5173");
        assert_eq!(&args[args.len() - 3..], &["tail", "-f", "/dev/null"]);
    }
}

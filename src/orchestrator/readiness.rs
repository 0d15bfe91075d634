use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::config::types::{OrchestratorConfig, ReadinessStrategy};
use crate::error::{BridgeError, Result};
use crate::sandbox::SandboxRuntime;

/// Block until the dev server inside `runtime` is considered up.
///
/// `poll` probes the port until it accepts a connection or the timeout
/// elapses; `delay` just waits the configured startup delay.
pub async fn wait_for_dev_server(
    runtime: &dyn SandboxRuntime,
    port: u16,
    config: &OrchestratorConfig,
) -> Result<()> {
    match config.readiness.strategy {
        ReadinessStrategy::Delay => {
            info!(delay_ms = config.startup_delay_ms, "Waiting for dev server to start");
            sleep(Duration::from_millis(config.startup_delay_ms)).await;
            Ok(())
        }
        ReadinessStrategy::Poll => {
            let interval = Duration::from_millis(config.readiness.poll_interval_ms.max(1));
            let started = Instant::now();
            let deadline = started + Duration::from_millis(config.readiness.timeout_ms);
            let mut attempts = 0u32;

            loop {
                attempts += 1;
                match runtime.port_ready(port).await {
                    Ok(true) => {
                        info!(
                            port,
                            attempts,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Dev server is accepting connections"
                        );
                        return Ok(());
                    }
                    Ok(false) => debug!(port, attempts, "Dev server not ready yet"),
                    Err(e) => debug!(port, attempts, error = %e, "Readiness probe failed"),
                }

                if Instant::now() >= deadline {
                    return Err(BridgeError::ReadinessTimeout {
                        port,
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
                sleep(interval).await;
            }
        }
    }
}

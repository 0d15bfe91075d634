pub mod envelope;
pub mod orchestrator;
pub mod proxy;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::Result;

pub use envelope::ErrorEnvelope;
pub use proxy::ProxyState;

/// Bind `listen` and serve `app` until Ctrl-C.
pub async fn serve(listen: &str, app: Router, role: &str) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!(role, addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

//! Status API server.

mod http;

pub use http::{
    AcknowledgeResponse, EmergencyStopRequest, EmergencyStopResponse, HealthResponse,
    ResetResponse, create_router,
};

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

use crate::context::TradingContext;

/// Serve the status API until `shutdown` is cancelled.
pub async fn serve(
    ctx: TradingContext,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Status API listening");
    axum::serve(listener, create_router(ctx))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

use std::net::SocketAddr;

use anyhow::Result;
use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use orc_common::shutdown::shutdown_signal;

use crate::args::HealthArgs;

#[derive(Clone)]
struct HealthState {
    grpc_target: String,
}

/// HTTP health/readiness server, separate from the gRPC fabric server so a
/// load balancer or Kubernetes probe never depends on gRPC framing.
pub async fn run_health(args: HealthArgs) -> Result<()> {
    let http_addr: SocketAddr = format!("0.0.0.0:{}", args.http_port).parse()?;
    let state = HealthState {
        grpc_target: args.grpc_target.clone(),
    };

    tracing::info!(%http_addr, grpc_target = %args.grpc_target, "starting health check HTTP server");

    let app = Router::new()
        .route("/", get(http_health_handler))
        .route("/healthz", get(http_health_handler))
        .route("/readyz", get(http_health_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    orc_common::signal_ready();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("health check server stopped gracefully");
    Ok(())
}

async fn http_health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let target = state
        .grpc_target
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    match tokio::net::TcpStream::connect(target).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

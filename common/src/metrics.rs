use std::sync::OnceLock;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::shutdown::shutdown_signal;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static SERVER_STARTED: OnceLock<()> = OnceLock::new();

fn install_recorder_once() -> &'static PrometheusHandle {
    PROM_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("install global metrics recorder")
    })
}

/// Starts the Prometheus exporter exactly once per process, gated on
/// `METRICS_PORT` being set. Mirrors the teacher's
/// `maybe_spawn_metrics_server`: carried as ambient stack even though the
/// spec's Non-goals exclude a full monitoring/alerting surface.
pub fn maybe_spawn_metrics_server() {
    let Some(port) = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
    else {
        return;
    };

    if SERVER_STARTED.set(()).is_ok() {
        let handle = install_recorder_once().clone();
        tokio::spawn(run_metrics_server(port, handle));
    }
}

async fn run_metrics_server(port: u16, handle: PrometheusHandle) {
    let addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind metrics listener");
            return;
        }
    };
    tracing::info!(%addr, "metrics server listening");

    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(handle);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "metrics server exited");
    }
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}

pub const OP_CREATED: &str = "orchestrator_operations_created_total";
pub const OP_COMPLETED: &str = "orchestrator_operations_completed_total";
pub const OP_FAILED: &str = "orchestrator_operations_failed_total";
pub const AGENT_GROUP_SIZE: &str = "orchestrator_agent_group_size";

//! fnmetrics exporter
//!
//! - `GET /metrics`: Prometheus text for every instrumented call site
//! - `GET /healthz`: liveness
//! - `build_info` published once at startup
//!
//! Config path is the first argument (default `fnmetrics.yaml`).

use std::net::SocketAddr;
use tracing_subscriber::{fmt, EnvFilter};

use fnmetrics_exporter::{app_state, config, router};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "fnmetrics.yaml".into());
    let cfg = config::load_from_file(&path).expect("config load failed");
    let listen: SocketAddr = cfg
        .exporter
        .listen
        .parse()
        .expect("exporter.listen must be a valid SocketAddr");

    let state = app_state::AppState::new(cfg).expect("startup failed");
    let app = router::build_router(state);

    tracing::info!(%listen, "fnmetrics-exporter starting");
    let listener = tokio::net::TcpListener::bind(listen).await.expect("failed to bind");

    axum::serve(listener, app).await.expect("server failed");
}

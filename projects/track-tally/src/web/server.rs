use crate::cli::ServeArgs;
use crate::config::DetectorSettings;
use crate::web::api;
use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub fn router(detector: DetectorSettings, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/estimate", get(api::get_estimate))
        .route(
            "/api/runs",
            get(api::get_runs)
                .post(api::create_run_handler)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/api/runs/:run_id", get(api::get_run))
        .route("/api/runs/:run_id/progress", get(api::progress_sse))
        .route("/api/runs/:run_id/frame", get(api::latest_frame))
        .route("/api/runs/:run_id/stop", post(api::stop_run))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(detector))
}

pub async fn run_server(args: ServeArgs) -> Result<()> {
    let mut current_port = args.port;
    let listener = loop {
        let addr = SocketAddr::new(args.host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                // Set non-blocking before registering with Tokio
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                break listener;
            }
            Err(e) => {
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port = current_port
                    .checked_add(1)
                    .ok_or_else(|| anyhow::anyhow!("No available ports found"))?;
            }
        }
    };

    let max_upload_bytes = args.max_upload_mb.saturating_mul(1024 * 1024);
    info!("Accepting uploads up to {} MB", args.max_upload_mb);
    let app = router(
        DetectorSettings {
            model_path: args.model,
            min_confidence: args.min_confidence,
        },
        max_upload_bytes,
    );

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "Track tally server started on http://{}",
        tokio_listener.local_addr()?
    );

    axum::serve(tokio_listener, app).await?;

    Ok(())
}

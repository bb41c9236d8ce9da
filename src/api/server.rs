//! HTTP server setup: router and route wiring for the scheduling and
//! equipment-control API (spec §6).

use super::state::ApiState;
use super::{equipment, maintenance, schedule, system};

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use std::net::SocketAddr;

/// Start the HTTP server on the given address, returning a handle that
/// resolves once `shutdown_rx` observes a `true` (spec §5 graceful
/// shutdown: in-flight dispatcher POSTs are allowed to complete).
pub async fn start_http_server(
    bind: SocketAddr,
    state: ApiState,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(system::health))
        .route("/schedule", get(schedule::list).post(schedule::create))
        .route("/schedule/{jobId}", delete(schedule::cancel))
        .route("/equipment/heater/on", post(equipment::heater_on))
        .route("/equipment/heater/off", post(equipment::heater_off))
        .route("/equipment/pump/run", post(equipment::pump_run))
        .route(
            "/equipment/heat-to-target",
            post(equipment::start_heat_to_target)
                .delete(equipment::stop_heat_to_target)
                .get(equipment::get_heat_to_target),
        )
        .route("/maintenance/heat-target-check", post(maintenance::heat_target_check))
        .route("/maintenance/rotate-logs", post(maintenance::rotate_logs));

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "HTTP server listening");

    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|v| *v).await;
            })
            .await
        {
            tracing::error!(%error, "HTTP server exited with error");
        }
    });

    Ok(handle)
}

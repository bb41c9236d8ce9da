//! `GET /api/health` (spec §6 additions): liveness of the process itself,
//! distinct from the external healthchecks.io-shaped liveness service.

use serde::Serialize;

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
}

pub(super) async fn health() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse { status: "ok" })
}

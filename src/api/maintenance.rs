//! `/api/maintenance/*` handlers (spec §6): the control-loop tick the
//! host cron fires, and the monthly log-rotation/health-ping job.

use crate::api::state::ApiState;
use crate::error::Result;
use crate::store::target_temp::TargetTemperatureState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

pub async fn heat_target_check(State(state): State<ApiState>) -> Result<Json<TargetTemperatureState>> {
    Ok(Json(state.target_temp.check_and_adjust().await?))
}

pub async fn rotate_logs(State(state): State<ApiState>) -> Result<StatusCode> {
    state.maintenance.rotate_logs().await?;
    Ok(StatusCode::OK)
}

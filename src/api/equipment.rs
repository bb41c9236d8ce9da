//! `/api/equipment/*` handlers (spec §6): direct equipment control plus
//! the target-temperature control loop's HTTP surface.

use crate::api::state::ApiState;
use crate::error::Result;
use crate::store::equipment::EquipmentStatus;
use crate::store::target_temp::TargetTemperatureState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

pub async fn heater_on(State(state): State<ApiState>) -> Result<Json<EquipmentStatus>> {
    Ok(Json(state.equipment.heater_on().await?))
}

pub async fn heater_off(State(state): State<ApiState>) -> Result<Json<EquipmentStatus>> {
    Ok(Json(state.equipment.heater_off().await?))
}

pub async fn pump_run(State(state): State<ApiState>) -> Result<Json<EquipmentStatus>> {
    Ok(Json(state.equipment.pump_run().await?))
}

#[derive(Debug, Deserialize)]
pub struct HeatToTargetRequest {
    pub target_temp_f: f64,
}

pub async fn start_heat_to_target(
    State(state): State<ApiState>,
    Json(request): Json<HeatToTargetRequest>,
) -> Result<(StatusCode, Json<TargetTemperatureState>)> {
    let target_state = state.target_temp.start(request.target_temp_f).await?;
    Ok((StatusCode::CREATED, Json(target_state)))
}

pub async fn stop_heat_to_target(State(state): State<ApiState>) -> Result<StatusCode> {
    state.target_temp.stop().await?;
    Ok(StatusCode::OK)
}

pub async fn get_heat_to_target(State(state): State<ApiState>) -> Result<Json<TargetTemperatureState>> {
    Ok(Json(state.target_temp.current_state().await?))
}

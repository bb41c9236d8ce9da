//! `/api/schedule` handlers (spec §6): create, list, cancel jobs.

use crate::api::state::ApiState;
use crate::error::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub action: String,
    #[serde(rename = "scheduledTime")]
    pub scheduled_time: String,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub params: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: crate::store::jobs::Job,
}

#[derive(Debug, Serialize)]
pub struct ListedJobResponse {
    #[serde(flatten)]
    pub job: crate::store::jobs::Job,
    #[serde(rename = "hasCrontabEntry")]
    pub has_crontab_entry: bool,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<ListedJobResponse>,
}

pub async fn create(
    State(state): State<ApiState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobResponse>)> {
    let job = state
        .scheduler
        .schedule(&request.action, &request.scheduled_time, request.recurring, request.params)
        .await?;
    Ok((StatusCode::CREATED, Json(JobResponse { job })))
}

pub async fn list(State(state): State<ApiState>) -> Result<Json<ListJobsResponse>> {
    let listed = state.scheduler.list().await?;
    Ok(Json(ListJobsResponse {
        jobs: listed
            .into_iter()
            .map(|entry| ListedJobResponse { job: entry.job, has_crontab_entry: entry.has_crontab_entry })
            .collect(),
    }))
}

pub async fn cancel(State(state): State<ApiState>, Path(job_id): Path<String>) -> Result<StatusCode> {
    state.scheduler.cancel(&job_id).await?;
    Ok(StatusCode::OK)
}

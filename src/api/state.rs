//! Shared application state handed to every axum handler.

use crate::config::Config;
use crate::equipment::EquipmentController;
use crate::maintenance::MaintenanceSetup;
use crate::scheduler::Scheduler;
use crate::target_temp::TargetTempService;
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub config: Config,
    pub scheduler: Arc<Scheduler>,
    pub equipment: Arc<EquipmentController>,
    pub target_temp: Arc<TargetTempService>,
    pub maintenance: Arc<MaintenanceSetup>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

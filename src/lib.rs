//! hottub: scheduling and heating-control core for a home hot-tub
//! automation service.

pub mod api;
pub mod config;
pub mod crontab;
pub mod daemon;
pub mod dispatch;
pub mod equipment;
pub mod error;
pub mod liveness;
pub mod maintenance;
pub mod ready_by;
pub mod scheduler;
pub mod store;
#[cfg(feature = "metrics")]
pub mod telemetry;
pub mod target_temp;
pub mod time_convert;

pub use error::{Error, Result};

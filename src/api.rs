//! HTTP API surface (spec §6): scheduling, equipment control, and
//! maintenance endpoints for the hot tub automation service.

mod equipment;
mod maintenance;
mod schedule;
mod server;
mod state;
mod system;

pub use server::start_http_server;
pub use state::ApiState;

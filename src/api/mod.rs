//! API endpoint modules.

pub mod health;
pub mod rerun;

pub use health::configure_health_routes;
pub use rerun::configure_routes as configure_rerun_routes;

//! Ambient engineering stack shared by the endpoint assembly crates:
//! structured logging, metrics recorder traits, graceful drain/shutdown,
//! signal handling, readiness tracking, and build version info.

pub mod drain;
pub mod metrics;
pub mod prelude;
pub mod readiness;
pub mod signal;
pub mod telemetry;
pub mod version;

//! Runtime glue that wires config, telemetry, fatal-error handling, and the
//! shared application context.

pub mod config;
pub mod context;
pub mod fatal;
pub mod telemetry;

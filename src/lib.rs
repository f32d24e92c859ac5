pub mod config;
pub mod crl;
pub mod extensions;
pub mod pruning;
pub mod setup;
pub mod telemetry;

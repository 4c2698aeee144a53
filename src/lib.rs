pub mod types;
pub mod config;
pub mod logging;
pub mod error_handling;
pub mod metrics;
pub mod prometheus_metrics;
pub mod health;
pub mod server;
pub mod debounce;
pub mod ledger;
pub mod policy;
pub mod persistence;
pub mod signing;
pub mod submission;
pub mod render;
pub mod station;
pub mod terminal;

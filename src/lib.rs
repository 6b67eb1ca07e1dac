//! Flow metrics for Azure DevOps work items: a staged ingestion engine plus
//! a pure metrics calculator, exposed as both a library and a CLI binary.

pub mod batch_fetch;
pub mod calculator;
pub mod cancellation;
pub mod cli;
pub mod config;
pub mod demo;
pub mod errors;
pub mod history;
pub mod http_client;
pub mod ingestion;
pub mod models;
pub mod normalizer;
pub mod percentiles;
pub mod progress;
pub mod query;
pub mod report;
pub mod server;
pub mod state_config;

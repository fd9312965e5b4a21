pub mod config;
pub mod drain;
pub mod error;
pub mod orchestrator;
pub mod partition;
pub mod worker;

pub mod config;
pub mod decision_log;
pub mod demand;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod models;
pub mod moveup;
pub mod output;
pub mod replication;
pub mod scenario;
pub mod state;
pub mod travel;

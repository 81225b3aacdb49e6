pub mod aggregation;
pub mod api;
pub mod config;
pub mod detection;
pub mod error;
pub mod monitor;
pub mod publish;
pub mod state;

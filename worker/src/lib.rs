//! Rank-side training coordination: the dataset acquisition gate, sharding
//! and the gradient-synchronized training loop.

pub mod config;
pub mod data;
pub mod error;
pub mod gate;
pub mod metrics;
mod schedule;
pub mod trainer;
mod worker;

pub use config::TrainingConfig;
pub use error::{Result, ShardingErr, WorkerErr};
pub use gate::GateScope;
pub use metrics::WorkerMetrics;
pub use trainer::Trainer;
pub use worker::{Trained, Worker};

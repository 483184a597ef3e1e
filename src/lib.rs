pub mod budget;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod runner;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, OrchestrationError, PlanError};
pub use types::*;

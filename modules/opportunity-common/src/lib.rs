pub mod config;
pub mod error;
pub mod file_config;
pub mod stats;
pub mod types;

pub use config::AppConfig;
pub use error::PipelineError;
pub use file_config::{load_config, PipelineConfig};
pub use stats::{Degradation, RunStats, StageStats};
pub use types::*;

pub mod app_config;
pub mod daemon;
pub mod database;
pub mod observability;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use daemon::{DaemonConfig, ExecutorConfig, SchedulerConfig};
pub use database::DatabaseConfig;
pub use observability::{LoggingConfig, ObservabilityConfig};

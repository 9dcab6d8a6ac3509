pub mod config;
pub mod daemon;
pub mod errors;
pub mod logging;
pub mod models;
pub mod queue_registry;
pub mod recurrence;
pub mod store;
pub mod task_registry;
pub mod traits;

pub use config::*;
pub use daemon::*;
pub use errors::*;
pub use logging::*;
pub use models::*;
pub use queue_registry::*;
pub use store::Store;
pub use task_registry::TaskRegistry;
pub use traits::*;

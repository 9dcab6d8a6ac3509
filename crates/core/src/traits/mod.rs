mod backup;
mod queue;
mod repository;
mod task_handler;

pub use backup::*;
pub use queue::*;
pub use repository::*;
pub use task_handler::*;

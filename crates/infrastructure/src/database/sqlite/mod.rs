pub mod sqlite_daemon_repository;
pub mod sqlite_instance_repository;
pub mod sqlite_job_repository;
pub mod sqlite_queue_repository;
pub mod sqlite_schedule_repository;
pub mod sqlite_task_repository;

pub use sqlite_daemon_repository::SqliteDaemonRepository;
pub use sqlite_instance_repository::SqliteInstanceRepository;
pub use sqlite_job_repository::SqliteJobRepository;
pub use sqlite_queue_repository::SqliteQueueRepository;
pub use sqlite_schedule_repository::SqliteScheduleRepository;
pub use sqlite_task_repository::SqliteTaskRepository;

mod alarm_repository;
mod camera_repository;
mod result_repository;
mod task_repository;

pub use alarm_repository::PostgresAlarmRepository;
pub use camera_repository::PostgresCameraRepository;
pub use result_repository::PostgresResultRepository;
pub use task_repository::PostgresTaskRepository;

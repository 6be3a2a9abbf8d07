pub mod alarms;
pub mod health;
pub mod scheduler;
pub mod tasks;
pub mod workers;

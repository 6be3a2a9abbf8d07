pub mod collaborators;
pub mod message_queue;
pub mod repository;

pub use collaborators::*;
pub use message_queue::*;
pub use repository::*;

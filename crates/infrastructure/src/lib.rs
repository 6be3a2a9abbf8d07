//! 基础设施实现：PostgreSQL仓储、内存仓储、消息队列、对象存储与图像获取

pub mod database;
pub mod image_source;
pub mod in_memory_queue;
pub mod memory;
pub mod message_queue;
pub mod storage;

pub use database::*;
pub use image_source::HttpSnapshotImageSource;
pub use in_memory_queue::InMemoryMessageQueue;
pub use memory::*;
pub use message_queue::RabbitMQMessageQueue;
pub use storage::HttpObjectStore;

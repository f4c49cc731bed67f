pub mod cache;
pub mod stream;

pub use cache::connect_manager;
pub use cache::create_redis_client;
pub use cache::CacheWriterHandle;
pub use cache::RedisCandidateStore;
pub use stream::{RedisStreamPublisher, RedisStreamSource};

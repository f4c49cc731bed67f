pub mod candidates;
pub mod interaction_log;
pub mod memory;
pub mod redis;

pub use candidates::{CacheKey, CandidateStore};
pub use interaction_log::{CsvInteractionLog, InteractionLog, MemoryInteractionLog};
pub use memory::MemoryCandidateStore;
pub use redis::{create_redis_client, RedisCandidateStore};

// Infrastructure layer - 基础设施层
// 负责各种基础服务：缓存后端、回源缓存、数据库、Redis、事件总线、指标

pub mod cache;
pub mod database;
pub mod event_bus;
pub mod keyed_cache;
pub mod metrics;
pub mod redis;

// 重新导出主要类型
pub use cache::{CacheBackend, MemoryCacheBackend, RedisCacheBackend};
pub use database::Database;
pub use event_bus::EventBus;
pub use keyed_cache::{KeyedCacheStore, PendingInvalidation};
pub use redis::RedisClient;

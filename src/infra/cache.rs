//! 缓存后端
//!
//! `CacheBackend` 只负责按字符串 key 存取序列化后的值，回源、合并加载和延迟删除都在
//! [`KeyedCacheStore`](crate::infra::keyed_cache::KeyedCacheStore) 中实现。
//!
//! - `RedisCacheBackend`：多节点共享，生产环境使用
//! - `MemoryCacheBackend`：Moka 进程内缓存，开发模式与测试使用

use std::future::Future;
use std::time::{Duration, Instant};

use moka::future::Cache;
use moka::Expiry;

use crate::error::Result;
use crate::infra::redis::RedisClient;

/// 缓存后端接口
///
/// 以泛型方式使用（非 trait object），热路径上没有动态分发。
pub trait CacheBackend: Send + Sync + 'static {
    /// 读取单个 key
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// 批量读取，返回值与 keys 一一对应
    fn mget(&self, keys: &[String]) -> impl Future<Output = Result<Vec<Option<String>>>> + Send;

    /// 写入并设置过期时间
    fn set(&self, key: &str, value: String, ttl: Duration) -> impl Future<Output = Result<()>> + Send;

    /// 删除多个 key，返回实际删除的数量
    fn del(&self, keys: &[String]) -> impl Future<Output = Result<usize>> + Send;
}

/// Redis 缓存后端
#[derive(Clone)]
pub struct RedisCacheBackend {
    client: RedisClient,
}

impl RedisCacheBackend {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }
}

impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.client.get::<String>(key).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.client.mget::<String>(keys).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        // SETEX 不接受 0 秒
        let seconds = ttl.as_secs().max(1);
        self.client.set_ex(key, value, seconds).await
    }

    async fn del(&self, keys: &[String]) -> Result<usize> {
        self.client.del(keys).await
    }
}

#[derive(Clone)]
struct CachedEntry {
    value: String,
    ttl: Duration,
}

/// 每个条目使用写入时指定的 TTL
struct EntryExpiry;

impl Expiry<String, CachedEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Moka 进程内缓存后端
#[derive(Clone)]
pub struct MemoryCacheBackend {
    cache: Cache<String, CachedEntry>,
}

impl MemoryCacheBackend {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();
        Self { cache }
    }

    /// 当前条目数（近似值，含未清理的过期条目）
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.cache.get(key).await.map(|entry| entry.value))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.cache.get(key).await.map(|entry| entry.value));
        }
        Ok(results)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.cache
            .insert(key.to_string(), CachedEntry { value, ttl })
            .await;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.cache.remove(key).await.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

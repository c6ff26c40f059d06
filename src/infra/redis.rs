// RedisClient - Redis客户端实现
// 基于 bb8-redis 连接池

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RedisConfig;
use crate::error::{Result, ServerError};

/// Redis 客户端（基于连接池）
///
/// 由进程装配层创建并注入到缓存、读状态存储中，组件本身不负责连接的生命周期。
#[derive(Clone)]
pub struct RedisClient {
    pool: Arc<Pool<RedisConnectionManager>>,
    /// 单条 Redis 命令的执行超时
    command_timeout: Duration,
}

impl RedisClient {
    /// 创建新的 Redis 客户端（从 RedisConfig 配置）
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url.clone())
            .map_err(|e| ServerError::Redis(format!("Failed to create Redis manager: {}", e)))?;

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(config.connection_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .build(manager)
            .await
            .map_err(|e| ServerError::Redis(format!("Failed to create Redis pool: {}", e)))?;

        // 测试连接
        {
            let mut conn = pool.get().await?;
            let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        }

        tracing::info!(
            "✅ Redis 连接池已创建 (pool_size={}, min_idle={}, conn_timeout={}s, cmd_timeout={}ms, idle_timeout={}s)",
            config.pool_size,
            config.min_idle,
            config.connection_timeout_secs,
            config.command_timeout_ms,
            config.idle_timeout_secs,
        );

        Ok(Self {
            pool: Arc::new(pool),
            command_timeout: config.command_timeout(),
        })
    }

    async fn get_conn(&self) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>> {
        Ok(self.pool.get().await?)
    }

    /// 执行带超时的 Redis 操作
    async fn with_timeout<F, T>(&self, op: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.command_timeout, op)
            .await
            .map_err(|_| {
                ServerError::Timeout(format!(
                    "Redis command timeout ({}ms)",
                    self.command_timeout.as_millis()
                ))
            })?
    }

    // ============================================================
    // String 操作
    // ============================================================

    /// SET key value
    pub async fn set<V>(&self, key: &str, value: V) -> Result<()>
    where
        V: redis::ToRedisArgs + Send + Sync,
    {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            conn.set::<_, _, ()>(key, value).await?;
            Ok(())
        })
        .await
    }

    /// SETEX key seconds value
    pub async fn set_ex<V>(&self, key: &str, value: V, seconds: u64) -> Result<()>
    where
        V: redis::ToRedisArgs + Send + Sync,
    {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            conn.set_ex::<_, _, ()>(key, value, seconds).await?;
            Ok(())
        })
        .await
    }

    /// GET key
    pub async fn get<V>(&self, key: &str) -> Result<Option<V>>
    where
        V: redis::FromRedisValue + Send,
    {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            let result: Option<V> = conn.get(key).await?;
            Ok(result)
        })
        .await
    }

    /// MGET key [key ...]，返回值与 keys 一一对应
    pub async fn mget<V>(&self, keys: &[String]) -> Result<Vec<Option<V>>>
    where
        V: redis::FromRedisValue + Send,
    {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            // 单个 key 时 MGET 仍返回数组，这里显式走 cmd 保证返回结构一致
            let result: Vec<Option<V>> = redis::cmd("MGET")
                .arg(keys)
                .query_async(&mut *conn)
                .await?;
            Ok(result)
        })
        .await
    }

    /// DEL key [key ...]，返回实际删除的数量
    pub async fn del(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            let removed: usize = conn.del(keys).await?;
            Ok(removed)
        })
        .await
    }

    // ============================================================
    // Set 操作
    // ============================================================

    /// SADD key member [member ...]
    pub async fn sadd<M>(&self, key: &str, members: &[M]) -> Result<()>
    where
        M: redis::ToRedisArgs + Send + Sync,
    {
        if members.is_empty() {
            return Ok(());
        }
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            conn.sadd::<_, _, ()>(key, members).await?;
            Ok(())
        })
        .await
    }
}

//! 按 key 回源的旁路缓存
//!
//! ```text
//! ┌──────────────┐   hit
//! │ CacheBackend │ ─────────────→ 反序列化返回
//! └──────┬───────┘
//!   miss │
//!        ↓
//! ┌──────────────┐   同一 key 的并发 miss（单 key 与批量路径共用）只登记一次回源，
//! │   inflight   │   登记者负责回源并广播结果，其余调用者等待同一结果（成功、失败或空洞）
//! └──────┬───────┘
//!        ↓
//! ┌──────────────┐
//! │    Origin    │ ─→ 写回缓存（TTL 随机缩短）
//! └──────────────┘
//! ```
//!
//! 删除不会立即执行：`defer_delete` 返回 [`PendingInvalidation`]，
//! 调用方在源存储写入提交之后再 `apply()`。

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Result, ServerError};
use crate::infra::cache::CacheBackend;
use crate::infra::metrics;

/// 回源结果（序列化后的缓存值），`None` 表示仍在回源
type Flight = Arc<watch::Sender<Option<Result<String>>>>;
type FlightMap = Arc<DashMap<String, Flight>>;

/// 对一次登记的回源负责
///
/// 未调用 `resolve` 就被丢弃（回源 future 被取消）时，等待者收到 `Internal` 错误，不会永久挂起。
struct FlightLease {
    key: String,
    flight: Flight,
    inflight: FlightMap,
}

impl FlightLease {
    fn resolve(self, outcome: Result<String>) {
        self.flight.send_replace(Some(outcome));
    }
}

impl Drop for FlightLease {
    fn drop(&mut self) {
        let pending = self.flight.borrow().is_none();
        if pending {
            self.flight.send_replace(Some(Err(ServerError::Internal(format!(
                "origin load for {} was cancelled",
                self.key
            )))));
        }
        self.inflight
            .remove_if(&self.key, |_, current| Arc::ptr_eq(current, &self.flight));
    }
}

enum FlightRole {
    Leader(FlightLease),
    Follower(watch::Receiver<Option<Result<String>>>),
}

async fn wait_flight(mut rx: watch::Receiver<Option<Result<String>>>) -> Result<String> {
    let outcome = rx
        .wait_for(Option::is_some)
        .await
        .map_err(|_| ServerError::Internal("origin load dropped without result".to_string()))?;
    match &*outcome {
        Some(result) => result.clone(),
        None => Err(ServerError::Internal("origin load finished without result".to_string())),
    }
}

/// 把值填入 `keys` 中所有等于 `key` 且仍为空的位置（重复 key 都会被填充）
fn fill_slots<V: Clone>(keys: &[String], slots: &mut [Option<V>], key: &str, value: &V) {
    for (pos, slot_key) in keys.iter().enumerate() {
        if slot_key == key && slots[pos].is_none() {
            slots[pos] = Some(value.clone());
        }
    }
}

/// 旁路缓存：单 key / 批量 key 读穿透 + 延迟删除
pub struct KeyedCacheStore<B> {
    backend: Arc<B>,
    /// 正在回源的 key（作用域为单个 key，不同 key 之间互不阻塞）
    inflight: FlightMap,
    /// 过期时间随机缩短比例，取值 [0, 1)
    random_expire_adjustment: f64,
}

impl<B> Clone for KeyedCacheStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            inflight: self.inflight.clone(),
            random_expire_adjustment: self.random_expire_adjustment,
        }
    }
}

impl<B: CacheBackend> KeyedCacheStore<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            inflight: Arc::new(DashMap::new()),
            random_expire_adjustment: 0.0,
        }
    }

    /// 设置过期时间随机缩短比例，避免同一批 key 在同一时刻集中过期
    pub fn with_random_expire_adjustment(mut self, adjustment: f64) -> Self {
        self.random_expire_adjustment = if adjustment.is_finite() {
            adjustment.clamp(0.0, 0.99)
        } else {
            0.0
        };
        self
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn expire_for(&self, ttl: Duration) -> Duration {
        if self.random_expire_adjustment <= 0.0 {
            return ttl;
        }
        let factor = 1.0 - fastrand::f64() * self.random_expire_adjustment;
        ttl.mul_f64(factor)
    }

    /// 登记回源：key 没有进行中的回源时成为负责者，否则订阅已有的回源
    fn join_flight(&self, key: &str) -> FlightRole {
        match self.inflight.entry(key.to_string()) {
            Entry::Occupied(entry) => FlightRole::Follower(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, _) = watch::channel(None);
                let flight = Arc::new(tx);
                entry.insert(flight.clone());
                FlightRole::Leader(FlightLease {
                    key: key.to_string(),
                    flight,
                    inflight: self.inflight.clone(),
                })
            }
        }
    }

    /// 读缓存，未命中时回源并写回。
    ///
    /// 同一 key 的并发未命中只会触发一次 `loader`；回源失败时所有等待者收到同一个错误，且不写缓存。
    pub async fn get_or_load<V, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.read_cached::<V>(key).await? {
            metrics::record_cache_hit(key, 1);
            return Ok(value);
        }
        metrics::record_cache_miss(key, 1);

        let raw = match self.join_flight(key) {
            FlightRole::Follower(rx) => {
                metrics::record_coalesced_wait(key);
                wait_flight(rx).await?
            }
            FlightRole::Leader(lease) => {
                let outcome = self.load_and_store::<V, _, _>(key, ttl, loader).await;
                lease.resolve(outcome.clone());
                outcome?
            }
        };
        Ok(serde_json::from_str(&raw)?)
    }

    async fn load_and_store<V, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<String>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        // 上一轮回源可能刚刚写回并退出 inflight，再确认一次避免重复回源；
        // 解析不了的旧值照常回源覆盖
        if let Some(raw) = self.backend.get(key).await? {
            if serde_json::from_str::<V>(&raw).is_ok() {
                return Ok(raw);
            }
        }

        metrics::record_origin_load(key);
        let value = loader().await?;
        let raw = serde_json::to_string(&value)?;

        if let Err(e) = self.backend.set(key, raw.clone(), self.expire_for(ttl)).await {
            warn!("写回缓存失败，本次直接返回源数据: key={}, error={}", key, e);
        }
        Ok(raw)
    }

    async fn read_cached<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        let Some(raw) = self.backend.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<V>(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("缓存内容无法解析，按未命中处理: key={}, error={}", key, e);
                Ok(None)
            }
        }
    }

    /// 批量读缓存，本次负责回源的未命中 key 合并为一次 `loader` 调用。
    ///
    /// `loader` 收到未命中 key 在 `keys` 中的下标；源存储返回的实体顺序不要求与 key 一致，
    /// 由 `index_of` 把实体对齐回 key。对不上的实体（`ServerError::IndexNotFound`）直接跳过，
    /// 源存储少返回的 key 在结果中表现为空洞。结果按 `keys` 顺序排列，重复 key 会得到重复值。
    ///
    /// 已经有其他调用者（单 key 或批量）在回源的 key 不会再交给 `loader`，而是等待那次回源的结果。
    pub async fn batch_get_or_load<V, I, F, Fut>(
        &self,
        keys: &[String],
        ttl: Duration,
        index_of: I,
        loader: F,
    ) -> Result<Vec<V>>
    where
        V: Serialize + DeserializeOwned + Clone,
        I: Fn(&V, &[String]) -> Result<usize>,
        F: FnOnce(Vec<usize>) -> Fut,
        Fut: Future<Output = Result<Vec<V>>>,
    {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let cached = self.backend.mget(keys).await?;
        let mut slots: Vec<Option<V>> = Vec::with_capacity(keys.len());
        let mut misses = Vec::new();
        for (idx, raw) in cached.into_iter().enumerate() {
            let value = raw.and_then(|raw| match serde_json::from_str::<V>(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("缓存内容无法解析，按未命中处理: key={}, error={}", keys[idx], e);
                    None
                }
            });
            if value.is_none() {
                misses.push(idx);
            }
            slots.push(value);
        }
        metrics::record_batch_lookup(keys, &misses);

        // 重复 key 只登记一次
        let mut seen = HashSet::with_capacity(misses.len());
        let mut led: Vec<(usize, FlightLease)> = Vec::new();
        let mut followers = Vec::new();
        for &idx in &misses {
            if !seen.insert(keys[idx].as_str()) {
                continue;
            }
            match self.join_flight(&keys[idx]) {
                FlightRole::Leader(lease) => led.push((idx, lease)),
                FlightRole::Follower(rx) => followers.push((idx, rx)),
            }
        }

        // 登记之前可能有回源刚写回并退出 inflight，再确认一次
        if !led.is_empty() {
            let led_keys: Vec<String> = led.iter().map(|(idx, _)| keys[*idx].clone()).collect();
            let rechecked = match self.backend.mget(&led_keys).await {
                Ok(rechecked) => rechecked,
                Err(e) => {
                    for (_, lease) in led {
                        lease.resolve(Err(e.clone()));
                    }
                    return Err(e);
                }
            };
            let mut pending = Vec::with_capacity(led.len());
            for ((idx, lease), raw) in led.into_iter().zip(rechecked) {
                let decoded = raw.and_then(|raw| {
                    serde_json::from_str::<V>(&raw).ok().map(|value| (value, raw))
                });
                match decoded {
                    Some((value, raw)) => {
                        fill_slots(keys, &mut slots, &keys[idx], &value);
                        lease.resolve(Ok(raw));
                    }
                    None => pending.push((idx, lease)),
                }
            }
            led = pending;
        }

        // 先完成自己负责的回源，再等待别人的，避免两个批量调用互相等待
        if !led.is_empty() {
            let led_idx: Vec<usize> = led.iter().map(|(idx, _)| *idx).collect();
            match self.load_led(keys, &led_idx, ttl, &index_of, loader).await {
                Ok(rows) => {
                    for (idx, lease) in led {
                        let key = &keys[idx];
                        match rows.get(key) {
                            Some((value, raw)) => {
                                fill_slots(keys, &mut slots, key, value);
                                lease.resolve(Ok(raw.clone()));
                            }
                            None => lease.resolve(Err(ServerError::NotFound(key.clone()))),
                        }
                    }
                }
                Err(e) => {
                    for (_, lease) in led {
                        lease.resolve(Err(e.clone()));
                    }
                    return Err(e);
                }
            }
        }

        for (idx, rx) in followers {
            let key = &keys[idx];
            metrics::record_coalesced_wait(key);
            let value: V = match wait_flight(rx).await {
                Ok(raw) => serde_json::from_str(&raw)?,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            fill_slots(keys, &mut slots, key, &value);
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// 对负责的 key 执行一次批量回源并写回，返回 key -> (实体, 序列化值)
    async fn load_led<V, I, F, Fut>(
        &self,
        keys: &[String],
        led_idx: &[usize],
        ttl: Duration,
        index_of: &I,
        loader: F,
    ) -> Result<HashMap<String, (V, String)>>
    where
        V: Serialize,
        I: Fn(&V, &[String]) -> Result<usize>,
        F: FnOnce(Vec<usize>) -> Fut,
        Fut: Future<Output = Result<Vec<V>>>,
    {
        metrics::record_origin_load(&keys[led_idx[0]]);
        let loaded = loader(led_idx.to_vec()).await?;
        let led_keys: HashSet<&str> = led_idx.iter().map(|&i| keys[i].as_str()).collect();

        let mut rows = HashMap::with_capacity(led_idx.len());
        for entity in loaded {
            let idx = match index_of(&entity, keys) {
                Ok(idx) => idx,
                Err(ServerError::IndexNotFound) => {
                    debug!("回源实体无法对齐到缓存 key，跳过");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let key = &keys[idx];
            if !led_keys.contains(key.as_str()) {
                debug!("回源实体不属于本次负责的 key，跳过: key={}", key);
                continue;
            }

            let raw = serde_json::to_string(&entity)?;
            if let Err(e) = self.backend.set(key, raw.clone(), self.expire_for(ttl)).await {
                warn!("写回缓存失败: key={}, error={}", key, e);
            }
            rows.insert(key.clone(), (entity, raw));
        }
        Ok(rows)
    }

    /// 构造延迟删除句柄，调用 `apply()` 前不会删除任何 key
    pub fn defer_delete<I>(&self, keys: I) -> PendingInvalidation<B>
    where
        I: IntoIterator<Item = String>,
    {
        PendingInvalidation {
            backend: self.backend.clone(),
            keys: keys.into_iter().collect(),
        }
    }
}

/// 待执行的缓存删除
///
/// 不可变：每次 `with_keys` 都返回新的句柄，原句柄不受影响。
/// 必须在源存储写入提交之后才能 `apply()`，否则并发读可能把旧数据重新写回缓存。
/// 多个 key 的删除不是原子的，部分失败会在 TTL 到期后自愈。
pub struct PendingInvalidation<B> {
    backend: Arc<B>,
    keys: Vec<String>,
}

impl<B> Clone for PendingInvalidation<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            keys: self.keys.clone(),
        }
    }
}

impl<B: CacheBackend> PendingInvalidation<B> {
    /// 追加 key，返回新的句柄
    pub fn with_keys<I>(&self, keys: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut next = self.clone();
        next.keys.extend(keys);
        next
    }

    /// 待删除的 key
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// 执行删除，返回实际删除的 key 数量
    pub async fn apply(&self) -> Result<usize> {
        if self.keys.is_empty() {
            return Ok(0);
        }
        let mut seen = HashSet::with_capacity(self.keys.len());
        let keys: Vec<String> = self
            .keys
            .iter()
            .filter(|key| seen.insert(key.as_str()))
            .cloned()
            .collect();

        let removed = self.backend.del(&keys).await?;
        metrics::record_invalidated(removed);
        debug!("🗑️ 删除缓存: keys={:?}, removed={}", keys, removed);
        Ok(removed)
    }
}

//! Prometheus 指标：缓存命中率、回源次数、合并等待、失效 key 数、已读回执下发量、RPC 延迟
//!
//! 通过 `init(port)` 安装全局 Recorder 并启动抓取端点；未初始化时所有记录调用都是空操作。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::OnceLock;

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 指标名称
const COUNTER_CACHE_HIT: &str = "privchat_delivery_cache_hit_total";
const COUNTER_CACHE_MISS: &str = "privchat_delivery_cache_miss_total";
const COUNTER_ORIGIN_LOAD: &str = "privchat_delivery_origin_load_total";
const COUNTER_COALESCED_WAIT: &str = "privchat_delivery_coalesced_wait_total";
const COUNTER_CACHE_INVALIDATED: &str = "privchat_delivery_cache_invalidated_total";
const COUNTER_READ_RECEIPT: &str = "privchat_delivery_read_receipt_total";
const COUNTER_RPC_TOTAL: &str = "privchat_delivery_rpc_total";
const HISTOGRAM_RPC_DURATION: &str = "privchat_delivery_rpc_duration_seconds";

/// 安装 Prometheus exporter，监听 `0.0.0.0:port`。
/// 仅需在进程内调用一次；重复调用会返回 Err。
pub fn init(port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    INSTALLED.set(()).map_err(|_| "metrics already initialized")?;
    Ok(())
}

/// 是否已初始化
pub fn is_initialized() -> bool {
    INSTALLED.get().is_some()
}

/// 缓存 key 的族名：取 key 前缀（`GROUP_INFO:g1` -> `GROUP_INFO`）
fn family(key: &str) -> String {
    key.split(':').next().unwrap_or(key).to_string()
}

pub fn record_cache_hit(key: &str, count: u64) {
    metrics::counter!(COUNTER_CACHE_HIT, "family" => family(key)).increment(count);
}

pub fn record_cache_miss(key: &str, count: u64) {
    metrics::counter!(COUNTER_CACHE_MISS, "family" => family(key)).increment(count);
}

/// 批量读取的命中 / 未命中按 key 族汇总后一次性计数
pub fn record_batch_lookup(keys: &[String], miss_idx: &[usize]) {
    for (family, (hits, misses)) in tally_by_family(keys, miss_idx) {
        if hits > 0 {
            metrics::counter!(COUNTER_CACHE_HIT, "family" => family.clone()).increment(hits);
        }
        if misses > 0 {
            metrics::counter!(COUNTER_CACHE_MISS, "family" => family).increment(misses);
        }
    }
}

/// key 族 -> (命中数, 未命中数)
fn tally_by_family(keys: &[String], miss_idx: &[usize]) -> HashMap<String, (u64, u64)> {
    let mut tally: HashMap<String, (u64, u64)> = HashMap::new();
    for (idx, key) in keys.iter().enumerate() {
        let entry = tally.entry(family(key)).or_default();
        if miss_idx.contains(&idx) {
            entry.1 += 1;
        } else {
            entry.0 += 1;
        }
    }
    tally
}

pub fn record_origin_load(key: &str) {
    metrics::counter!(COUNTER_ORIGIN_LOAD, "family" => family(key)).increment(1);
}

pub fn record_coalesced_wait(key: &str) {
    metrics::counter!(COUNTER_COALESCED_WAIT, "family" => family(key)).increment(1);
}

pub fn record_invalidated(count: usize) {
    metrics::counter!(COUNTER_CACHE_INVALIDATED).increment(count as u64);
}

pub fn record_read_receipt(conversation_type: &'static str) {
    metrics::counter!(COUNTER_READ_RECEIPT, "conversation_type" => conversation_type).increment(1);
}

/// 记录一次 RPC 调用：总次数 + 耗时直方图。
pub fn record_rpc(route: &'static str, duration_secs: f64) {
    metrics::counter!(COUNTER_RPC_TOTAL, "route" => route).increment(1);
    metrics::histogram!(HISTOGRAM_RPC_DURATION, "route" => route).record(duration_secs);
}

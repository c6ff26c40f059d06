pub mod group;
pub mod msg;
pub mod router;
pub mod types;

pub use group::GroupServer;
pub use msg::MsgServer;
pub use router::RpcRouter;
pub use types::{RPCMessageRequest, RPCMessageResponse};

use crate::infra::CacheBackend;
use crate::service::{GroupCache, ReadSeqService};

/// 创建路由器并注册所有模块
pub async fn build_router<B: CacheBackend>(
    read_seq: ReadSeqService<B>,
    group_cache: GroupCache<B>,
) -> RpcRouter {
    let router = RpcRouter::new();
    MsgServer::new(read_seq).register_routes(&router).await;
    GroupServer::new(group_cache).register_routes(&router).await;
    tracing::info!("✅ RPC 路由注册完成: {:?}", router.list_routes().await);
    router
}

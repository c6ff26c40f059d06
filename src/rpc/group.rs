//! group 模块：成员指纹查询
//!
//! 客户端用指纹与本地成员列表比对，不一致时再拉取完整成员列表。

use super::msg::{call_json, timed};
use super::router::RpcRouter;
use super::types::{GetGroupMemberHashMapReq, GetGroupMemberHashMapResp};
use crate::error::Result;
use crate::infra::CacheBackend;
use crate::service::GroupCache;

pub const ROUTE_GET_GROUP_MEMBER_HASH_MAP: &str = "group/get_group_member_hash_map";

pub struct GroupServer<B> {
    group_cache: GroupCache<B>,
}

impl<B> Clone for GroupServer<B> {
    fn clone(&self) -> Self {
        Self {
            group_cache: self.group_cache.clone(),
        }
    }
}

impl<B: CacheBackend> GroupServer<B> {
    pub fn new(group_cache: GroupCache<B>) -> Self {
        Self { group_cache }
    }

    pub async fn get_group_member_hash_map(
        &self,
        req: GetGroupMemberHashMapReq,
    ) -> Result<GetGroupMemberHashMapResp> {
        timed(ROUTE_GET_GROUP_MEMBER_HASH_MAP, async {
            let group_hash_map = self
                .group_cache
                .get_group_member_hash_map(&req.group_ids)
                .await?;
            Ok(GetGroupMemberHashMapResp { group_hash_map })
        })
        .await
    }

    pub async fn register_routes(&self, router: &RpcRouter) {
        router
            .register(ROUTE_GET_GROUP_MEMBER_HASH_MAP, {
                let server = self.clone();
                move |body| {
                    let server = server.clone();
                    async move {
                        call_json(body, |req: GetGroupMemberHashMapReq| async move {
                            server.get_group_member_hash_map(req).await
                        })
                        .await
                    }
                }
            })
            .await;

        tracing::debug!("📋 group 模块路由注册完成");
    }
}

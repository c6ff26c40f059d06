//! msg 模块：已读位置相关 RPC

use std::future::Future;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::router::RpcRouter;
use super::types::*;
use crate::error::Result;
use crate::infra::{metrics, CacheBackend};
use crate::service::ReadSeqService;

pub const ROUTE_GET_CONVERSATIONS_HAS_READ_AND_MAX_SEQ: &str =
    "msg/get_conversations_has_read_and_max_seq";
pub const ROUTE_SET_CONVERSATION_HAS_READ_SEQ: &str = "msg/set_conversation_has_read_seq";
pub const ROUTE_MARK_MSGS_AS_READ: &str = "msg/mark_msgs_as_read";
pub const ROUTE_MARK_CONVERSATION_AS_READ: &str = "msg/mark_conversation_as_read";

/// 记录单次调用耗时
pub(crate) async fn timed<T, Fut>(route: &'static str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let result = fut.await;
    metrics::record_rpc(route, started.elapsed().as_secs_f64());
    result
}

/// JSON body -> 请求 -> 响应 -> JSON
pub(crate) async fn call_json<Req, Resp, F, Fut>(body: Value, f: F) -> Result<Value>
where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: FnOnce(Req) -> Fut,
    Fut: Future<Output = Result<Resp>>,
{
    let req: Req = serde_json::from_value(body)?;
    let resp = f(req).await?;
    Ok(serde_json::to_value(resp)?)
}

pub struct MsgServer<B> {
    read_seq: ReadSeqService<B>,
}

impl<B> Clone for MsgServer<B> {
    fn clone(&self) -> Self {
        Self {
            read_seq: self.read_seq.clone(),
        }
    }
}

impl<B: CacheBackend> MsgServer<B> {
    pub fn new(read_seq: ReadSeqService<B>) -> Self {
        Self { read_seq }
    }

    pub async fn get_conversations_has_read_and_max_seq(
        &self,
        req: GetConversationsHasReadAndMaxSeqReq,
    ) -> Result<GetConversationsHasReadAndMaxSeqResp> {
        timed(ROUTE_GET_CONVERSATIONS_HAS_READ_AND_MAX_SEQ, async {
            let seqs = self
                .read_seq
                .get_conversations_has_read_and_max_seq(&req.user_id)
                .await?;
            Ok(GetConversationsHasReadAndMaxSeqResp { seqs })
        })
        .await
    }

    pub async fn set_conversation_has_read_seq(
        &self,
        req: SetConversationHasReadSeqReq,
    ) -> Result<SetConversationHasReadSeqResp> {
        timed(ROUTE_SET_CONVERSATION_HAS_READ_SEQ, async {
            self.read_seq
                .set_conversation_has_read_seq(&req.user_id, &req.conversation_id, req.has_read_seq)
                .await?;
            Ok(SetConversationHasReadSeqResp {})
        })
        .await
    }

    pub async fn mark_msgs_as_read(&self, req: MarkMsgsAsReadReq) -> Result<MarkMsgsAsReadResp> {
        timed(ROUTE_MARK_MSGS_AS_READ, async {
            self.read_seq
                .mark_msgs_as_read(&req.user_id, &req.conversation_id, &req.seqs)
                .await?;
            Ok(MarkMsgsAsReadResp {})
        })
        .await
    }

    pub async fn mark_conversation_as_read(
        &self,
        req: MarkConversationAsReadReq,
    ) -> Result<MarkConversationAsReadResp> {
        timed(ROUTE_MARK_CONVERSATION_AS_READ, async {
            self.read_seq
                .mark_conversation_as_read(
                    &req.user_id,
                    &req.conversation_id,
                    &req.seqs,
                    req.has_read_seq,
                )
                .await?;
            Ok(MarkConversationAsReadResp {})
        })
        .await
    }

    /// 注册 msg 模块的所有路由
    pub async fn register_routes(&self, router: &RpcRouter) {
        router
            .register(ROUTE_GET_CONVERSATIONS_HAS_READ_AND_MAX_SEQ, {
                let server = self.clone();
                move |body| {
                    let server = server.clone();
                    async move {
                        call_json(body, |req: GetConversationsHasReadAndMaxSeqReq| async move {
                            server.get_conversations_has_read_and_max_seq(req).await
                        })
                        .await
                    }
                }
            })
            .await;

        router
            .register(ROUTE_SET_CONVERSATION_HAS_READ_SEQ, {
                let server = self.clone();
                move |body| {
                    let server = server.clone();
                    async move {
                        call_json(body, |req: SetConversationHasReadSeqReq| async move {
                            server.set_conversation_has_read_seq(req).await
                        })
                        .await
                    }
                }
            })
            .await;

        router
            .register(ROUTE_MARK_MSGS_AS_READ, {
                let server = self.clone();
                move |body| {
                    let server = server.clone();
                    async move {
                        call_json(body, |req: MarkMsgsAsReadReq| async move {
                            server.mark_msgs_as_read(req).await
                        })
                        .await
                    }
                }
            })
            .await;

        router
            .register(ROUTE_MARK_CONVERSATION_AS_READ, {
                let server = self.clone();
                move |body| {
                    let server = server.clone();
                    async move {
                        call_json(body, |req: MarkConversationAsReadReq| async move {
                            server.mark_conversation_as_read(req).await
                        })
                        .await
                    }
                }
            })
            .await;

        tracing::debug!("📋 msg 模块路由注册完成");
    }
}

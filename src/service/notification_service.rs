//! 通知服务：已读回执的收件人解析与下发
//!
//! 真正的推送通道不在本服务内，`NotificationSender` 只负责把一条通知交给下游；
//! 默认实现发布到进程内事件总线，由推送层订阅后下发给客户端。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::DomainEvent;
use crate::error::{Result, ServerError};
use crate::infra::{metrics, CacheBackend, EventBus};
use crate::model::{ContentType, Conversation, ConversationType, MarkAsReadTips};
use crate::service::GroupCache;

/// 通知下发通道
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn notify(
        &self,
        send_id: &str,
        recv_id: &str,
        content_type: ContentType,
        conversation_type: ConversationType,
        tips: &MarkAsReadTips,
    ) -> Result<()>;
}

/// 发布到事件总线的通知通道
pub struct EventBusNotificationSender {
    bus: Arc<EventBus>,
}

impl EventBusNotificationSender {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl NotificationSender for EventBusNotificationSender {
    async fn notify(
        &self,
        send_id: &str,
        recv_id: &str,
        content_type: ContentType,
        conversation_type: ConversationType,
        tips: &MarkAsReadTips,
    ) -> Result<()> {
        let receivers = self.bus.publish(DomainEvent::ReadReceipt {
            send_id: send_id.to_string(),
            recv_id: recv_id.to_string(),
            content_type,
            conversation_type,
            tips: tips.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
        debug!(
            "📨 已读回执已发布: send_id={}, recv_id={}, conversation_id={}, subscribers={}",
            send_id, recv_id, tips.conversation_id, receivers
        );
        Ok(())
    }
}

/// 已读回执分发器
///
/// 单聊 / 通知会话发给对端，群聊发给全体群成员（包含操作者本人，用于多端同步）。
pub struct NotificationDispatcher<B> {
    group_cache: GroupCache<B>,
    sender: Arc<dyn NotificationSender>,
}

impl<B> Clone for NotificationDispatcher<B> {
    fn clone(&self) -> Self {
        Self {
            group_cache: self.group_cache.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<B: CacheBackend> NotificationDispatcher<B> {
    pub fn new(group_cache: GroupCache<B>, sender: Arc<dyn NotificationSender>) -> Self {
        Self {
            group_cache,
            sender,
        }
    }

    /// 解析会话的通知收件人
    pub async fn resolve_recipients(
        &self,
        conversation: &Conversation,
        acting_user_id: &str,
    ) -> Result<Vec<String>> {
        match conversation.conversation_type {
            ConversationType::SingleChat | ConversationType::Notification => conversation
                .peer_of(acting_user_id)
                .map(|peer| vec![peer.to_string()])
                .ok_or_else(|| {
                    ServerError::Internal(format!(
                        "conversation {} has no peer user",
                        conversation.conversation_id
                    ))
                }),
            ConversationType::GroupChat | ConversationType::SuperGroupChat => {
                let group_id = conversation.group_id.as_deref().ok_or_else(|| {
                    ServerError::Internal(format!(
                        "conversation {} has no group id",
                        conversation.conversation_id
                    ))
                })?;
                let members = if conversation.conversation_type == ConversationType::SuperGroupChat {
                    self.group_cache.get_super_group_member_ids(group_id).await?
                } else {
                    self.group_cache.get_group_member_ids(group_id).await?
                };
                if members.is_empty() {
                    warn!(
                        "群会话没有任何成员，已读回执无人接收: conversation_id={}, group_id={}",
                        conversation.conversation_id, group_id
                    );
                }
                Ok(members)
            }
        }
    }

    /// 并发下发给所有收件人，返回成功数量；任一收件人失败即返回第一个错误
    pub async fn send_read_receipt(
        &self,
        send_id: &str,
        recipients: &[String],
        conversation_type: ConversationType,
        tips: &MarkAsReadTips,
    ) -> Result<usize> {
        let sends = recipients.iter().map(|recv_id| {
            self.sender.notify(
                send_id,
                recv_id,
                ContentType::HasReadReceipt,
                conversation_type,
                tips,
            )
        });
        let results = futures::future::join_all(sends).await;

        let mut delivered = 0;
        let mut first_error = None;
        for (recv_id, result) in recipients.iter().zip(results) {
            match result {
                Ok(()) => {
                    delivered += 1;
                    metrics::record_read_receipt(conversation_type.as_str());
                }
                Err(e) => {
                    warn!("已读回执下发失败: send_id={}, recv_id={}, error={}", send_id, recv_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(delivered),
        }
    }
}

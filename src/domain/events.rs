use serde::{Deserialize, Serialize};

use crate::model::{ContentType, ConversationType, MarkAsReadTips};

/// Domain Events（领域事件）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// 已读状态变化，需要下发给 `recv_id`
    ReadReceipt {
        send_id: String,
        recv_id: String,
        content_type: ContentType,
        conversation_type: ConversationType,
        tips: MarkAsReadTips,
        timestamp: i64,
    },
}

impl DomainEvent {
    /// 事件名称（日志用）
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::ReadReceipt { .. } => "ReadReceipt",
        }
    }
}

//! 会话模型

use serde::{Deserialize, Serialize};

/// 会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConversationType {
    /// 单聊
    #[default]
    SingleChat = 1,
    /// 群聊
    GroupChat = 2,
    /// 超级群
    SuperGroupChat = 3,
    /// 系统通知会话
    Notification = 4,
}

impl ConversationType {
    pub fn from_i16(value: i16) -> Self {
        match value {
            2 => ConversationType::GroupChat,
            3 => ConversationType::SuperGroupChat,
            4 => ConversationType::Notification,
            _ => ConversationType::SingleChat,
        }
    }

    pub fn to_i16(self) -> i16 {
        self as i16
    }

    /// 用于日志和指标标签
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationType::SingleChat => "single",
            ConversationType::GroupChat => "group",
            ConversationType::SuperGroupChat => "super_group",
            ConversationType::Notification => "notification",
        }
    }

    /// 是否群类会话（收件人为群成员）
    pub fn is_group(self) -> bool {
        matches!(
            self,
            ConversationType::GroupChat | ConversationType::SuperGroupChat
        )
    }
}

/// 用户视角的会话（对应 privchat_conversations 表，每个 (owner_user_id, conversation_id) 一行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// 会话归属用户
    pub owner_user_id: String,
    pub conversation_id: String,
    pub conversation_type: ConversationType,
    /// 单聊对端用户ID
    pub user_id: Option<String>,
    /// 群聊群组ID
    pub group_id: Option<String>,
    /// 会话记录上的 maxSeq，非 0 时优先于序号计数器
    pub max_seq: i64,
}

impl Conversation {
    /// 单聊会话
    pub fn single(
        owner_user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        peer_user_id: impl Into<String>,
    ) -> Self {
        Self {
            owner_user_id: owner_user_id.into(),
            conversation_id: conversation_id.into(),
            conversation_type: ConversationType::SingleChat,
            user_id: Some(peer_user_id.into()),
            group_id: None,
            max_seq: 0,
        }
    }

    /// 群聊会话
    pub fn group(
        owner_user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            owner_user_id: owner_user_id.into(),
            conversation_id: conversation_id.into(),
            conversation_type: ConversationType::GroupChat,
            user_id: None,
            group_id: Some(group_id.into()),
            max_seq: 0,
        }
    }

    pub fn with_max_seq(mut self, max_seq: i64) -> Self {
        self.max_seq = max_seq;
        self
    }

    /// 单聊 / 通知会话中 `acting_user_id` 的对端
    pub fn peer_of(&self, acting_user_id: &str) -> Option<&str> {
        if acting_user_id == self.owner_user_id {
            self.user_id.as_deref()
        } else {
            Some(self.owner_user_id.as_str())
        }
    }

    /// 从数据库行创建
    pub fn from_db_row(
        owner_user_id: String,
        conversation_id: String,
        conversation_type: i16,
        user_id: Option<String>,
        group_id: Option<String>,
        max_seq: i64,
    ) -> Self {
        Self {
            owner_user_id,
            conversation_id,
            conversation_type: ConversationType::from_i16(conversation_type),
            user_id,
            group_id,
            max_seq,
        }
    }
}

//! 序号 / 已读状态模型

use serde::{Deserialize, Serialize};

/// 单个会话的已读位置与最大序号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Seqs {
    #[serde(rename = "hasReadSeq")]
    pub has_read_seq: i64,
    #[serde(rename = "maxSeq")]
    pub max_seq: i64,
}

/// 通知内容类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    /// 已读回执
    HasReadReceipt = 2200,
}

impl ContentType {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// 已读回执通知内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkAsReadTips {
    #[serde(rename = "markAsReadUserID")]
    pub mark_as_read_user_id: String,
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    /// 本次单独标记已读的消息序号，未指定时为空
    #[serde(rename = "seqs", default)]
    pub seqs: Vec<i64>,
    #[serde(rename = "hasReadSeq")]
    pub has_read_seq: i64,
}

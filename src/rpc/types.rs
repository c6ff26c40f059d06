use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorCode, ServerError};
use crate::model::{GroupMemberHash, Seqs};

/// RPC 请求消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RPCMessageRequest {
    /// 路由路径，格式：module/action
    pub route: String,
    /// 请求参数 JSON
    pub body: Value,
}

impl RPCMessageRequest {
    pub fn new(route: impl Into<String>, body: Value) -> Self {
        Self {
            route: route.into(),
            body,
        }
    }
}

/// RPC 响应消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RPCMessageResponse {
    /// 状态码，0 表示成功
    pub code: i32,
    /// 响应消息
    pub message: String,
    /// 响应数据
    pub data: Option<Value>,
}

impl RPCMessageResponse {
    /// 创建成功响应
    pub fn success(data: Value) -> Self {
        Self {
            code: 0,
            message: "OK".to_string(),
            data: Some(data),
        }
    }

    /// 创建错误响应
    pub fn error(code: i32, message: String) -> Self {
        Self {
            code,
            message,
            data: None,
        }
    }

    /// 从服务错误创建（错误码见 [`ErrorCode`]）
    pub fn from_error(error: &ServerError) -> Self {
        Self::error(ErrorCode::from(error).code(), error.to_string())
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

// ============================================================
// msg 模块
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetConversationsHasReadAndMaxSeqReq {
    #[serde(rename = "userID")]
    pub user_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetConversationsHasReadAndMaxSeqResp {
    /// conversationID -> {hasReadSeq, maxSeq}
    pub seqs: HashMap<String, Seqs>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetConversationHasReadSeqReq {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    #[serde(rename = "hasReadSeq")]
    pub has_read_seq: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetConversationHasReadSeqResp {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkMsgsAsReadReq {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    /// 升序
    pub seqs: Vec<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkMsgsAsReadResp {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkConversationAsReadReq {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    #[serde(default)]
    pub seqs: Vec<i64>,
    #[serde(rename = "hasReadSeq", default)]
    pub has_read_seq: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkConversationAsReadResp {}

// ============================================================
// group 模块
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetGroupMemberHashMapReq {
    #[serde(rename = "groupIDs")]
    pub group_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetGroupMemberHashMapResp {
    #[serde(rename = "groupHashMap")]
    pub group_hash_map: HashMap<String, GroupMemberHash>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_field_names() {
        let req: MarkConversationAsReadReq = serde_json::from_value(json!({
            "userID": "u1",
            "conversationID": "si_u1_u2",
            "hasReadSeq": 7
        }))
        .unwrap();
        assert_eq!(req.user_id, "u1");
        assert!(req.seqs.is_empty());
        assert_eq!(req.has_read_seq, 7);
    }

    #[test]
    fn test_response_field_names() {
        let mut resp = GetConversationsHasReadAndMaxSeqResp::default();
        resp.seqs.insert(
            "c1".to_string(),
            Seqs {
                has_read_seq: 3,
                max_seq: 9,
            },
        );
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value, json!({"seqs": {"c1": {"hasReadSeq": 3, "maxSeq": 9}}}));
    }

    #[test]
    fn test_error_response_code() {
        let resp = RPCMessageResponse::from_error(&ServerError::Validation("seqs must not be empty".into()));
        assert_eq!(resp.code, 90001);
        assert!(!resp.is_ok());
    }
}

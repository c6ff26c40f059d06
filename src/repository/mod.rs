//! 源存储接口
//!
//! 缓存未命中时回源到这里。实现只负责读写，不承担任何一致性逻辑；
//! 找不到记录时返回 `ServerError::NotFound`，与存储/网络错误区分开。

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Conversation, Group, GroupMember, RoleLevel};

/// 群组信息
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// 批量查询，返回顺序不保证与 `group_ids` 一致，不存在的群组直接缺失
    async fn find(&self, group_ids: &[String]) -> Result<Vec<Group>>;

    /// 查询单个群组，不存在时返回 NotFound
    async fn take(&self, group_id: &str) -> Result<Group>;
}

/// 普通群成员关系
#[async_trait]
pub trait GroupMemberStore: Send + Sync {
    /// 批量查询成员，参数为空表示不按该维度过滤
    async fn find(
        &self,
        group_ids: &[String],
        user_ids: &[String],
        role_levels: &[RoleLevel],
    ) -> Result<Vec<GroupMember>>;

    /// 查询单个成员，不存在时返回 NotFound
    async fn take(&self, group_id: &str, user_id: &str) -> Result<GroupMember>;

    /// 群内所有成员ID
    async fn find_member_user_ids(&self, group_id: &str) -> Result<Vec<String>>;

    /// 用户加入的所有普通群ID
    async fn find_user_joined_group_ids(&self, user_id: &str) -> Result<Vec<String>>;

    /// 群成员数
    async fn take_group_member_num(&self, group_id: &str) -> Result<i64>;
}

/// 超级群成员关系（独立存储）
#[async_trait]
pub trait SuperGroupStore: Send + Sync {
    /// 用户加入的所有超级群ID
    async fn find_user_super_group_ids(&self, user_id: &str) -> Result<Vec<String>>;

    /// 超级群的全部成员ID
    async fn find_super_group_member_ids(&self, group_id: &str) -> Result<Vec<String>>;
}

/// 会话
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 不存在时返回 NotFound
    async fn get_conversation(&self, owner_user_id: &str, conversation_id: &str) -> Result<Conversation>;

    async fn get_conversations(
        &self,
        owner_user_id: &str,
        conversation_ids: &[String],
    ) -> Result<Vec<Conversation>>;

    /// 用户的所有会话ID
    async fn get_conversation_ids(&self, owner_user_id: &str) -> Result<Vec<String>>;
}

/// 序号计数器与已读状态
#[async_trait]
pub trait SeqStore: Send + Sync {
    /// 会话最大序号，从未写入过时为 0
    async fn get_max_seq(&self, conversation_id: &str) -> Result<i64>;

    async fn get_max_seqs(&self, conversation_ids: &[String]) -> Result<HashMap<String, i64>>;

    /// 用户已读位置，没有记录时返回 None（与 0 区分）
    async fn get_has_read_seq(&self, user_id: &str, conversation_id: &str) -> Result<Option<i64>>;

    /// 批量查询已读位置，没有记录的会话不出现在结果中
    async fn get_has_read_seqs(
        &self,
        user_id: &str,
        conversation_ids: &[String],
    ) -> Result<HashMap<String, i64>>;

    async fn set_has_read_seq(&self, user_id: &str, conversation_id: &str, seq: i64) -> Result<()>;

    /// 逐条标记消息已读（与已读位置相互独立）
    async fn mark_msgs_as_read(&self, user_id: &str, conversation_id: &str, seqs: &[i64]) -> Result<()>;
}

pub mod conversation_repo;
pub mod group_repo;
pub mod memory;
pub mod seq_repo;

pub use conversation_repo::PgConversationRepository;
pub use group_repo::PgGroupRepository;
pub use memory::{MemoryConversationStore, MemoryGroupStore, MemorySeqStore};
pub use seq_repo::RedisSeqRepository;

//! 内存版源存储（开发模式与测试使用）

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{Result, ServerError};
use crate::model::{Conversation, Group, GroupMember, RoleLevel};
use crate::repository::{ConversationStore, GroupMemberStore, GroupStore, SeqStore, SuperGroupStore};

/// 群组 / 群成员 / 超级群成员
#[derive(Default)]
pub struct MemoryGroupStore {
    groups: DashMap<String, Group>,
    /// 按入群顺序保存
    members: RwLock<Vec<GroupMember>>,
    /// user_id -> 超级群ID
    super_groups: DashMap<String, Vec<String>>,
    /// 回源次数
    queries: AtomicUsize,
}

impl MemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_group(&self, group: Group) {
        self.groups.insert(group.group_id.clone(), group);
    }

    /// 加入群组，已是成员时覆盖
    pub fn add_member(&self, member: GroupMember) {
        let mut members = self.members.write();
        members.retain(|m| !(m.group_id == member.group_id && m.user_id == member.user_id));
        members.push(member);
    }

    pub fn remove_member(&self, group_id: &str, user_id: &str) -> bool {
        let mut members = self.members.write();
        let before = members.len();
        members.retain(|m| !(m.group_id == group_id && m.user_id == user_id));
        members.len() != before
    }

    pub fn add_super_group_member(&self, group_id: &str, user_id: &str) {
        let mut groups = self.super_groups.entry(user_id.to_string()).or_default();
        if !groups.iter().any(|g| g == group_id) {
            groups.push(group_id.to_string());
        }
    }

    /// 累计回源次数
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.queries.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GroupStore for MemoryGroupStore {
    async fn find(&self, group_ids: &[String]) -> Result<Vec<Group>> {
        self.hit();
        Ok(group_ids
            .iter()
            .filter_map(|id| self.groups.get(id).map(|g| g.clone()))
            .collect())
    }

    async fn take(&self, group_id: &str) -> Result<Group> {
        self.hit();
        self.groups
            .get(group_id)
            .map(|g| g.clone())
            .ok_or_else(|| ServerError::NotFound(format!("group {}", group_id)))
    }
}

#[async_trait]
impl GroupMemberStore for MemoryGroupStore {
    async fn find(
        &self,
        group_ids: &[String],
        user_ids: &[String],
        role_levels: &[RoleLevel],
    ) -> Result<Vec<GroupMember>> {
        self.hit();
        let members = self.members.read();
        Ok(members
            .iter()
            .filter(|m| group_ids.is_empty() || group_ids.contains(&m.group_id))
            .filter(|m| user_ids.is_empty() || user_ids.contains(&m.user_id))
            .filter(|m| role_levels.is_empty() || role_levels.contains(&m.role_level))
            .cloned()
            .collect())
    }

    async fn take(&self, group_id: &str, user_id: &str) -> Result<GroupMember> {
        self.hit();
        self.members
            .read()
            .iter()
            .find(|m| m.group_id == group_id && m.user_id == user_id)
            .cloned()
            .ok_or_else(|| ServerError::NotFound(format!("group member {}-{}", group_id, user_id)))
    }

    async fn find_member_user_ids(&self, group_id: &str) -> Result<Vec<String>> {
        self.hit();
        Ok(self
            .members
            .read()
            .iter()
            .filter(|m| m.group_id == group_id)
            .map(|m| m.user_id.clone())
            .collect())
    }

    async fn find_user_joined_group_ids(&self, user_id: &str) -> Result<Vec<String>> {
        self.hit();
        Ok(self
            .members
            .read()
            .iter()
            .filter(|m| m.user_id == user_id)
            .map(|m| m.group_id.clone())
            .collect())
    }

    async fn take_group_member_num(&self, group_id: &str) -> Result<i64> {
        self.hit();
        Ok(self
            .members
            .read()
            .iter()
            .filter(|m| m.group_id == group_id)
            .count() as i64)
    }
}

#[async_trait]
impl SuperGroupStore for MemoryGroupStore {
    async fn find_user_super_group_ids(&self, user_id: &str) -> Result<Vec<String>> {
        self.hit();
        Ok(self
            .super_groups
            .get(user_id)
            .map(|g| g.clone())
            .unwrap_or_default())
    }

    async fn find_super_group_member_ids(&self, group_id: &str) -> Result<Vec<String>> {
        self.hit();
        let mut user_ids: Vec<String> = self
            .super_groups
            .iter()
            .filter(|entry| entry.value().iter().any(|g| g == group_id))
            .map(|entry| entry.key().clone())
            .collect();
        user_ids.sort();
        Ok(user_ids)
    }
}

/// 会话
#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: DashMap<(String, String), Conversation>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, conversation: Conversation) {
        self.conversations.insert(
            (
                conversation.owner_user_id.clone(),
                conversation.conversation_id.clone(),
            ),
            conversation,
        );
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn get_conversation(&self, owner_user_id: &str, conversation_id: &str) -> Result<Conversation> {
        self.conversations
            .get(&(owner_user_id.to_string(), conversation_id.to_string()))
            .map(|c| c.clone())
            .ok_or_else(|| {
                ServerError::NotFound(format!("conversation {} of {}", conversation_id, owner_user_id))
            })
    }

    async fn get_conversations(
        &self,
        owner_user_id: &str,
        conversation_ids: &[String],
    ) -> Result<Vec<Conversation>> {
        Ok(conversation_ids
            .iter()
            .filter_map(|id| {
                self.conversations
                    .get(&(owner_user_id.to_string(), id.clone()))
                    .map(|c| c.clone())
            })
            .collect())
    }

    async fn get_conversation_ids(&self, owner_user_id: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .conversations
            .iter()
            .filter(|entry| entry.key().0 == owner_user_id)
            .map(|entry| entry.key().1.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// 序号计数器与已读状态
#[derive(Default)]
pub struct MemorySeqStore {
    max_seqs: DashMap<String, i64>,
    has_read_seqs: DashMap<(String, String), i64>,
    read_msgs: DashMap<(String, String), BTreeSet<i64>>,
}

impl MemorySeqStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_max_seq(&self, conversation_id: &str, seq: i64) {
        self.max_seqs.insert(conversation_id.to_string(), seq);
    }

    /// 用户在会话中逐条标记过的已读序号（升序）
    pub fn read_msgs(&self, user_id: &str, conversation_id: &str) -> Vec<i64> {
        self.read_msgs
            .get(&(user_id.to_string(), conversation_id.to_string()))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SeqStore for MemorySeqStore {
    async fn get_max_seq(&self, conversation_id: &str) -> Result<i64> {
        Ok(self.max_seqs.get(conversation_id).map(|s| *s).unwrap_or(0))
    }

    async fn get_max_seqs(&self, conversation_ids: &[String]) -> Result<HashMap<String, i64>> {
        Ok(conversation_ids
            .iter()
            .map(|id| (id.clone(), self.max_seqs.get(id).map(|s| *s).unwrap_or(0)))
            .collect())
    }

    async fn get_has_read_seq(&self, user_id: &str, conversation_id: &str) -> Result<Option<i64>> {
        Ok(self
            .has_read_seqs
            .get(&(user_id.to_string(), conversation_id.to_string()))
            .map(|s| *s))
    }

    async fn get_has_read_seqs(
        &self,
        user_id: &str,
        conversation_ids: &[String],
    ) -> Result<HashMap<String, i64>> {
        Ok(conversation_ids
            .iter()
            .filter_map(|id| {
                self.has_read_seqs
                    .get(&(user_id.to_string(), id.clone()))
                    .map(|s| (id.clone(), *s))
            })
            .collect())
    }

    async fn set_has_read_seq(&self, user_id: &str, conversation_id: &str, seq: i64) -> Result<()> {
        self.has_read_seqs
            .insert((user_id.to_string(), conversation_id.to_string()), seq);
        Ok(())
    }

    async fn mark_msgs_as_read(&self, user_id: &str, conversation_id: &str, seqs: &[i64]) -> Result<()> {
        self.read_msgs
            .entry((user_id.to_string(), conversation_id.to_string()))
            .or_default()
            .extend(seqs.iter().copied());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_member_filters() {
        let store = MemoryGroupStore::new();
        store.add_member(GroupMember::new("g1", "u1", RoleLevel::Owner));
        store.add_member(GroupMember::new("g1", "u2", RoleLevel::Ordinary));
        store.add_member(GroupMember::new("g2", "u1", RoleLevel::Admin));

        let owners = GroupMemberStore::find(&store, &["g1".into()], &[], &[RoleLevel::Owner])
            .await
            .unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].user_id, "u1");

        let joined = store.find_user_joined_group_ids("u1").await.unwrap();
        assert_eq!(joined, vec!["g1", "g2"]);
        assert_eq!(store.take_group_member_num("g1").await.unwrap(), 2);

        assert!(GroupMemberStore::take(&store, "g2", "u2")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_has_read_seq_absent_is_none() {
        let store = MemorySeqStore::new();
        assert_eq!(store.get_has_read_seq("u1", "c1").await.unwrap(), None);

        store.set_has_read_seq("u1", "c1", 0).await.unwrap();
        assert_eq!(store.get_has_read_seq("u1", "c1").await.unwrap(), Some(0));
    }
}

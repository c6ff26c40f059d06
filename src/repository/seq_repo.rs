//! 序号 / 已读状态仓库 - Redis 实现
//!
//! - `MAX_SEQ:{conversationID}`：会话最大序号，由消息写入方递增
//! - `HAS_READ_SEQ:{userID}:{conversationID}`：用户已读位置
//! - `MSG_READ:{userID}:{conversationID}`：逐条已读的消息序号集合

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::infra::RedisClient;
use crate::repository::SeqStore;

const MAX_SEQ_PREFIX: &str = "MAX_SEQ:";
const HAS_READ_SEQ_PREFIX: &str = "HAS_READ_SEQ:";
const MSG_READ_PREFIX: &str = "MSG_READ:";

fn max_seq_key(conversation_id: &str) -> String {
    format!("{}{}", MAX_SEQ_PREFIX, conversation_id)
}

fn has_read_seq_key(user_id: &str, conversation_id: &str) -> String {
    format!("{}{}:{}", HAS_READ_SEQ_PREFIX, user_id, conversation_id)
}

fn msg_read_key(user_id: &str, conversation_id: &str) -> String {
    format!("{}{}:{}", MSG_READ_PREFIX, user_id, conversation_id)
}

#[derive(Clone)]
pub struct RedisSeqRepository {
    redis: RedisClient,
}

impl RedisSeqRepository {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    /// 写入会话最大序号（消息写入方使用）
    pub async fn set_max_seq(&self, conversation_id: &str, seq: i64) -> Result<()> {
        self.redis.set(&max_seq_key(conversation_id), seq).await
    }
}

#[async_trait]
impl SeqStore for RedisSeqRepository {
    async fn get_max_seq(&self, conversation_id: &str) -> Result<i64> {
        Ok(self
            .redis
            .get::<i64>(&max_seq_key(conversation_id))
            .await?
            .unwrap_or(0))
    }

    async fn get_max_seqs(&self, conversation_ids: &[String]) -> Result<HashMap<String, i64>> {
        let keys: Vec<String> = conversation_ids.iter().map(|id| max_seq_key(id)).collect();
        let values = self.redis.mget::<i64>(&keys).await?;
        Ok(conversation_ids
            .iter()
            .cloned()
            .zip(values)
            .map(|(id, seq)| (id, seq.unwrap_or(0)))
            .collect())
    }

    async fn get_has_read_seq(&self, user_id: &str, conversation_id: &str) -> Result<Option<i64>> {
        self.redis
            .get::<i64>(&has_read_seq_key(user_id, conversation_id))
            .await
    }

    async fn get_has_read_seqs(
        &self,
        user_id: &str,
        conversation_ids: &[String],
    ) -> Result<HashMap<String, i64>> {
        let keys: Vec<String> = conversation_ids
            .iter()
            .map(|id| has_read_seq_key(user_id, id))
            .collect();
        let values = self.redis.mget::<i64>(&keys).await?;
        Ok(conversation_ids
            .iter()
            .cloned()
            .zip(values)
            .filter_map(|(id, seq)| seq.map(|seq| (id, seq)))
            .collect())
    }

    async fn set_has_read_seq(&self, user_id: &str, conversation_id: &str, seq: i64) -> Result<()> {
        self.redis
            .set(&has_read_seq_key(user_id, conversation_id), seq)
            .await
    }

    async fn mark_msgs_as_read(&self, user_id: &str, conversation_id: &str, seqs: &[i64]) -> Result<()> {
        self.redis
            .sadd(&msg_read_key(user_id, conversation_id), seqs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(max_seq_key("si_u1_u2"), "MAX_SEQ:si_u1_u2");
        assert_eq!(has_read_seq_key("u1", "sg_g1"), "HAS_READ_SEQ:u1:sg_g1");
        assert_eq!(msg_read_key("u1", "sg_g1"), "MSG_READ:u1:sg_g1");
    }
}

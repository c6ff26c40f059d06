//! 已读位置服务
//!
//! 维护每个会话的 `maxSeq` 与每个 (用户, 会话) 的 `hasReadSeq`：
//!
//! - 任意成功的写入之后 `hasReadSeq <= maxSeq`
//! - `mark_msgs_as_read` / `mark_conversation_as_read` 只会抬高已读位置
//! - `set_conversation_has_read_seq` 直接覆盖，可以回退
//!
//! 每次变更都会通过 [`NotificationDispatcher`] 下发已读回执，下发失败作为整个操作的失败返回。

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, ServerError};
use crate::infra::CacheBackend;
use crate::model::{ConversationType, MarkAsReadTips, Seqs};
use crate::repository::{ConversationStore, SeqStore};
use crate::service::NotificationDispatcher;

pub struct ReadSeqService<B> {
    seq_db: Arc<dyn SeqStore>,
    conversation_db: Arc<dyn ConversationStore>,
    dispatcher: NotificationDispatcher<B>,
}

impl<B> Clone for ReadSeqService<B> {
    fn clone(&self) -> Self {
        Self {
            seq_db: self.seq_db.clone(),
            conversation_db: self.conversation_db.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<B: CacheBackend> ReadSeqService<B> {
    pub fn new(
        seq_db: Arc<dyn SeqStore>,
        conversation_db: Arc<dyn ConversationStore>,
        dispatcher: NotificationDispatcher<B>,
    ) -> Self {
        Self {
            seq_db,
            conversation_db,
            dispatcher,
        }
    }

    /// 用户所有会话的已读位置与最大序号
    ///
    /// 会话记录上的 maxSeq 非 0 时覆盖序号计数器的值。
    pub async fn get_conversations_has_read_and_max_seq(
        &self,
        user_id: &str,
    ) -> Result<HashMap<String, Seqs>> {
        let conversation_ids = self.conversation_db.get_conversation_ids(user_id).await?;
        if conversation_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let (has_read_seqs, max_seqs, conversations) = tokio::try_join!(
            self.seq_db.get_has_read_seqs(user_id, &conversation_ids),
            self.seq_db.get_max_seqs(&conversation_ids),
            self.conversation_db
                .get_conversations(user_id, &conversation_ids),
        )?;

        let mut seqs: HashMap<String, Seqs> = max_seqs
            .into_iter()
            .map(|(conversation_id, max_seq)| {
                let has_read_seq = has_read_seqs.get(&conversation_id).copied().unwrap_or(0);
                (conversation_id, Seqs { has_read_seq, max_seq })
            })
            .collect();

        for conversation in conversations {
            if conversation.max_seq == 0 {
                continue;
            }
            if let Some(entry) = seqs.get_mut(&conversation.conversation_id) {
                entry.max_seq = conversation.max_seq;
            }
        }
        Ok(seqs)
    }

    /// 直接设置已读位置（不检查回退），通知发给用户自己的其他设备
    pub async fn set_conversation_has_read_seq(
        &self,
        user_id: &str,
        conversation_id: &str,
        has_read_seq: i64,
    ) -> Result<()> {
        let max_seq = self.seq_db.get_max_seq(conversation_id).await?;
        if has_read_seq > max_seq {
            return Err(ServerError::Validation(
                "hasReadSeq must not be bigger than maxSeq".to_string(),
            ));
        }

        self.seq_db
            .set_has_read_seq(user_id, conversation_id, has_read_seq)
            .await?;

        let tips = MarkAsReadTips {
            mark_as_read_user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            seqs: Vec::new(),
            has_read_seq,
        };
        self.dispatcher
            .send_read_receipt(
                user_id,
                &[user_id.to_string()],
                ConversationType::SingleChat,
                &tips,
            )
            .await?;
        Ok(())
    }

    /// 标记一组消息已读，`seqs` 须按升序传入，最后一个作为新的已读位置候选
    pub async fn mark_msgs_as_read(
        &self,
        user_id: &str,
        conversation_id: &str,
        seqs: &[i64],
    ) -> Result<()> {
        let Some(&candidate) = seqs.last() else {
            return Err(ServerError::Validation("seqs must not be empty".to_string()));
        };
        let max_seq = self.seq_db.get_max_seq(conversation_id).await?;
        if candidate > max_seq {
            return Err(ServerError::Validation(
                "hasReadSeq must not be bigger than maxSeq".to_string(),
            ));
        }

        let conversation = self
            .conversation_db
            .get_conversation(user_id, conversation_id)
            .await?;

        self.seq_db
            .mark_msgs_as_read(user_id, conversation_id, seqs)
            .await?;

        let current = self
            .seq_db
            .get_has_read_seq(user_id, conversation_id)
            .await?
            .unwrap_or(0);
        let has_read_seq = if candidate > current {
            self.seq_db
                .set_has_read_seq(user_id, conversation_id, candidate)
                .await?;
            candidate
        } else {
            current
        };
        debug!(
            "MarkMsgsAsRead: user_id={}, conversation_id={}, seqs={:?}, current={}, has_read_seq={}",
            user_id, conversation_id, seqs, current, has_read_seq
        );

        let recipients = self
            .dispatcher
            .resolve_recipients(&conversation, user_id)
            .await?;
        let tips = MarkAsReadTips {
            mark_as_read_user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            seqs: seqs.to_vec(),
            has_read_seq,
        };
        self.dispatcher
            .send_read_receipt(user_id, &recipients, conversation.conversation_type, &tips)
            .await?;
        Ok(())
    }

    /// 标记会话已读：可选地逐条标记 `seqs`，并在 `has_read_seq` 更大时抬高已读位置
    pub async fn mark_conversation_as_read(
        &self,
        user_id: &str,
        conversation_id: &str,
        seqs: &[i64],
        has_read_seq: i64,
    ) -> Result<()> {
        let conversation = self
            .conversation_db
            .get_conversation(user_id, conversation_id)
            .await?;
        let mut current = self
            .seq_db
            .get_has_read_seq(user_id, conversation_id)
            .await?
            .unwrap_or(0);
        debug!(
            "MarkConversationAsRead: user_id={}, conversation_id={}, has_read_seq={}, req.has_read_seq={}",
            user_id, conversation_id, current, has_read_seq
        );

        let raise = has_read_seq > current;
        if raise {
            let max_seq = self.seq_db.get_max_seq(conversation_id).await?;
            if has_read_seq > max_seq {
                return Err(ServerError::Validation(
                    "hasReadSeq must not be bigger than maxSeq".to_string(),
                ));
            }
        }

        if !seqs.is_empty() {
            debug!(
                "MarkConversationAsRead: seqs={:?}, conversation_id={}",
                seqs, conversation_id
            );
            self.seq_db
                .mark_msgs_as_read(user_id, conversation_id, seqs)
                .await?;
        }
        if raise {
            self.seq_db
                .set_has_read_seq(user_id, conversation_id, has_read_seq)
                .await?;
            current = has_read_seq;
        }

        let recipients = self
            .dispatcher
            .resolve_recipients(&conversation, user_id)
            .await?;
        let tips = MarkAsReadTips {
            mark_as_read_user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            seqs: seqs.to_vec(),
            has_read_seq: current,
        };
        self.dispatcher
            .send_read_receipt(user_id, &recipients, conversation.conversation_type, &tips)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainEvent;
    use crate::infra::{EventBus, KeyedCacheStore, MemoryCacheBackend};
    use crate::model::{Conversation, GroupMember, RoleLevel};
    use crate::repository::{MemoryConversationStore, MemoryGroupStore, MemorySeqStore};
    use crate::service::{EventBusNotificationSender, GroupCache};
    use tokio::sync::broadcast;

    struct Fixture {
        service: ReadSeqService<MemoryCacheBackend>,
        seqs: Arc<MemorySeqStore>,
        conversations: Arc<MemoryConversationStore>,
        groups: Arc<MemoryGroupStore>,
        events: broadcast::Receiver<DomainEvent>,
    }

    fn fixture() -> Fixture {
        let seqs = Arc::new(MemorySeqStore::new());
        let conversations = Arc::new(MemoryConversationStore::new());
        let groups = Arc::new(MemoryGroupStore::new());
        let bus = Arc::new(EventBus::new());
        let events = bus.subscribe();

        let store = KeyedCacheStore::new(Arc::new(MemoryCacheBackend::new(100)));
        let group_cache = GroupCache::new(store, groups.clone(), groups.clone(), groups.clone());
        let dispatcher = NotificationDispatcher::new(
            group_cache,
            Arc::new(EventBusNotificationSender::new(bus)),
        );
        let service = ReadSeqService::new(seqs.clone(), conversations.clone(), dispatcher);
        Fixture {
            service,
            seqs,
            conversations,
            groups,
            events,
        }
    }

    fn recv_tips(rx: &mut broadcast::Receiver<DomainEvent>) -> (String, MarkAsReadTips) {
        let DomainEvent::ReadReceipt { recv_id, tips, .. } = rx.try_recv().unwrap();
        (recv_id, tips)
    }

    #[tokio::test]
    async fn test_mark_msgs_as_read_scenario() {
        let mut f = fixture();
        f.seqs.set_max_seq("si_u1_u2", 10);
        f.conversations.insert(Conversation::single("u1", "si_u1_u2", "u2"));

        f.service
            .mark_msgs_as_read("u1", "si_u1_u2", &[3, 5, 9])
            .await
            .unwrap();

        assert_eq!(f.seqs.get_has_read_seq("u1", "si_u1_u2").await.unwrap(), Some(9));
        assert_eq!(f.seqs.read_msgs("u1", "si_u1_u2"), vec![3, 5, 9]);

        let (recv_id, tips) = recv_tips(&mut f.events);
        assert_eq!(recv_id, "u2");
        assert_eq!(tips.seqs, vec![3, 5, 9]);
        assert_eq!(tips.has_read_seq, 9);

        // 超过 maxSeq 的设置被拒绝，已读位置不变
        let err = f
            .service
            .set_conversation_has_read_seq("u1", "si_u1_u2", 15)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
        assert_eq!(f.seqs.get_has_read_seq("u1", "si_u1_u2").await.unwrap(), Some(9));
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mark_msgs_as_read_rejects_empty_seqs() {
        let f = fixture();
        let err = f.service.mark_msgs_as_read("u1", "c1", &[]).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_mark_msgs_as_read_never_regresses() {
        let mut f = fixture();
        f.seqs.set_max_seq("si_u1_u2", 10);
        f.conversations.insert(Conversation::single("u1", "si_u1_u2", "u2"));
        f.seqs.set_has_read_seq("u1", "si_u1_u2", 8).await.unwrap();

        f.service
            .mark_msgs_as_read("u1", "si_u1_u2", &[2, 4])
            .await
            .unwrap();

        assert_eq!(f.seqs.get_has_read_seq("u1", "si_u1_u2").await.unwrap(), Some(8));
        assert_eq!(f.seqs.read_msgs("u1", "si_u1_u2"), vec![2, 4]);
        let (_, tips) = recv_tips(&mut f.events);
        assert_eq!(tips.has_read_seq, 8);
    }

    #[tokio::test]
    async fn test_set_has_read_seq_may_lower() {
        let mut f = fixture();
        f.seqs.set_max_seq("c1", 10);
        f.seqs.set_has_read_seq("u1", "c1", 9).await.unwrap();

        f.service
            .set_conversation_has_read_seq("u1", "c1", 4)
            .await
            .unwrap();
        assert_eq!(f.seqs.get_has_read_seq("u1", "c1").await.unwrap(), Some(4));

        let (recv_id, tips) = recv_tips(&mut f.events);
        assert_eq!(recv_id, "u1");
        assert!(tips.seqs.is_empty());
        assert_eq!(tips.has_read_seq, 4);
    }

    #[tokio::test]
    async fn test_set_has_read_seq_accepts_max_and_rejects_max_plus_one() {
        let f = fixture();
        f.seqs.set_max_seq("c1", 10);

        assert!(f.service.set_conversation_has_read_seq("u1", "c1", 10).await.is_ok());
        assert!(f
            .service
            .set_conversation_has_read_seq("u1", "c1", 11)
            .await
            .is_err());
        assert_eq!(f.seqs.get_has_read_seq("u1", "c1").await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_mark_conversation_as_read_in_group() {
        let mut f = fixture();
        f.seqs.set_max_seq("sg_g1", 20);
        f.conversations.insert(Conversation::group("u1", "sg_g1", "g1"));
        for user_id in ["u1", "u2", "u3"] {
            f.groups
                .add_member(GroupMember::new("g1", user_id, RoleLevel::Ordinary));
        }

        f.service
            .mark_conversation_as_read("u1", "sg_g1", &[], 12)
            .await
            .unwrap();
        assert_eq!(f.seqs.get_has_read_seq("u1", "sg_g1").await.unwrap(), Some(12));

        let mut recipients = Vec::new();
        for _ in 0..3 {
            let (recv_id, tips) = recv_tips(&mut f.events);
            assert_eq!(tips.has_read_seq, 12);
            recipients.push(recv_id);
        }
        assert_eq!(recipients, vec!["u1", "u2", "u3"]);

        // 更小的值不回退，但仍然下发通知
        f.service
            .mark_conversation_as_read("u1", "sg_g1", &[5], 7)
            .await
            .unwrap();
        assert_eq!(f.seqs.get_has_read_seq("u1", "sg_g1").await.unwrap(), Some(12));
        assert_eq!(f.seqs.read_msgs("u1", "sg_g1"), vec![5]);
        let (_, tips) = recv_tips(&mut f.events);
        assert_eq!(tips.has_read_seq, 12);
        assert_eq!(tips.seqs, vec![5]);
    }

    #[tokio::test]
    async fn test_mark_conversation_as_read_rejects_beyond_max() {
        let f = fixture();
        f.seqs.set_max_seq("si_u1_u2", 3);
        f.conversations.insert(Conversation::single("u1", "si_u1_u2", "u2"));

        let err = f
            .service
            .mark_conversation_as_read("u1", "si_u1_u2", &[1], 4)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
        assert!(f.seqs.read_msgs("u1", "si_u1_u2").is_empty());
        assert_eq!(f.seqs.get_has_read_seq("u1", "si_u1_u2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_not_found() {
        let f = fixture();
        f.seqs.set_max_seq("c1", 10);
        let err = f
            .service
            .mark_msgs_as_read("u1", "c1", &[1])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_has_read_and_max_seq_overrides_non_zero() {
        let f = fixture();
        f.conversations.insert(Conversation::single("u1", "a", "u2"));
        f.conversations
            .insert(Conversation::single("u1", "b", "u3").with_max_seq(30));
        f.seqs.set_max_seq("a", 5);
        f.seqs.set_max_seq("b", 7);
        f.seqs.set_has_read_seq("u1", "a", 4).await.unwrap();

        let seqs = f
            .service
            .get_conversations_has_read_and_max_seq("u1")
            .await
            .unwrap();
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs["a"], Seqs { has_read_seq: 4, max_seq: 5 });
        assert_eq!(seqs["b"], Seqs { has_read_seq: 0, max_seq: 30 });

        assert!(f
            .service
            .get_conversations_has_read_and_max_seq("nobody")
            .await
            .unwrap()
            .is_empty());
    }
}

//! 会话仓库 - PostgreSQL 实现

use async_trait::async_trait;

use crate::error::{Result, ServerError};
use crate::infra::Database;
use crate::model::Conversation;
use crate::repository::ConversationStore;

#[derive(sqlx::FromRow)]
struct ConversationRow {
    owner_user_id: String,
    conversation_id: String,
    conversation_type: i16,
    user_id: Option<String>,
    group_id: Option<String>,
    max_seq: i64,
}

impl From<ConversationRow> for Conversation {
    fn from(r: ConversationRow) -> Self {
        Conversation::from_db_row(
            r.owner_user_id,
            r.conversation_id,
            r.conversation_type,
            r.user_id,
            r.group_id,
            r.max_seq,
        )
    }
}

/// 会话仓库 (PostgreSQL 实现)
#[derive(Clone)]
pub struct PgConversationRepository {
    db: Database,
}

impl PgConversationRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConversationStore for PgConversationRepository {
    async fn get_conversation(&self, owner_user_id: &str, conversation_id: &str) -> Result<Conversation> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT owner_user_id, conversation_id, conversation_type, user_id, group_id, max_seq
            FROM privchat_conversations
            WHERE owner_user_id = $1 AND conversation_id = $2
            "#,
        )
        .bind(owner_user_id)
        .bind(conversation_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to query conversation: {}", e)))?;

        row.map(Conversation::from).ok_or_else(|| {
            ServerError::NotFound(format!("conversation {} of {}", conversation_id, owner_user_id))
        })
    }

    async fn get_conversations(
        &self,
        owner_user_id: &str,
        conversation_ids: &[String],
    ) -> Result<Vec<Conversation>> {
        if conversation_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT owner_user_id, conversation_id, conversation_type, user_id, group_id, max_seq
            FROM privchat_conversations
            WHERE owner_user_id = $1 AND conversation_id = ANY($2)
            "#,
        )
        .bind(owner_user_id)
        .bind(conversation_ids)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to query conversations: {}", e)))?;

        Ok(rows.into_iter().map(Conversation::from).collect())
    }

    async fn get_conversation_ids(&self, owner_user_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT conversation_id
            FROM privchat_conversations
            WHERE owner_user_id = $1
            ORDER BY conversation_id ASC
            "#,
        )
        .bind(owner_user_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to query conversation ids: {}", e)))?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

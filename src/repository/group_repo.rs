//! 群组仓库 - PostgreSQL 实现

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{Result, ServerError};
use crate::infra::Database;
use crate::model::{Group, GroupMember, RoleLevel};
use crate::repository::{GroupMemberStore, GroupStore, SuperGroupStore};

#[derive(sqlx::FromRow)]
struct GroupRow {
    group_id: String,
    group_name: String,
    notification: Option<String>,
    introduction: Option<String>,
    face_url: Option<String>,
    creator_user_id: String,
    group_type: i16,
    status: i16,
    ex: Option<String>,
    created_at: i64,
}

impl From<GroupRow> for Group {
    fn from(r: GroupRow) -> Self {
        Group::from_db_row(
            r.group_id,
            r.group_name,
            r.notification,
            r.introduction,
            r.face_url,
            r.creator_user_id,
            r.group_type,
            r.status,
            r.ex,
            r.created_at,
        )
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    group_id: String,
    user_id: String,
    nickname: Option<String>,
    face_url: Option<String>,
    role_level: i32,
    join_source: i16,
    inviter_user_id: Option<String>,
    mute_end_time: Option<i64>,
    join_time: i64,
}

impl From<MemberRow> for GroupMember {
    fn from(r: MemberRow) -> Self {
        GroupMember::from_db_row(
            r.group_id,
            r.user_id,
            r.nickname,
            r.face_url,
            r.role_level,
            r.join_source,
            r.inviter_user_id,
            r.mute_end_time,
            r.join_time,
        )
    }
}

const GROUP_COLUMNS: &str = r#"
    group_id, group_name, notification, introduction, face_url,
    creator_user_id, group_type, status, ex, created_at
"#;

const MEMBER_COLUMNS: &str = r#"
    group_id, user_id, nickname, face_url, role_level,
    join_source, inviter_user_id, mute_end_time, join_time
"#;

/// 群组仓库 (PostgreSQL 实现)
///
/// 同时提供群组、普通群成员、超级群成员三张表的读取。
#[derive(Clone)]
pub struct PgGroupRepository {
    db: Database,
}

impl PgGroupRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn pool(&self) -> &PgPool {
        self.db.pool()
    }
}

#[async_trait]
impl GroupStore for PgGroupRepository {
    async fn find(&self, group_ids: &[String]) -> Result<Vec<Group>> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM privchat_groups WHERE group_id = ANY($1)",
            GROUP_COLUMNS
        );
        let rows = sqlx::query_as::<_, GroupRow>(&sql)
            .bind(group_ids)
            .fetch_all(self.pool())
            .await
            .map_err(|e| ServerError::Database(format!("Failed to query groups: {}", e)))?;
        Ok(rows.into_iter().map(Group::from).collect())
    }

    async fn take(&self, group_id: &str) -> Result<Group> {
        let sql = format!(
            "SELECT {} FROM privchat_groups WHERE group_id = $1",
            GROUP_COLUMNS
        );
        let row = sqlx::query_as::<_, GroupRow>(&sql)
            .bind(group_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| ServerError::Database(format!("Failed to query group: {}", e)))?;
        row.map(Group::from)
            .ok_or_else(|| ServerError::NotFound(format!("group {}", group_id)))
    }
}

#[async_trait]
impl GroupMemberStore for PgGroupRepository {
    async fn find(
        &self,
        group_ids: &[String],
        user_ids: &[String],
        role_levels: &[RoleLevel],
    ) -> Result<Vec<GroupMember>> {
        // 空数组表示不过滤该维度
        let sql = format!(
            r#"
            SELECT {}
            FROM privchat_group_members
            WHERE (cardinality($1::text[]) = 0 OR group_id = ANY($1))
              AND (cardinality($2::text[]) = 0 OR user_id = ANY($2))
              AND (cardinality($3::int[]) = 0 OR role_level = ANY($3))
            "#,
            MEMBER_COLUMNS
        );
        let roles: Vec<i32> = role_levels.iter().map(|r| r.to_i32()).collect();
        let rows = sqlx::query_as::<_, MemberRow>(&sql)
            .bind(group_ids)
            .bind(user_ids)
            .bind(&roles)
            .fetch_all(self.pool())
            .await
            .map_err(|e| ServerError::Database(format!("Failed to query group members: {}", e)))?;
        Ok(rows.into_iter().map(GroupMember::from).collect())
    }

    async fn take(&self, group_id: &str, user_id: &str) -> Result<GroupMember> {
        let sql = format!(
            "SELECT {} FROM privchat_group_members WHERE group_id = $1 AND user_id = $2",
            MEMBER_COLUMNS
        );
        let row = sqlx::query_as::<_, MemberRow>(&sql)
            .bind(group_id)
            .bind(user_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| ServerError::Database(format!("Failed to query group member: {}", e)))?;
        row.map(GroupMember::from).ok_or_else(|| {
            ServerError::NotFound(format!("group member {}-{}", group_id, user_id))
        })
    }

    async fn find_member_user_ids(&self, group_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT user_id
            FROM privchat_group_members
            WHERE group_id = $1
            ORDER BY join_time ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to query member ids: {}", e)))?;
        Ok(rows.into_iter().map(|(user_id,)| user_id).collect())
    }

    async fn find_user_joined_group_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT group_id
            FROM privchat_group_members
            WHERE user_id = $1
            ORDER BY group_id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to query joined groups: {}", e)))?;
        Ok(rows.into_iter().map(|(group_id,)| group_id).collect())
    }

    async fn take_group_member_num(&self, group_id: &str) -> Result<i64> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM privchat_group_members WHERE group_id = $1",
        )
        .bind(group_id)
        .fetch_one(self.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to count group members: {}", e)))?;
        Ok(count)
    }
}

#[async_trait]
impl SuperGroupStore for PgGroupRepository {
    async fn find_user_super_group_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT group_id
            FROM privchat_super_group_members
            WHERE user_id = $1
            ORDER BY group_id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to query super groups: {}", e)))?;
        Ok(rows.into_iter().map(|(group_id,)| group_id).collect())
    }

    async fn find_super_group_member_ids(&self, group_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT user_id
            FROM privchat_super_group_members
            WHERE group_id = $1
            ORDER BY join_time ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to query super group members: {}", e)))?;
        Ok(rows.into_iter().map(|(user_id,)| user_id).collect())
    }
}

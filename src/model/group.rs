//! 群组模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 群组状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GroupStatus {
    /// 正常
    #[default]
    Active = 0,
    /// 已封禁
    Banned = 1,
    /// 已解散
    Dismissed = 2,
    /// 全员禁言
    Muted = 3,
}

impl GroupStatus {
    /// 从 i16 转换
    pub fn from_i16(value: i16) -> Self {
        match value {
            1 => GroupStatus::Banned,
            2 => GroupStatus::Dismissed,
            3 => GroupStatus::Muted,
            _ => GroupStatus::Active,
        }
    }

    /// 转换为 i16
    pub fn to_i16(self) -> i16 {
        self as i16
    }
}

/// 群组类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GroupType {
    /// 普通群
    #[default]
    Normal = 0,
    /// 超级群（大群，成员关系单独存储）
    Super = 1,
}

impl GroupType {
    pub fn from_i16(value: i16) -> Self {
        match value {
            1 => GroupType::Super,
            _ => GroupType::Normal,
        }
    }

    pub fn to_i16(self) -> i16 {
        self as i16
    }
}

/// 群组（对应 privchat_groups 表）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// 群组ID
    pub group_id: String,
    /// 群名称
    pub group_name: String,
    /// 群公告
    pub notification: Option<String>,
    /// 群介绍
    pub introduction: Option<String>,
    /// 群头像URL
    pub face_url: Option<String>,
    /// 创建者ID
    pub creator_user_id: String,
    pub group_type: GroupType,
    pub status: GroupStatus,
    /// 扩展字段
    pub ex: Option<String>,
    /// 创建时间（数据库存储为 BIGINT 毫秒时间戳）
    pub created_at: DateTime<Utc>,
}

impl Group {
    /// 创建新群组
    pub fn new(group_id: impl Into<String>, group_name: impl Into<String>, creator_user_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            group_name: group_name.into(),
            notification: None,
            introduction: None,
            face_url: None,
            creator_user_id: creator_user_id.into(),
            group_type: GroupType::Normal,
            status: GroupStatus::Active,
            ex: None,
            created_at: Utc::now(),
        }
    }

    /// 从数据库行创建（处理时间戳转换）
    #[allow(clippy::too_many_arguments)]
    pub fn from_db_row(
        group_id: String,
        group_name: String,
        notification: Option<String>,
        introduction: Option<String>,
        face_url: Option<String>,
        creator_user_id: String,
        group_type: i16,
        status: i16,
        ex: Option<String>,
        created_at: i64, // 毫秒时间戳
    ) -> Self {
        Self {
            group_id,
            group_name,
            notification,
            introduction,
            face_url,
            creator_user_id,
            group_type: GroupType::from_i16(group_type),
            status: GroupStatus::from_i16(status),
            ex,
            created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_else(Utc::now),
        }
    }
}

/// 群成员角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RoleLevel {
    /// 普通成员
    #[default]
    Ordinary = 20,
    /// 管理员
    Admin = 60,
    /// 群主
    Owner = 100,
}

impl RoleLevel {
    pub fn from_i32(value: i32) -> Self {
        match value {
            100 => RoleLevel::Owner,
            60 => RoleLevel::Admin,
            _ => RoleLevel::Ordinary,
        }
    }

    pub fn to_i32(self) -> i32 {
        self as i32
    }
}

/// 群成员（对应 privchat_group_members 表）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub group_id: String,
    pub user_id: String,
    /// 群昵称
    pub nickname: Option<String>,
    pub face_url: Option<String>,
    pub role_level: RoleLevel,
    /// 入群方式
    pub join_source: i16,
    /// 邀请人
    pub inviter_user_id: Option<String>,
    /// 禁言截止时间
    pub mute_end_time: Option<DateTime<Utc>>,
    /// 入群时间
    pub join_time: DateTime<Utc>,
}

impl GroupMember {
    pub fn new(group_id: impl Into<String>, user_id: impl Into<String>, role_level: RoleLevel) -> Self {
        Self {
            group_id: group_id.into(),
            user_id: user_id.into(),
            nickname: None,
            face_url: None,
            role_level,
            join_source: 0,
            inviter_user_id: None,
            mute_end_time: None,
            join_time: Utc::now(),
        }
    }

    /// 从数据库行创建（处理时间戳转换）
    #[allow(clippy::too_many_arguments)]
    pub fn from_db_row(
        group_id: String,
        user_id: String,
        nickname: Option<String>,
        face_url: Option<String>,
        role_level: i32,
        join_source: i16,
        inviter_user_id: Option<String>,
        mute_end_time: Option<i64>, // 毫秒时间戳
        join_time: i64,             // 毫秒时间戳
    ) -> Self {
        Self {
            group_id,
            user_id,
            nickname,
            face_url,
            role_level: RoleLevel::from_i32(role_level),
            join_source,
            inviter_user_id,
            mute_end_time: mute_end_time.and_then(DateTime::from_timestamp_millis),
            join_time: DateTime::from_timestamp_millis(join_time).unwrap_or_else(Utc::now),
        }
    }
}

/// 群成员指纹：对端用它判断本地成员列表是否过期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupMemberHash {
    #[serde(rename = "hash")]
    pub hash: u64,
    #[serde(rename = "memberNum")]
    pub member_num: u32,
}

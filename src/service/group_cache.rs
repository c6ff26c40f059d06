//! 群组缓存
//!
//! | 数据 | key | TTL |
//! |---|---|---|
//! | 群信息 | `GROUP_INFO:{groupID}` | 12h |
//! | 成员ID列表 | `GROUP_MEMBER_IDS:{groupID}` | 12h |
//! | 成员信息 | `GROUP_MEMBER_INFO:{groupID}-{userID}` | 12h |
//! | 成员数 | `GROUP_MEMBER_NUM_CACHE:{groupID}` | 12h |
//! | 成员指纹 | `GROUP_MEMBERS_HASH:{groupID}` | 12h |
//! | 已加入的普通群 | `JOIN_GROUPS_KEY:{userID}` | 12h |
//! | 已加入的超级群 | `JOIN_SUPER_GROUPS:{userID}` | 12h |
//! | 超级群成员ID列表 | `SUPER_GROUP_MEMBER_IDS:{groupID}` | 12h |
//!
//! 所有 `del_*` 都只构造 [`GroupInvalidation`]，源存储写入提交后再 `apply()`。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, ServerError};
use crate::infra::{CacheBackend, KeyedCacheStore, PendingInvalidation};
use crate::model::{Group, GroupMember, GroupMemberHash, RoleLevel};
use crate::repository::{GroupMemberStore, GroupStore, SuperGroupStore};

/// 默认过期时间：12 小时
pub const GROUP_EXPIRE: Duration = Duration::from_secs(60 * 60 * 12);

const GROUP_INFO_KEY: &str = "GROUP_INFO:";
const GROUP_MEMBER_IDS_KEY: &str = "GROUP_MEMBER_IDS:";
const GROUP_MEMBERS_HASH_KEY: &str = "GROUP_MEMBERS_HASH:";
const GROUP_MEMBER_INFO_KEY: &str = "GROUP_MEMBER_INFO:";
const JOINED_SUPER_GROUPS_KEY: &str = "JOIN_SUPER_GROUPS:";
const JOINED_GROUPS_KEY: &str = "JOIN_GROUPS_KEY:";
const GROUP_MEMBER_NUM_KEY: &str = "GROUP_MEMBER_NUM_CACHE:";
const SUPER_GROUP_MEMBER_IDS_KEY: &str = "SUPER_GROUP_MEMBER_IDS:";

pub fn group_info_key(group_id: &str) -> String {
    format!("{}{}", GROUP_INFO_KEY, group_id)
}

pub fn group_member_ids_key(group_id: &str) -> String {
    format!("{}{}", GROUP_MEMBER_IDS_KEY, group_id)
}

pub fn group_members_hash_key(group_id: &str) -> String {
    format!("{}{}", GROUP_MEMBERS_HASH_KEY, group_id)
}

pub fn group_member_info_key(group_id: &str, user_id: &str) -> String {
    format!("{}{}-{}", GROUP_MEMBER_INFO_KEY, group_id, user_id)
}

pub fn joined_super_groups_key(user_id: &str) -> String {
    format!("{}{}", JOINED_SUPER_GROUPS_KEY, user_id)
}

pub fn joined_groups_key(user_id: &str) -> String {
    format!("{}{}", JOINED_GROUPS_KEY, user_id)
}

pub fn group_member_num_key(group_id: &str) -> String {
    format!("{}{}", GROUP_MEMBER_NUM_KEY, group_id)
}

pub fn super_group_member_ids_key(group_id: &str) -> String {
    format!("{}{}", SUPER_GROUP_MEMBER_IDS_KEY, group_id)
}

/// 成员指纹
///
/// 成员ID升序排序后以 `;` 连接，取 MD5 的前 8 个十六进制字符（即前 4 字节）作为无符号整数。
/// 只用于判断成员列表是否变化，不具备抗碰撞性。空群返回 0。
pub fn members_fingerprint(user_ids: &[String]) -> u64 {
    if user_ids.is_empty() {
        return 0;
    }
    let mut sorted: Vec<&str> = user_ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let digest = md5::compute(sorted.join(";"));
    u32::from_be_bytes([digest.0[0], digest.0[1], digest.0[2], digest.0[3]]) as u64
}

/// 群组缓存
pub struct GroupCache<B> {
    store: KeyedCacheStore<B>,
    group_db: Arc<dyn GroupStore>,
    group_member_db: Arc<dyn GroupMemberStore>,
    super_group_db: Arc<dyn SuperGroupStore>,
    expire: Duration,
}

impl<B> Clone for GroupCache<B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            group_db: self.group_db.clone(),
            group_member_db: self.group_member_db.clone(),
            super_group_db: self.super_group_db.clone(),
            expire: self.expire,
        }
    }
}

impl<B: CacheBackend> GroupCache<B> {
    pub fn new(
        store: KeyedCacheStore<B>,
        group_db: Arc<dyn GroupStore>,
        group_member_db: Arc<dyn GroupMemberStore>,
        super_group_db: Arc<dyn SuperGroupStore>,
    ) -> Self {
        Self {
            store,
            group_db,
            group_member_db,
            super_group_db,
            expire: GROUP_EXPIRE,
        }
    }

    /// 覆盖默认的 12 小时过期时间
    pub fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = expire;
        self
    }

    /// 空的删除句柄，用于串联多个 `del_*`
    pub fn new_invalidation(&self) -> GroupInvalidation<B> {
        GroupInvalidation {
            pending: self.store.defer_delete(Vec::new()),
        }
    }

    /// 源实体对齐到批量 key 的位置
    pub fn get_group_index(group: &Group, keys: &[String]) -> Result<usize> {
        let key = group_info_key(&group.group_id);
        keys.iter()
            .position(|k| *k == key)
            .ok_or(ServerError::IndexNotFound)
    }

    pub fn get_group_member_index(member: &GroupMember, keys: &[String]) -> Result<usize> {
        let key = group_member_info_key(&member.group_id, &member.user_id);
        keys.iter()
            .position(|k| *k == key)
            .ok_or(ServerError::IndexNotFound)
    }

    // ============================================================
    // 群信息
    // ============================================================

    /// 批量读取群信息，不存在的群组不出现在结果中
    pub async fn get_groups_info(&self, group_ids: &[String]) -> Result<Vec<Group>> {
        let keys: Vec<String> = group_ids.iter().map(|id| group_info_key(id)).collect();
        self.store
            .batch_get_or_load(&keys, self.expire, Self::get_group_index, |misses| async move {
                let ids: Vec<String> = misses.iter().map(|&i| group_ids[i].clone()).collect();
                self.group_db.find(&ids).await
            })
            .await
    }

    pub async fn get_group_info(&self, group_id: &str) -> Result<Group> {
        self.store
            .get_or_load(&group_info_key(group_id), self.expire, || {
                self.group_db.take(group_id)
            })
            .await
    }

    // ============================================================
    // 已加入的群
    // ============================================================

    pub async fn get_joined_group_ids(&self, user_id: &str) -> Result<Vec<String>> {
        self.store
            .get_or_load(&joined_groups_key(user_id), self.expire, || {
                self.group_member_db.find_user_joined_group_ids(user_id)
            })
            .await
    }

    pub async fn get_joined_super_group_ids(&self, user_id: &str) -> Result<Vec<String>> {
        self.store
            .get_or_load(&joined_super_groups_key(user_id), self.expire, || {
                self.super_group_db.find_user_super_group_ids(user_id)
            })
            .await
    }

    // ============================================================
    // 成员ID / 指纹
    // ============================================================

    pub async fn get_group_member_ids(&self, group_id: &str) -> Result<Vec<String>> {
        self.store
            .get_or_load(&group_member_ids_key(group_id), self.expire, || {
                self.group_member_db.find_member_user_ids(group_id)
            })
            .await
    }

    /// 超级群成员来自独立的成员表，与普通群的成员ID分开缓存
    pub async fn get_super_group_member_ids(&self, group_id: &str) -> Result<Vec<String>> {
        self.store
            .get_or_load(&super_group_member_ids_key(group_id), self.expire, || {
                self.super_group_db.find_super_group_member_ids(group_id)
            })
            .await
    }

    /// 逐个群读取成员ID（顺序执行，不做并发，避免突发的多群查询压垮源存储）
    pub async fn get_groups_member_ids(&self, group_ids: &[String]) -> Result<HashMap<String, Vec<String>>> {
        let mut result = HashMap::with_capacity(group_ids.len());
        for group_id in group_ids {
            let user_ids = self.get_group_member_ids(group_id).await?;
            result.insert(group_id.clone(), user_ids);
        }
        Ok(result)
    }

    pub async fn get_group_members_hash(&self, group_id: &str) -> Result<u64> {
        self.store
            .get_or_load(&group_members_hash_key(group_id), self.expire, || async {
                let user_ids = self.get_group_member_ids(group_id).await?;
                Ok(members_fingerprint(&user_ids))
            })
            .await
    }

    /// 多个群的指纹与成员数，空群为 `{hash: 0, memberNum: 0}`
    pub async fn get_group_member_hash_map(
        &self,
        group_ids: &[String],
    ) -> Result<HashMap<String, GroupMemberHash>> {
        let mut result = HashMap::with_capacity(group_ids.len());
        for group_id in group_ids {
            let user_ids = self.get_group_member_ids(group_id).await?;
            let hash = GroupMemberHash {
                hash: members_fingerprint(&user_ids),
                member_num: user_ids.len() as u32,
            };
            debug!(
                "群成员指纹: group_id={}, hash={}, member_num={}",
                group_id, hash.hash, hash.member_num
            );
            result.insert(group_id.clone(), hash);
        }
        Ok(result)
    }

    // ============================================================
    // 成员信息
    // ============================================================

    pub async fn get_group_member_info(&self, group_id: &str, user_id: &str) -> Result<GroupMember> {
        self.store
            .get_or_load(&group_member_info_key(group_id, user_id), self.expire, || {
                self.group_member_db.take(group_id, user_id)
            })
            .await
    }

    /// 批量读取成员信息，`role_levels` 为空表示不过滤角色
    pub async fn get_group_members_info(
        &self,
        group_id: &str,
        user_ids: &[String],
        role_levels: &[RoleLevel],
    ) -> Result<Vec<GroupMember>> {
        let members = self.batch_members(group_id, user_ids, role_levels).await?;
        if role_levels.is_empty() {
            return Ok(members);
        }
        // 缓存中的成员不经过源存储的角色过滤
        Ok(members
            .into_iter()
            .filter(|m| role_levels.contains(&m.role_level))
            .collect())
    }

    /// 先取成员ID列表，再批量读取每个成员
    pub async fn get_all_group_member_info(&self, group_id: &str) -> Result<Vec<GroupMember>> {
        let user_ids = self.get_group_member_ids(group_id).await?;
        self.batch_members(group_id, &user_ids, &[]).await
    }

    async fn batch_members(
        &self,
        group_id: &str,
        user_ids: &[String],
        role_levels: &[RoleLevel],
    ) -> Result<Vec<GroupMember>> {
        let keys: Vec<String> = user_ids
            .iter()
            .map(|user_id| group_member_info_key(group_id, user_id))
            .collect();
        self.store
            .batch_get_or_load(&keys, self.expire, Self::get_group_member_index, |misses| async move {
                let ids: Vec<String> = misses.iter().map(|&i| user_ids[i].clone()).collect();
                self.group_member_db
                    .find(&[group_id.to_string()], &ids, role_levels)
                    .await
            })
            .await
    }

    pub async fn get_group_member_num(&self, group_id: &str) -> Result<i64> {
        self.store
            .get_or_load(&group_member_num_key(group_id), self.expire, || {
                self.group_member_db.take_group_member_num(group_id)
            })
            .await
    }

    // ============================================================
    // 删除（延迟执行）
    // ============================================================

    pub fn del_groups_info<I, S>(&self, group_ids: I) -> GroupInvalidation<B>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.new_invalidation().del_groups_info(group_ids)
    }

    pub fn del_joined_super_group_ids<I, S>(&self, user_ids: I) -> GroupInvalidation<B>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.new_invalidation().del_joined_super_group_ids(user_ids)
    }

    pub fn del_group_members_hash(&self, group_id: &str) -> GroupInvalidation<B> {
        self.new_invalidation().del_group_members_hash(group_id)
    }

    pub fn del_group_member_ids(&self, group_id: &str) -> GroupInvalidation<B> {
        self.new_invalidation().del_group_member_ids(group_id)
    }

    pub fn del_super_group_member_ids(&self, group_id: &str) -> GroupInvalidation<B> {
        self.new_invalidation().del_super_group_member_ids(group_id)
    }

    pub fn del_joined_group_id<I, S>(&self, user_ids: I) -> GroupInvalidation<B>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.new_invalidation().del_joined_group_id(user_ids)
    }

    pub fn del_group_members_info<I, S>(&self, group_id: &str, user_ids: I) -> GroupInvalidation<B>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.new_invalidation().del_group_members_info(group_id, user_ids)
    }

    pub fn del_groups_member_num<I, S>(&self, group_ids: I) -> GroupInvalidation<B>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.new_invalidation().del_groups_member_num(group_ids)
    }
}

/// 群组缓存的延迟删除句柄
///
/// 每个 `del_*` 返回新的句柄，可以把成员列表、成员数、指纹等多类 key 串成一次 `apply()`。
pub struct GroupInvalidation<B> {
    pending: PendingInvalidation<B>,
}

impl<B> Clone for GroupInvalidation<B> {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
        }
    }
}

impl<B: CacheBackend> GroupInvalidation<B> {
    fn with_keys(&self, keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            pending: self.pending.with_keys(keys),
        }
    }

    pub fn del_groups_info<I, S>(&self, group_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_keys(group_ids.into_iter().map(|id| group_info_key(id.as_ref())))
    }

    pub fn del_joined_super_group_ids<I, S>(&self, user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_keys(
            user_ids
                .into_iter()
                .map(|id| joined_super_groups_key(id.as_ref())),
        )
    }

    pub fn del_group_members_hash(&self, group_id: &str) -> Self {
        self.with_keys([group_members_hash_key(group_id)])
    }

    pub fn del_group_member_ids(&self, group_id: &str) -> Self {
        self.with_keys([group_member_ids_key(group_id)])
    }

    pub fn del_super_group_member_ids(&self, group_id: &str) -> Self {
        self.with_keys([super_group_member_ids_key(group_id)])
    }

    pub fn del_joined_group_id<I, S>(&self, user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_keys(user_ids.into_iter().map(|id| joined_groups_key(id.as_ref())))
    }

    pub fn del_group_members_info<I, S>(&self, group_id: &str, user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_keys(
            user_ids
                .into_iter()
                .map(|id| group_member_info_key(group_id, id.as_ref())),
        )
    }

    pub fn del_groups_member_num<I, S>(&self, group_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_keys(
            group_ids
                .into_iter()
                .map(|id| group_member_num_key(id.as_ref())),
        )
    }

    pub fn keys(&self) -> &[String] {
        self.pending.keys()
    }

    /// 执行删除，必须在源存储写入提交之后调用
    pub async fn apply(&self) -> Result<usize> {
        self.pending.apply().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::MemoryCacheBackend;
    use crate::repository::MemoryGroupStore;

    fn setup() -> (GroupCache<MemoryCacheBackend>, Arc<MemoryGroupStore>) {
        let db = Arc::new(MemoryGroupStore::new());
        let store = KeyedCacheStore::new(Arc::new(MemoryCacheBackend::new(1000)));
        let cache = GroupCache::new(store, db.clone(), db.clone(), db.clone());
        (cache, db)
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = members_fingerprint(&ids(&["u3", "u1", "u2"]));
        let b = members_fingerprint(&ids(&["u1", "u2", "u3"]));
        assert_eq!(a, b);

        let digest = format!("{:x}", md5::compute("u1;u2;u3"));
        let expected = u64::from_str_radix(&digest[..8], 16).unwrap();
        assert_eq!(a, expected);
        assert!(a <= u32::MAX as u64);
    }

    #[test]
    fn test_fingerprint_of_empty_group_is_zero() {
        assert_eq!(members_fingerprint(&[]), 0);
    }

    #[test]
    fn test_key_shapes() {
        assert_eq!(group_member_info_key("g1", "u1"), "GROUP_MEMBER_INFO:g1-u1");
        assert_eq!(joined_groups_key("u1"), "JOIN_GROUPS_KEY:u1");
        assert_eq!(group_member_num_key("g1"), "GROUP_MEMBER_NUM_CACHE:g1");
    }

    #[tokio::test]
    async fn test_members_hash_scenario() {
        let (cache, db) = setup();
        for user_id in ["u3", "u1", "u2"] {
            db.add_member(GroupMember::new("g1", user_id, RoleLevel::Ordinary));
        }

        let hash = cache.get_group_members_hash("g1").await.unwrap();
        assert_eq!(hash, members_fingerprint(&ids(&["u1", "u2", "u3"])));

        let map = cache
            .get_group_member_hash_map(&ids(&["g1", "empty"]))
            .await
            .unwrap();
        assert_eq!(map["g1"].hash, hash);
        assert_eq!(map["g1"].member_num, 3);
        assert_eq!(map["empty"], GroupMemberHash::default());
    }

    #[tokio::test]
    async fn test_group_info_read_through() {
        let (cache, db) = setup();
        db.insert_group(Group::new("g1", "rustaceans", "u1"));

        let first = cache.get_group_info("g1").await.unwrap();
        let queries = db.query_count();
        let second = cache.get_group_info("g1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(db.query_count(), queries);

        let err = cache.get_group_info("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_groups_info_skips_missing_groups() {
        let (cache, db) = setup();
        db.insert_group(Group::new("g1", "one", "u1"));
        db.insert_group(Group::new("g3", "three", "u1"));

        let groups = cache
            .get_groups_info(&ids(&["g1", "g2", "g3"]))
            .await
            .unwrap();
        let names: Vec<&str> = groups.iter().map(|g| g.group_name.as_str()).collect();
        assert_eq!(names, vec!["one", "three"]);
    }

    #[tokio::test]
    async fn test_members_info_role_filter() {
        let (cache, db) = setup();
        db.add_member(GroupMember::new("g1", "owner", RoleLevel::Owner));
        db.add_member(GroupMember::new("g1", "u1", RoleLevel::Ordinary));
        db.add_member(GroupMember::new("g1", "u2", RoleLevel::Ordinary));

        // 先把全部成员读进缓存，再带角色过滤读取
        let all = cache.get_all_group_member_info("g1").await.unwrap();
        assert_eq!(all.len(), 3);

        let owners = cache
            .get_group_members_info("g1", &ids(&["owner", "u1", "u2"]), &[RoleLevel::Owner])
            .await
            .unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].user_id, "owner");
    }

    #[tokio::test]
    async fn test_invalidation_waits_for_apply() {
        let (cache, db) = setup();
        db.add_member(GroupMember::new("g1", "u1", RoleLevel::Owner));

        assert_eq!(cache.get_group_member_ids("g1").await.unwrap(), vec!["u1"]);
        assert_eq!(cache.get_group_member_num("g1").await.unwrap(), 1);
        let old_hash = cache.get_group_members_hash("g1").await.unwrap();

        db.add_member(GroupMember::new("g1", "u2", RoleLevel::Ordinary));
        let invalidation = cache
            .del_group_member_ids("g1")
            .del_groups_member_num(["g1"])
            .del_group_members_hash("g1")
            .del_joined_group_id(["u2"]);
        assert_eq!(invalidation.keys().len(), 4);

        // 未 apply 前仍是旧数据
        assert_eq!(cache.get_group_member_ids("g1").await.unwrap(), vec!["u1"]);

        let removed = invalidation.apply().await.unwrap();
        assert_eq!(removed, 3);

        assert_eq!(
            cache.get_group_member_ids("g1").await.unwrap(),
            vec!["u1", "u2"]
        );
        assert_eq!(cache.get_group_member_num("g1").await.unwrap(), 2);
        assert_ne!(cache.get_group_members_hash("g1").await.unwrap(), old_hash);
    }

    #[tokio::test]
    async fn test_joined_groups() {
        let (cache, db) = setup();
        db.add_member(GroupMember::new("g1", "u1", RoleLevel::Ordinary));
        db.add_member(GroupMember::new("g2", "u1", RoleLevel::Ordinary));
        db.add_super_group_member("sg1", "u1");

        assert_eq!(
            cache.get_joined_group_ids("u1").await.unwrap(),
            vec!["g1", "g2"]
        );
        assert_eq!(
            cache.get_joined_super_group_ids("u1").await.unwrap(),
            vec!["sg1"]
        );
        assert!(cache.get_joined_super_group_ids("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_super_group_members_are_cached_separately() {
        let (cache, db) = setup();
        db.add_member(GroupMember::new("g1", "u9", RoleLevel::Owner));
        db.add_super_group_member("g1", "u2");
        db.add_super_group_member("g1", "u1");

        assert_eq!(
            cache.get_super_group_member_ids("g1").await.unwrap(),
            vec!["u1", "u2"]
        );
        assert_eq!(cache.get_group_member_ids("g1").await.unwrap(), vec!["u9"]);

        db.add_super_group_member("g1", "u3");
        assert_eq!(cache.get_super_group_member_ids("g1").await.unwrap().len(), 2);

        cache.del_super_group_member_ids("g1").apply().await.unwrap();
        assert_eq!(
            cache.get_super_group_member_ids("g1").await.unwrap(),
            vec!["u1", "u2", "u3"]
        );
    }
}

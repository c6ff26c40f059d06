//! 群组缓存：读穿透、合并回源、失效

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use privchat_delivery::infra::{EventBus, KeyedCacheStore, MemoryCacheBackend};
use privchat_delivery::model::{Group, GroupMember, RoleLevel};
use privchat_delivery::repository::{MemoryConversationStore, MemoryGroupStore, MemorySeqStore};
use privchat_delivery::rpc::{self, RPCMessageRequest};
use privchat_delivery::service::{
    members_fingerprint, EventBusNotificationSender, GroupCache, NotificationDispatcher,
    ReadSeqService,
};
use serde_json::json;

fn setup() -> (GroupCache<MemoryCacheBackend>, Arc<MemoryGroupStore>) {
    let groups = Arc::new(MemoryGroupStore::new());
    let store = KeyedCacheStore::new(Arc::new(MemoryCacheBackend::new(1000)))
        .with_random_expire_adjustment(0.2);
    let cache = GroupCache::new(store, groups.clone(), groups.clone(), groups.clone())
        .with_expire(Duration::from_secs(600));
    (cache, groups)
}

#[tokio::test]
async fn test_concurrent_reads_hit_origin_once() {
    let (cache, groups) = setup();
    for user_id in ["u3", "u1", "u2"] {
        groups.add_member(GroupMember::new("g1", user_id, RoleLevel::Ordinary));
    }

    let results = join_all((0..16).map(|_| cache.get_group_members_hash("g1"))).await;
    let expected = members_fingerprint(&["u1".to_string(), "u2".to_string(), "u3".to_string()]);
    for result in results {
        assert_eq!(result.unwrap(), expected);
    }
    assert_eq!(groups.query_count(), 1);
}

#[tokio::test]
async fn test_fingerprint_is_order_independent() {
    let a = members_fingerprint(&["u3".into(), "u1".into(), "u2".into()]);
    let b = members_fingerprint(&["u1".into(), "u2".into(), "u3".into()]);
    assert_eq!(a, b);
    assert!(a <= u32::MAX as u64);
    assert_ne!(a, members_fingerprint(&["u1".into(), "u2".into()]));
    assert_eq!(members_fingerprint(&[]), 0);
}

#[tokio::test]
async fn test_member_change_visible_after_invalidation() {
    let (cache, groups) = setup();
    groups.insert_group(Group::new("g1", "team", "u1"));
    groups.add_member(GroupMember::new("g1", "u1", RoleLevel::Owner));
    groups.add_member(GroupMember::new("g1", "u2", RoleLevel::Ordinary));

    let before = cache.get_group_member_hash_map(&["g1".to_string()]).await.unwrap();
    assert_eq!(before["g1"].member_num, 2);

    groups.add_member(GroupMember::new("g1", "u3", RoleLevel::Ordinary));
    let stale = cache.get_group_member_hash_map(&["g1".to_string()]).await.unwrap();
    assert_eq!(stale["g1"], before["g1"]);

    cache
        .del_group_member_ids("g1")
        .del_group_members_hash("g1")
        .del_groups_member_num(["g1"])
        .apply()
        .await
        .unwrap();

    let after = cache.get_group_member_hash_map(&["g1".to_string()]).await.unwrap();
    assert_eq!(after["g1"].member_num, 3);
    assert_ne!(after["g1"].hash, before["g1"].hash);
    assert_eq!(cache.get_group_member_num("g1").await.unwrap(), 3);
}

#[tokio::test]
async fn test_group_hash_map_over_rpc() {
    let (cache, groups) = setup();
    for user_id in ["u3", "u1", "u2"] {
        groups.add_member(GroupMember::new("g1", user_id, RoleLevel::Ordinary));
    }

    let dispatcher = NotificationDispatcher::new(
        cache.clone(),
        Arc::new(EventBusNotificationSender::new(Arc::new(EventBus::new()))),
    );
    let read_seq = ReadSeqService::new(
        Arc::new(MemorySeqStore::new()),
        Arc::new(MemoryConversationStore::new()),
        dispatcher,
    );
    let router = rpc::build_router(read_seq, cache).await;

    let resp = router
        .handle(RPCMessageRequest::new(
            "group/get_group_member_hash_map",
            json!({"groupIDs": ["g1", "g_empty"]}),
        ))
        .await;
    assert!(resp.is_ok());
    let data = resp.data.unwrap();
    let expected = members_fingerprint(&["u1".into(), "u2".into(), "u3".into()]);
    assert_eq!(
        data["groupHashMap"]["g1"],
        json!({"hash": expected, "memberNum": 3})
    );
    assert_eq!(
        data["groupHashMap"]["g_empty"],
        json!({"hash": 0, "memberNum": 0})
    );
}

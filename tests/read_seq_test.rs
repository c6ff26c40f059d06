//! 已读位置 RPC 的端到端测试（内存存储 + 内存缓存）

use std::sync::Arc;

use privchat_delivery::domain::DomainEvent;
use privchat_delivery::error::ErrorCode;
use privchat_delivery::infra::{EventBus, KeyedCacheStore, MemoryCacheBackend};
use privchat_delivery::model::{Conversation, ConversationType, GroupMember, RoleLevel};
use privchat_delivery::repository::{
    MemoryConversationStore, MemoryGroupStore, MemorySeqStore, SeqStore,
};
use privchat_delivery::rpc::{self, RPCMessageRequest, RpcRouter};
use privchat_delivery::service::{
    EventBusNotificationSender, GroupCache, NotificationDispatcher, ReadSeqService,
};
use serde_json::json;
use tokio::sync::broadcast;

struct TestEnv {
    router: RpcRouter,
    seqs: Arc<MemorySeqStore>,
    conversations: Arc<MemoryConversationStore>,
    groups: Arc<MemoryGroupStore>,
    events: broadcast::Receiver<DomainEvent>,
}

async fn setup() -> TestEnv {
    let seqs = Arc::new(MemorySeqStore::new());
    let conversations = Arc::new(MemoryConversationStore::new());
    let groups = Arc::new(MemoryGroupStore::new());
    let bus = Arc::new(EventBus::new());
    let events = bus.subscribe();

    let store = KeyedCacheStore::new(Arc::new(MemoryCacheBackend::new(1000)));
    let group_cache = GroupCache::new(store, groups.clone(), groups.clone(), groups.clone());
    let dispatcher = NotificationDispatcher::new(
        group_cache.clone(),
        Arc::new(EventBusNotificationSender::new(bus)),
    );
    let read_seq = ReadSeqService::new(seqs.clone(), conversations.clone(), dispatcher);
    let router = rpc::build_router(read_seq, group_cache).await;

    TestEnv {
        router,
        seqs,
        conversations,
        groups,
        events,
    }
}

fn drain(rx: &mut broadcast::Receiver<DomainEvent>) -> Vec<DomainEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_routes_registered() {
    let env = setup().await;
    let routes = env.router.list_routes().await;
    assert_eq!(
        routes,
        vec![
            "group/get_group_member_hash_map",
            "msg/get_conversations_has_read_and_max_seq",
            "msg/mark_conversation_as_read",
            "msg/mark_msgs_as_read",
            "msg/set_conversation_has_read_seq",
        ]
    );
}

#[tokio::test]
async fn test_mark_msgs_as_read_over_rpc() {
    let mut env = setup().await;
    env.seqs.set_max_seq("si_u1_u2", 10);
    env.conversations
        .insert(Conversation::single("u1", "si_u1_u2", "u2"));

    let resp = env
        .router
        .handle(RPCMessageRequest::new(
            "msg/mark_msgs_as_read",
            json!({"userID": "u1", "conversationID": "si_u1_u2", "seqs": [3, 5, 9]}),
        ))
        .await;
    assert!(resp.is_ok(), "unexpected response: {:?}", resp);

    let events = drain(&mut env.events);
    assert_eq!(events.len(), 1);
    let DomainEvent::ReadReceipt {
        send_id,
        recv_id,
        conversation_type,
        tips,
        ..
    } = &events[0];
    assert_eq!(send_id, "u1");
    assert_eq!(recv_id, "u2");
    assert_eq!(*conversation_type, ConversationType::SingleChat);
    assert_eq!(tips.has_read_seq, 9);

    // 超出 maxSeq
    let resp = env
        .router
        .handle(RPCMessageRequest::new(
            "msg/set_conversation_has_read_seq",
            json!({"userID": "u1", "conversationID": "si_u1_u2", "hasReadSeq": 15}),
        ))
        .await;
    assert_eq!(resp.code, ErrorCode::ArgsError.code());
    assert_eq!(
        env.seqs.get_has_read_seq("u1", "si_u1_u2").await.unwrap(),
        Some(9)
    );
    assert!(drain(&mut env.events).is_empty());
}

#[tokio::test]
async fn test_has_read_and_max_seq_over_rpc() {
    let env = setup().await;
    env.seqs.set_max_seq("si_u1_u2", 10);
    env.seqs.set_max_seq("sg_g1", 4);
    env.conversations
        .insert(Conversation::single("u1", "si_u1_u2", "u2"));
    env.conversations
        .insert(Conversation::group("u1", "sg_g1", "g1").with_max_seq(7));
    env.seqs.set_has_read_seq("u1", "si_u1_u2", 6).await.unwrap();

    let resp = env
        .router
        .handle(RPCMessageRequest::new(
            "msg/get_conversations_has_read_and_max_seq",
            json!({"userID": "u1"}),
        ))
        .await;
    assert!(resp.is_ok());
    let data = resp.data.unwrap();
    assert_eq!(data["seqs"]["si_u1_u2"], json!({"hasReadSeq": 6, "maxSeq": 10}));
    assert_eq!(data["seqs"]["sg_g1"], json!({"hasReadSeq": 0, "maxSeq": 7}));
}

#[tokio::test]
async fn test_mark_conversation_as_read_fans_out_to_group() {
    let mut env = setup().await;
    for user_id in ["u1", "u2", "u3"] {
        env.groups
            .add_member(GroupMember::new("g1", user_id, RoleLevel::Ordinary));
    }
    env.seqs.set_max_seq("sg_g1", 20);
    env.conversations
        .insert(Conversation::group("u1", "sg_g1", "g1"));

    let resp = env
        .router
        .handle(RPCMessageRequest::new(
            "msg/mark_conversation_as_read",
            json!({"userID": "u1", "conversationID": "sg_g1", "hasReadSeq": 12}),
        ))
        .await;
    assert!(resp.is_ok(), "unexpected response: {:?}", resp);
    assert_eq!(
        env.seqs.get_has_read_seq("u1", "sg_g1").await.unwrap(),
        Some(12)
    );

    let mut recipients: Vec<String> = drain(&mut env.events)
        .into_iter()
        .map(|DomainEvent::ReadReceipt { recv_id, .. }| recv_id)
        .collect();
    recipients.sort();
    assert_eq!(recipients, vec!["u1", "u2", "u3"]);
}

#[tokio::test]
async fn test_rpc_errors_map_to_codes() {
    let env = setup().await;

    let resp = env
        .router
        .handle(RPCMessageRequest::new("msg/unknown", json!({})))
        .await;
    assert_eq!(resp.code, ErrorCode::ArgsError.code());

    let resp = env
        .router
        .handle(RPCMessageRequest::new(
            "msg/mark_msgs_as_read",
            json!({"userID": "u1"}),
        ))
        .await;
    assert_eq!(resp.code, ErrorCode::DataError.code());

    let resp = env
        .router
        .handle(RPCMessageRequest::new(
            "msg/mark_conversation_as_read",
            json!({"userID": "u1", "conversationID": "missing", "hasReadSeq": 1}),
        ))
        .await;
    assert_eq!(resp.code, ErrorCode::RecordNotFoundError.code());
}

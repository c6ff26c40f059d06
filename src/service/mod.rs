// 业务服务层模块
pub mod group_cache;
pub mod notification_service;
pub mod read_seq_service;

pub use group_cache::{members_fingerprint, GroupCache, GroupInvalidation, GROUP_EXPIRE};
pub use notification_service::{
    EventBusNotificationSender, NotificationDispatcher, NotificationSender,
};
pub use read_seq_service::ReadSeqService;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 服务器错误类型
///
/// 需要 `Clone`：同一个 key 的并发回源只执行一次，失败结果要分发给所有等待者。
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ServerError {
    /// 参数错误（如 hasReadSeq 超过 maxSeq、seqs 为空）
    #[error("Validation error: {0}")]
    Validation(String),
    /// 源存储中不存在该记录
    #[error("Not found: {0}")]
    NotFound(String),
    /// 批量回源时实体无法对齐到缓存 key（仅在批量路径内部消费）
    #[error("Cache index not found")]
    IndexNotFound,
    /// 数据库错误
    #[error("Database error: {0}")]
    Database(String),
    /// Redis 错误
    #[error("Redis error: {0}")]
    Redis(String),
    /// 缓存错误
    #[error("Cache error: {0}")]
    Cache(String),
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// 超时错误
    #[error("Timeout error: {0}")]
    Timeout(String),
    /// 配置错误
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// 是否为「记录不存在」
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServerError::NotFound(_))
    }
}

impl From<redis::RedisError> for ServerError {
    fn from(err: redis::RedisError) -> Self {
        ServerError::Redis(err.to_string())
    }
}

impl From<bb8::RunError<redis::RedisError>> for ServerError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        ServerError::Redis(format!("Failed to get Redis connection: {}", err))
    }
}

impl From<sqlx::Error> for ServerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ServerError::NotFound("record not found".to_string()),
            other => ServerError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Serialization(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ServerError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        ServerError::Timeout(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ServerError>;

/// 错误代码（与客户端约定的通用错误码）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 无错误
    NoError = 0,
    /// 输入参数错误
    ArgsError = 90001,
    /// redis/db 等存储错误
    DatabaseError = 90002,
    /// 服务器内部错误
    ServerInternalError = 90003,
    /// 网络错误
    NetworkError = 90004,
    /// 数据错误
    DataError = 90007,
    /// 记录不存在
    RecordNotFoundError = 91002,
    /// 已读功能被禁用
    MessageHasReadDisable = 96001,
}

impl ErrorCode {
    /// 群组不存在，与记录不存在共用 91002
    pub const GROUP_ID_NOT_FOUND: ErrorCode = ErrorCode::RecordNotFoundError;

    /// 错误码数值
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<&ServerError> for ErrorCode {
    fn from(error: &ServerError) -> Self {
        match error {
            ServerError::Validation(_) => ErrorCode::ArgsError,
            ServerError::NotFound(_) => ErrorCode::RecordNotFoundError,
            ServerError::Database(_) | ServerError::Redis(_) | ServerError::Cache(_) => {
                ErrorCode::DatabaseError
            }
            ServerError::Timeout(_) => ErrorCode::NetworkError,
            ServerError::Serialization(_) => ErrorCode::DataError,
            ServerError::IndexNotFound
            | ServerError::Configuration(_)
            | ServerError::Internal(_) => ErrorCode::ServerInternalError,
        }
    }
}

/// 错误响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: i32,
    /// 错误消息
    pub message: String,
    /// 详细信息
    pub detail: Option<String>,
}

impl ErrorResponse {
    /// 创建错误响应
    pub fn new(error: &ServerError) -> Self {
        let code = ErrorCode::from(error);
        Self {
            code: code.code(),
            message: format!("{:?}", code),
            detail: Some(error.to_string()),
        }
    }
}

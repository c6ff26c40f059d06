use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use super::types::{RPCMessageRequest, RPCMessageResponse};
use crate::error::{ErrorCode, Result};

/// RPC 处理函数类型
pub type RpcHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// RPC 路由器
#[derive(Clone)]
pub struct RpcRouter {
    routes: Arc<RwLock<HashMap<String, RpcHandler>>>,
}

impl RpcRouter {
    /// 创建新的路由器
    pub fn new() -> Self {
        Self {
            routes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 注册路由
    pub async fn register<F, Fut>(&self, route: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: RpcHandler = Arc::new(move |body| Box::pin(handler(body)));
        self.routes.write().await.insert(route.to_string(), handler);
    }

    /// 处理 RPC 请求
    pub async fn handle(&self, request: RPCMessageRequest) -> RPCMessageResponse {
        let handler = self.routes.read().await.get(&request.route).cloned();

        match handler {
            Some(handler) => match handler(request.body).await {
                Ok(data) => RPCMessageResponse::success(data),
                Err(e) => {
                    tracing::debug!("RPC {} 失败: {}", request.route, e);
                    RPCMessageResponse::from_error(&e)
                }
            },
            None => RPCMessageResponse::error(
                ErrorCode::ArgsError.code(),
                format!("Route '{}' not found", request.route),
            ),
        }
    }

    /// 获取所有注册的路由
    pub async fn list_routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self.routes.read().await.keys().cloned().collect();
        routes.sort();
        routes
    }
}

impl Default for RpcRouter {
    fn default() -> Self {
        Self::new()
    }
}

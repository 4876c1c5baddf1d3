//! 后端存储重新初始化信号
//!
//! 发布/订阅接口：订阅返回所有权句柄，句柄释放（显式注销或 drop）即取消订阅

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use uuid::Uuid;

/// 重新初始化信号处理器
#[async_trait]
pub trait ReinitHandler: Send + Sync {
    /// 后端存储已重新初始化
    async fn on_reinitialized(&self);

    /// 处理器名称
    fn name(&self) -> &str;
}

type Subscribers = RwLock<Vec<(Uuid, Arc<dyn ReinitHandler>)>>;

/// 重新初始化信号源
#[derive(Clone, Default)]
pub struct ReinitSignal {
    subscribers: Arc<Subscribers>,
}

impl ReinitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅信号
    pub fn subscribe(&self, handler: Arc<dyn ReinitHandler>) -> Subscription {
        let id = Uuid::new_v4();
        debug!("Handler '{}' subscribed to reinitialization signal", handler.name());
        self.subscribers.write().push((id, handler));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// 当前订阅数量
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// 通知所有订阅者，返回被通知的数量
    ///
    /// 处理器按订阅顺序依次等待完成；处理器可在回调中注销或重新订阅。
    pub async fn publish(&self) -> usize {
        let handlers: Vec<Arc<dyn ReinitHandler>> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        info!("Publishing reinitialization signal to {} handler(s)", handlers.len());
        for handler in &handlers {
            handler.on_reinitialized().await;
        }
        handlers.len()
    }
}

/// 订阅句柄
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    id: Uuid,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 是否仍处于订阅状态
    pub fn is_active(&self) -> bool {
        self.subscribers
            .upgrade()
            .map(|subscribers| subscribers.read().iter().any(|(id, _)| *id == self.id))
            .unwrap_or(false)
    }

    /// 显式取消订阅
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.write().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

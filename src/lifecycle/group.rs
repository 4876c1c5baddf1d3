//! 监听组
//!
//! 一组作为整体启动、停止的网络端点

use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 端点能力接口：绑定和解绑组内全部端点
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListenerEndpoints: Send + Sync {
    /// 绑定全部端点
    async fn bind_all(&self, cancel: &CancellationToken) -> Result<()>;

    /// 解绑全部端点
    async fn unbind_all(&self, cancel: &CancellationToken) -> Result<()>;
}

/// 监听组状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 监听组
///
/// 状态只由所属的 [`LifecycleContainer`](super::LifecycleContainer) 推进。
pub struct ListenerGroup {
    name: String,
    endpoints: Arc<dyn ListenerEndpoints>,
    state: Mutex<GroupState>,
}

impl ListenerGroup {
    pub fn new(name: impl Into<String>, endpoints: Arc<dyn ListenerEndpoints>) -> Self {
        Self {
            name: name.into(),
            endpoints,
            state: Mutex::new(GroupState::Stopped),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> GroupState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: GroupState) {
        *self.state.lock() = state;
    }

    pub(crate) fn endpoints(&self) -> &Arc<dyn ListenerEndpoints> {
        &self.endpoints
    }
}

impl fmt::Debug for ListenerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerGroup")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

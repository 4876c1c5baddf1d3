//! 监听组生命周期容器
//!
//! 按声明顺序启动、逆序停止一组监听组，并在后端存储重新初始化时整体重启。
//!
//! # 顺序约定
//! - 启动按声明顺序进行，停止按声明的逆序进行；依赖方必须声明在被依赖方之后。
//! - 启动时某个组失败不会回滚已启动的组，剩余组仍会尝试启动，最终报告全部失败的组。
//!
//! # 并发约定
//! - 同一时间只允许一个重启序列；重启进行中再次请求重启会立即得到 `AlreadyRestarting`。
//! - 手动 `start`/`stop` 与重启序列共享同一个转换锁，排队等待而不会交错推进组状态。
//!
//! # 故障隔离
//! 由重新初始化信号触发的重启中出现的任何错误或 panic 都在信号处理边界被捕获并记录，
//! 不会传播到信号源；捕获后容器重新安装订阅，以便下一次信号再次尝试重启。

use super::group::{GroupState, ListenerGroup};
use crate::core::{ReinitHandler, ReinitSignal, Subscription};
use crate::error::GroupFailure;
use crate::types::{now_ns, TimestampNs};
use crate::{RealmError, Result};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 默认事件通道容量
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// 容器扩展钩子
#[async_trait]
pub trait ContainerHooks: Send + Sync {
    /// 重启时，在停止之后、启动之前调用
    ///
    /// 可在此刷新依赖于刚重新初始化的后端存储的配置。
    async fn before_start(&self, _on_reinit: bool, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    /// 重启的最后一步：开放对外监听
    async fn start_listeners(&self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }
}

/// 不做任何事的钩子
#[derive(Debug, Default)]
pub struct NoopHooks;

impl ContainerHooks for NoopHooks {}

/// 容器聚合状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// 全部组已停止
    Stopped,
    /// 全部组运行中
    Running,
    /// 至少一个组失败
    Degraded,
    /// 存在正在启动或停止的组
    Transitioning,
}

/// 生命周期事件
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    /// 容器名称
    pub container: String,
    /// 事件类型
    pub kind: LifecycleEventKind,
    /// 事件时间
    pub timestamp: TimestampNs,
}

/// 生命周期事件类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEventKind {
    GroupStarting { group: String },
    GroupRunning { group: String },
    GroupStopping { group: String },
    GroupStopped { group: String },
    GroupFailed { group: String, reason: String },
    SubscriptionInstalled,
    SubscriptionReleased,
    RestartStarted { on_reinit: bool },
    RestartCompleted { on_reinit: bool },
    RestartFaulted { reason: String },
}

/// 重启守卫，释放时清除进行中标记
struct RestartGuard<'a>(&'a AtomicBool);

impl<'a> RestartGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RestartGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 生命周期容器
pub struct LifecycleContainer {
    name: String,
    groups: Vec<ListenerGroup>,
    signal: ReinitSignal,
    hooks: Arc<dyn ContainerHooks>,
    /// 容器独占的信号订阅
    subscription: Mutex<Option<Subscription>>,
    /// 串行化组状态转换
    transitions: tokio::sync::Mutex<()>,
    restart_in_progress: AtomicBool,
    events: broadcast::Sender<LifecycleEvent>,
    self_ref: Weak<LifecycleContainer>,
}

/// 容器构建器
pub struct LifecycleContainerBuilder {
    name: String,
    groups: Vec<ListenerGroup>,
    signal: ReinitSignal,
    hooks: Arc<dyn ContainerHooks>,
    event_capacity: usize,
}

impl LifecycleContainerBuilder {
    pub fn new(name: impl Into<String>, signal: ReinitSignal) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
            signal,
            hooks: Arc::new(NoopHooks),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// 追加监听组，声明顺序即启动顺序
    pub fn group(mut self, group: ListenerGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ContainerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Result<Arc<LifecycleContainer>> {
        let mut names = HashSet::new();
        for group in &self.groups {
            if group.name().is_empty() {
                return Err(RealmError::config("Listener group name cannot be empty"));
            }
            if !names.insert(group.name().to_string()) {
                return Err(RealmError::config(&format!(
                    "Duplicate listener group '{}' in container '{}'",
                    group.name(),
                    self.name
                )));
            }
        }

        let (events, _) = broadcast::channel(self.event_capacity);
        Ok(Arc::new_cyclic(|self_ref| LifecycleContainer {
            name: self.name,
            groups: self.groups,
            signal: self.signal,
            hooks: self.hooks,
            subscription: Mutex::new(None),
            transitions: tokio::sync::Mutex::new(()),
            restart_in_progress: AtomicBool::new(false),
            events,
            self_ref: self_ref.clone(),
        }))
    }
}

impl LifecycleContainer {
    pub fn builder(name: impl Into<String>, signal: ReinitSignal) -> LifecycleContainerBuilder {
        LifecycleContainerBuilder::new(name, signal)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 按声明顺序排列的监听组
    pub fn groups(&self) -> &[ListenerGroup] {
        &self.groups
    }

    pub fn group_states(&self) -> Vec<(String, GroupState)> {
        self.groups
            .iter()
            .map(|group| (group.name().to_string(), group.state()))
            .collect()
    }

    /// 聚合状态
    pub fn state(&self) -> ContainerState {
        let states: Vec<GroupState> = self.groups.iter().map(ListenerGroup::state).collect();

        if states.is_empty() {
            return if self.is_subscribed() {
                ContainerState::Running
            } else {
                ContainerState::Stopped
            };
        }

        if states.contains(&GroupState::Failed) {
            ContainerState::Degraded
        } else if states.iter().all(|s| *s == GroupState::Running) {
            ContainerState::Running
        } else if states.iter().all(|s| *s == GroupState::Stopped) {
            ContainerState::Stopped
        } else {
            ContainerState::Transitioning
        }
    }

    /// 是否持有信号订阅
    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }

    pub fn is_restarting(&self) -> bool {
        self.restart_in_progress.load(Ordering::Acquire)
    }

    /// 订阅生命周期事件
    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// 启动全部监听组，随后安装重新初始化订阅
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let _transitions = self.transitions.lock().await;
        self.start_locked(cancel).await
    }

    /// 释放订阅，随后逆序停止全部监听组
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        let _transitions = self.transitions.lock().await;
        self.stop_locked(cancel).await
    }

    /// 重启全部监听组
    ///
    /// 停止 → `before_start` 钩子 → 启动 → `start_listeners` 钩子；任一步失败即中止并返回错误。
    pub async fn restart(&self, on_reinit: bool, cancel: &CancellationToken) -> Result<()> {
        let _restart = self.acquire_restart()?;
        let _transitions = self.transitions.lock().await;
        self.run_restart_sequence(on_reinit, cancel).await
    }

    /// 处理后端存储重新初始化信号
    ///
    /// 重启中的任何错误或 panic 都在此处被记录并吞掉。
    pub async fn on_backing_store_reinitialized(&self) {
        let _restart = match self.acquire_restart() {
            Ok(guard) => guard,
            Err(_) => {
                warn!(
                    "Container '{}' is already restarting, reinitialization signal coalesced",
                    self.name
                );
                return;
            }
        };
        let _transitions = self.transitions.lock().await;

        // 排队等锁期间可能已被手动停止，订阅已释放则不再重启
        if !self.is_subscribed() {
            info!(
                "Container '{}' was stopped before the reinitialization signal was handled, restart skipped",
                self.name
            );
            return;
        }

        let cancel = CancellationToken::new();
        let outcome = AssertUnwindSafe(self.run_restart_sequence(true, &cancel))
            .catch_unwind()
            .await;

        let fault = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(error)) => RealmError::RestartFault {
                message: error.to_string(),
            },
            Err(panic) => RealmError::RestartFault {
                message: panic_message(panic.as_ref()),
            },
        };

        error!(
            container = %self.name,
            error = %fault,
            "Unexpected error when handling backing store reinitialization"
        );
        self.emit(LifecycleEventKind::RestartFaulted {
            reason: fault.to_string(),
        });
        self.install_subscription();
    }

    // 私有辅助方法

    fn acquire_restart(&self) -> Result<RestartGuard<'_>> {
        RestartGuard::acquire(&self.restart_in_progress).ok_or_else(|| RealmError::AlreadyRestarting {
            container: self.name.clone(),
        })
    }

    async fn run_restart_sequence(&self, on_reinit: bool, cancel: &CancellationToken) -> Result<()> {
        info!("Restarting container '{}' (on_reinit: {})", self.name, on_reinit);
        self.emit(LifecycleEventKind::RestartStarted { on_reinit });

        self.stop_locked(cancel).await?;
        ensure_not_cancelled(cancel, "restart")?;

        self.hooks.before_start(on_reinit, cancel).await?;
        ensure_not_cancelled(cancel, "restart")?;

        self.start_locked(cancel).await?;
        ensure_not_cancelled(cancel, "restart")?;

        self.hooks.start_listeners(cancel).await?;

        self.emit(LifecycleEventKind::RestartCompleted { on_reinit });
        info!("Container '{}' restarted successfully", self.name);
        Ok(())
    }

    async fn start_locked(&self, cancel: &CancellationToken) -> Result<()> {
        let mut failed = Vec::new();

        for group in &self.groups {
            ensure_not_cancelled(cancel, "start")?;

            if group.state() == GroupState::Running {
                debug!("Listener group '{}' is already running", group.name());
                continue;
            }

            self.transition(group, GroupState::Starting);
            match group.endpoints().bind_all(cancel).await {
                Ok(()) => {
                    self.transition(group, GroupState::Running);
                    info!("Listener group '{}' started", group.name());
                }
                Err(error) => {
                    self.fail(group, &error);
                    if error.is_cancelled() {
                        return Err(error);
                    }
                    failed.push(GroupFailure::new(group.name(), error.to_string()));
                }
            }
        }

        self.install_subscription();

        if failed.is_empty() {
            info!("Container '{}' started {} listener group(s)", self.name, self.groups.len());
            Ok(())
        } else {
            Err(RealmError::PartialStartFailure { failed })
        }
    }

    async fn stop_locked(&self, cancel: &CancellationToken) -> Result<()> {
        self.release_subscription();
        let mut failed = Vec::new();

        for group in self.groups.iter().rev() {
            ensure_not_cancelled(cancel, "stop")?;

            if !matches!(group.state(), GroupState::Running | GroupState::Failed) {
                continue;
            }

            self.transition(group, GroupState::Stopping);
            match group.endpoints().unbind_all(cancel).await {
                Ok(()) => {
                    self.transition(group, GroupState::Stopped);
                    info!("Listener group '{}' stopped", group.name());
                }
                Err(error) => {
                    self.fail(group, &error);
                    if error.is_cancelled() {
                        return Err(error);
                    }
                    failed.push(GroupFailure::new(group.name(), error.to_string()));
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(RealmError::PartialStopFailure { failed })
        }
    }

    fn install_subscription(&self) {
        let mut slot = self.subscription.lock();
        if slot.is_some() {
            return;
        }

        let handler = Arc::new(RestartOnReinit {
            name: format!("{}-restart", self.name),
            container: self.self_ref.clone(),
        });
        *slot = Some(self.signal.subscribe(handler));
        drop(slot);

        debug!("Container '{}' subscribed to reinitialization signal", self.name);
        self.emit(LifecycleEventKind::SubscriptionInstalled);
    }

    fn release_subscription(&self) {
        let released = self.subscription.lock().take();
        if let Some(subscription) = released {
            subscription.unsubscribe();
            debug!("Container '{}' released reinitialization subscription", self.name);
            self.emit(LifecycleEventKind::SubscriptionReleased);
        }
    }

    fn transition(&self, group: &ListenerGroup, state: GroupState) {
        group.set_state(state);
        let name = group.name().to_string();
        let kind = match state {
            GroupState::Starting => LifecycleEventKind::GroupStarting { group: name },
            GroupState::Running => LifecycleEventKind::GroupRunning { group: name },
            GroupState::Stopping => LifecycleEventKind::GroupStopping { group: name },
            GroupState::Stopped => LifecycleEventKind::GroupStopped { group: name },
            GroupState::Failed => LifecycleEventKind::GroupFailed {
                group: name,
                reason: String::new(),
            },
        };
        self.emit(kind);
    }

    fn fail(&self, group: &ListenerGroup, error: &RealmError) {
        group.set_state(GroupState::Failed);
        error!("Listener group '{}' failed: {}", group.name(), error);
        self.emit(LifecycleEventKind::GroupFailed {
            group: group.name().to_string(),
            reason: error.to_string(),
        });
    }

    fn emit(&self, kind: LifecycleEventKind) {
        // 没有接收者时发送失败，忽略即可
        let _ = self.events.send(LifecycleEvent {
            container: self.name.clone(),
            kind,
            timestamp: now_ns(),
        });
    }
}

impl std::fmt::Debug for LifecycleContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleContainer")
            .field("name", &self.name)
            .field("groups", &self.groups)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

/// 将重新初始化信号转发给容器
struct RestartOnReinit {
    name: String,
    container: Weak<LifecycleContainer>,
}

#[async_trait]
impl ReinitHandler for RestartOnReinit {
    async fn on_reinitialized(&self) {
        if let Some(container) = self.container.upgrade() {
            container.on_backing_store_reinitialized().await;
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken, operation: &str) -> Result<()> {
    if cancel.is_cancelled() {
        warn!("Lifecycle operation '{}' cancelled", operation);
        Err(RealmError::cancelled(operation))
    } else {
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::group::{ListenerEndpoints, MockListenerEndpoints};
    use mockall::Sequence;
    use tokio::sync::Notify;

    type CallLog = Arc<Mutex<Vec<String>>>;

    struct RecordingEndpoints {
        name: String,
        log: CallLog,
        fail_bind: AtomicBool,
        fail_unbind: AtomicBool,
        cancel_after_bind: Option<CancellationToken>,
    }

    impl RecordingEndpoints {
        fn new(name: &str, log: &CallLog) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                log: log.clone(),
                fail_bind: AtomicBool::new(false),
                fail_unbind: AtomicBool::new(false),
                cancel_after_bind: None,
            })
        }
    }

    #[async_trait]
    impl ListenerEndpoints for RecordingEndpoints {
        async fn bind_all(&self, _cancel: &CancellationToken) -> Result<()> {
            self.log.lock().push(format!("bind:{}", self.name));
            if let Some(token) = &self.cancel_after_bind {
                token.cancel();
            }
            if self.fail_bind.load(Ordering::SeqCst) {
                return Err(RealmError::endpoint("address already in use"));
            }
            Ok(())
        }

        async fn unbind_all(&self, _cancel: &CancellationToken) -> Result<()> {
            self.log.lock().push(format!("unbind:{}", self.name));
            if self.fail_unbind.load(Ordering::SeqCst) {
                return Err(RealmError::endpoint("unbind failed"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingHooks {
        log: CallLog,
        panic_on_reinit: AtomicBool,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    #[async_trait]
    impl ContainerHooks for RecordingHooks {
        async fn before_start(&self, on_reinit: bool, _cancel: &CancellationToken) -> Result<()> {
            self.log.lock().push(format!("before_start:{}", on_reinit));
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            if on_reinit && self.panic_on_reinit.load(Ordering::SeqCst) {
                panic!("configuration reload exploded");
            }
            Ok(())
        }

        async fn start_listeners(&self, _cancel: &CancellationToken) -> Result<()> {
            self.log.lock().push("start_listeners".to_string());
            Ok(())
        }
    }

    struct Fixture {
        container: Arc<LifecycleContainer>,
        signal: ReinitSignal,
        log: CallLog,
        endpoints: Vec<Arc<RecordingEndpoints>>,
    }

    fn fixture_with(hooks: Arc<dyn ContainerHooks>, log: CallLog) -> Fixture {
        let signal = ReinitSignal::new();
        let endpoints: Vec<_> = ["Login", "World", "Connect"]
            .iter()
            .map(|name| RecordingEndpoints::new(name, &log))
            .collect();

        let mut builder = LifecycleContainer::builder("game", signal.clone()).hooks(hooks);
        for endpoint in &endpoints {
            builder = builder.group(ListenerGroup::new(endpoint.name.clone(), endpoint.clone()));
        }

        Fixture {
            container: builder.build().unwrap(),
            signal,
            log,
            endpoints,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(NoopHooks), CallLog::default())
    }

    fn drain(log: &CallLog) -> Vec<String> {
        std::mem::take(&mut *log.lock())
    }

    fn drain_events(receiver: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn test_start_and_stop_order() {
        let f = fixture();
        let cancel = CancellationToken::new();

        f.container.start(&cancel).await.unwrap();
        assert_eq!(drain(&f.log), vec!["bind:Login", "bind:World", "bind:Connect"]);
        assert_eq!(f.container.state(), ContainerState::Running);
        assert!(f.container.is_subscribed());
        assert_eq!(f.signal.subscriber_count(), 1);

        f.container.stop(&cancel).await.unwrap();
        assert_eq!(drain(&f.log), vec!["unbind:Connect", "unbind:World", "unbind:Login"]);
        assert_eq!(f.container.state(), ContainerState::Stopped);
        assert!(!f.container.is_subscribed());
        assert_eq!(f.signal.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_start_failure_keeps_started_groups() {
        let f = fixture();
        f.endpoints[1].fail_bind.store(true, Ordering::SeqCst);

        let result = f.container.start(&CancellationToken::new()).await;
        match result {
            Err(RealmError::PartialStartFailure { failed }) => {
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].group, "World");
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert_eq!(
            f.container.group_states(),
            vec![
                ("Login".to_string(), GroupState::Running),
                ("World".to_string(), GroupState::Failed),
                ("Connect".to_string(), GroupState::Running),
            ]
        );
        assert_eq!(f.container.state(), ContainerState::Degraded);
        assert!(f.container.is_subscribed());
    }

    #[tokio::test]
    async fn test_start_skips_running_groups() {
        let f = fixture();
        let cancel = CancellationToken::new();
        f.container.start(&cancel).await.unwrap();
        drain(&f.log);

        f.container.start(&cancel).await.unwrap();
        assert!(drain(&f.log).is_empty());
        assert_eq!(f.signal.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_failure_is_reported() {
        let f = fixture();
        let cancel = CancellationToken::new();
        f.container.start(&cancel).await.unwrap();
        f.endpoints[0].fail_unbind.store(true, Ordering::SeqCst);

        let result = f.container.stop(&cancel).await;
        assert!(matches!(result, Err(RealmError::PartialStopFailure { ref failed }) if failed[0].group == "Login"));
        assert_eq!(f.container.groups()[2].state(), GroupState::Stopped);
        assert!(!f.container.is_subscribed());
    }

    #[tokio::test]
    async fn test_restart_runs_hooks_in_order() {
        let log = CallLog::default();
        let hooks = Arc::new(RecordingHooks {
            log: log.clone(),
            ..Default::default()
        });
        let f = fixture_with(hooks, log);
        let cancel = CancellationToken::new();
        f.container.start(&cancel).await.unwrap();
        drain(&f.log);

        f.container.restart(false, &cancel).await.unwrap();
        assert_eq!(
            drain(&f.log),
            vec![
                "unbind:Connect",
                "unbind:World",
                "unbind:Login",
                "before_start:false",
                "bind:Login",
                "bind:World",
                "bind:Connect",
                "start_listeners",
            ]
        );
    }

    #[tokio::test]
    async fn test_restart_twice_is_running_both_times() {
        let f = fixture();
        let cancel = CancellationToken::new();
        f.container.start(&cancel).await.unwrap();

        f.container.restart(false, &cancel).await.unwrap();
        assert_eq!(f.container.state(), ContainerState::Running);
        assert_eq!(f.signal.subscriber_count(), 1);

        f.container.restart(false, &cancel).await.unwrap();
        assert_eq!(f.container.state(), ContainerState::Running);
        assert_eq!(f.signal.subscriber_count(), 1);
        assert!(!f.container.is_restarting());
    }

    #[tokio::test]
    async fn test_reinit_signal_triggers_restart() {
        let log = CallLog::default();
        let hooks = Arc::new(RecordingHooks {
            log: log.clone(),
            ..Default::default()
        });
        let f = fixture_with(hooks, log);
        f.container.start(&CancellationToken::new()).await.unwrap();
        drain(&f.log);
        let mut events = f.container.subscribe_events();

        assert_eq!(f.signal.publish().await, 1);

        let calls = drain(&f.log);
        assert!(calls.contains(&"before_start:true".to_string()));
        assert_eq!(calls.last().map(String::as_str), Some("start_listeners"));
        assert_eq!(f.container.state(), ContainerState::Running);
        assert_eq!(f.signal.subscriber_count(), 1);

        let kinds = drain_events(&mut events);
        assert_eq!(kinds.first(), Some(&LifecycleEventKind::RestartStarted { on_reinit: true }));
        assert_eq!(kinds.last(), Some(&LifecycleEventKind::RestartCompleted { on_reinit: true }));
    }

    #[tokio::test]
    async fn test_reinit_fault_is_contained() {
        let f = fixture();
        f.container.start(&CancellationToken::new()).await.unwrap();
        let mut events = f.container.subscribe_events();
        f.endpoints[2].fail_bind.store(true, Ordering::SeqCst);

        // 不得panic，也不得把错误传回信号源
        assert_eq!(f.signal.publish().await, 1);

        let kinds = drain_events(&mut events);
        assert!(kinds
            .iter()
            .any(|kind| matches!(kind, LifecycleEventKind::RestartFaulted { reason } if reason.contains("Connect"))));
        assert_eq!(f.signal.subscriber_count(), 1);
        assert!(!f.container.is_restarting());

        // 下一次信号可以恢复
        f.endpoints[2].fail_bind.store(false, Ordering::SeqCst);
        f.signal.publish().await;
        assert_eq!(f.container.state(), ContainerState::Running);
    }

    #[tokio::test]
    async fn test_reinit_panic_is_contained() {
        let log = CallLog::default();
        let hooks = Arc::new(RecordingHooks {
            log: log.clone(),
            panic_on_reinit: AtomicBool::new(true),
            ..Default::default()
        });
        let f = fixture_with(hooks.clone(), log);
        f.container.start(&CancellationToken::new()).await.unwrap();
        let mut events = f.container.subscribe_events();

        f.signal.publish().await;

        let kinds = drain_events(&mut events);
        assert!(kinds
            .iter()
            .any(|kind| matches!(kind, LifecycleEventKind::RestartFaulted { reason } if reason.contains("exploded"))));
        assert_eq!(f.container.state(), ContainerState::Stopped);
        assert_eq!(f.signal.subscriber_count(), 1);

        hooks.panic_on_reinit.store(false, Ordering::SeqCst);
        f.signal.publish().await;
        assert_eq!(f.container.state(), ContainerState::Running);
    }

    #[tokio::test]
    async fn test_overlapping_restart_is_rejected() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let log = CallLog::default();
        let hooks = Arc::new(RecordingHooks {
            log: log.clone(),
            gate: Some((entered.clone(), release.clone())),
            ..Default::default()
        });
        let f = fixture_with(hooks, log);

        let container = f.container.clone();
        let first = tokio::spawn(async move { container.restart(false, &CancellationToken::new()).await });

        entered.notified().await;
        assert!(f.container.is_restarting());
        let second = f.container.restart(true, &CancellationToken::new()).await;
        assert!(matches!(second, Err(RealmError::AlreadyRestarting { .. })));

        // 信号触发的重启同样被合并，不会排队
        f.container.on_backing_store_reinitialized().await;

        release.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(f.container.state(), ContainerState::Running);
        assert_eq!(
            drain(&f.log).iter().filter(|call| call.starts_with("before_start")).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_cancelled_start_keeps_transitioned_groups() {
        let log = CallLog::default();
        let cancel = CancellationToken::new();
        let signal = ReinitSignal::new();
        let world = Arc::new(RecordingEndpoints {
            name: "World".to_string(),
            log: log.clone(),
            fail_bind: AtomicBool::new(false),
            fail_unbind: AtomicBool::new(false),
            cancel_after_bind: Some(cancel.clone()),
        });
        let container = LifecycleContainer::builder("game", signal.clone())
            .group(ListenerGroup::new("Login", RecordingEndpoints::new("Login", &log)))
            .group(ListenerGroup::new("World", world))
            .group(ListenerGroup::new("Connect", RecordingEndpoints::new("Connect", &log)))
            .build()
            .unwrap();

        let result = container.start(&cancel).await;
        assert!(matches!(result, Err(RealmError::Cancelled { .. })));
        assert_eq!(
            container.group_states(),
            vec![
                ("Login".to_string(), GroupState::Running),
                ("World".to_string(), GroupState::Running),
                ("Connect".to_string(), GroupState::Stopped),
            ]
        );
        assert_eq!(container.state(), ContainerState::Transitioning);
        assert!(!container.is_subscribed());
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_pre_cancelled_stop_releases_subscription_only() {
        let f = fixture();
        f.container.start(&CancellationToken::new()).await.unwrap();
        drain(&f.log);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = f.container.stop(&cancel).await;
        assert!(matches!(result, Err(RealmError::Cancelled { .. })));
        assert!(drain(&f.log).is_empty());
        assert!(!f.container.is_subscribed());
        assert_eq!(f.container.state(), ContainerState::Running);
    }

    async fn let_queued_tasks_run() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_reinit_queued_behind_stop_does_not_restart() {
        let f = fixture();
        f.container.start(&CancellationToken::new()).await.unwrap();
        drain(&f.log);

        // 持有转换锁，让 stop 和信号处理依次排队
        let held = f.container.transitions.lock().await;

        let container = f.container.clone();
        let stop = tokio::spawn(async move { container.stop(&CancellationToken::new()).await });
        let_queued_tasks_run().await;

        let signal = f.signal.clone();
        let publish = tokio::spawn(async move { signal.publish().await });
        let_queued_tasks_run().await;
        assert!(f.container.is_restarting());

        drop(held);
        stop.await.unwrap().unwrap();
        assert_eq!(publish.await.unwrap(), 1);

        assert_eq!(f.container.state(), ContainerState::Stopped);
        assert!(!f.container.is_subscribed());
        assert!(!f.container.is_restarting());
        assert_eq!(f.signal.subscriber_count(), 0);
        assert_eq!(drain(&f.log), vec!["unbind:Connect", "unbind:World", "unbind:Login"]);
    }

    #[tokio::test]
    async fn test_reinit_after_stop_is_ignored() {
        let f = fixture();
        let cancel = CancellationToken::new();
        f.container.start(&cancel).await.unwrap();
        f.container.stop(&cancel).await.unwrap();
        drain(&f.log);

        assert_eq!(f.signal.publish().await, 0);
        f.container.on_backing_store_reinitialized().await;

        assert_eq!(f.container.state(), ContainerState::Stopped);
        assert!(!f.container.is_subscribed());
        assert!(drain(&f.log).is_empty());
    }

    #[tokio::test]
    async fn test_drop_releases_subscription() {
        let f = fixture();
        f.container.start(&CancellationToken::new()).await.unwrap();
        assert_eq!(f.signal.subscriber_count(), 1);

        drop(f.container);
        assert_eq!(f.signal.subscriber_count(), 0);
        assert_eq!(f.signal.publish().await, 0);
    }

    #[test]
    fn test_builder_rejects_duplicate_groups() {
        let log = CallLog::default();
        let result = LifecycleContainer::builder("game", ReinitSignal::new())
            .group(ListenerGroup::new("World", RecordingEndpoints::new("World", &log)))
            .group(ListenerGroup::new("World", RecordingEndpoints::new("World", &log)))
            .build();
        assert!(matches!(result, Err(RealmError::Config { .. })));
    }

    #[tokio::test]
    async fn test_empty_container() {
        let container = LifecycleContainer::builder("empty", ReinitSignal::new()).build().unwrap();
        let cancel = CancellationToken::new();
        assert_eq!(container.state(), ContainerState::Stopped);
        container.start(&cancel).await.unwrap();
        assert_eq!(container.state(), ContainerState::Running);
        container.stop(&cancel).await.unwrap();
        assert_eq!(container.state(), ContainerState::Stopped);
    }

    #[tokio::test]
    async fn test_mocked_endpoints_follow_declared_order() {
        let mut sequence = Sequence::new();
        let mut first = MockListenerEndpoints::new();
        let mut second = MockListenerEndpoints::new();

        first.expect_bind_all().times(1).in_sequence(&mut sequence).returning(|_| Ok(()));
        second.expect_bind_all().times(1).in_sequence(&mut sequence).returning(|_| Ok(()));
        second.expect_unbind_all().times(1).in_sequence(&mut sequence).returning(|_| Ok(()));
        first.expect_unbind_all().times(1).in_sequence(&mut sequence).returning(|_| Ok(()));

        let container = LifecycleContainer::builder("mocked", ReinitSignal::new())
            .group(ListenerGroup::new("first", Arc::new(first)))
            .group(ListenerGroup::new("second", Arc::new(second)))
            .build()
            .unwrap();

        let cancel = CancellationToken::new();
        container.start(&cancel).await.unwrap();
        container.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_events_are_published_for_transitions() {
        let f = fixture();
        let mut events = f.container.subscribe_events();
        f.container.start(&CancellationToken::new()).await.unwrap();

        let kinds = drain_events(&mut events);
        assert_eq!(kinds[0], LifecycleEventKind::GroupStarting { group: "Login".to_string() });
        assert_eq!(kinds[1], LifecycleEventKind::GroupRunning { group: "Login".to_string() });
        assert_eq!(kinds.last(), Some(&LifecycleEventKind::SubscriptionInstalled));
        let running = kinds
            .iter()
            .filter(|kind| matches!(kind, LifecycleEventKind::GroupRunning { .. }))
            .count();
        assert_eq!(running, 3);
    }
}

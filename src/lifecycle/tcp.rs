//! 基于TCP的监听端点
//!
//! 一个监听组对应一组地址；绑定时先绑定全部地址再启动接收循环，任一地址失败则整组不生效。

use super::group::ListenerEndpoints;
use crate::{RealmError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 连接处理器
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// 处理一个已接受的连接
    ///
    /// 连接令牌在端点解绑时被取消，长时间运行的处理器应当监听它。
    async fn handle(&self, stream: TcpStream, peer: SocketAddr, shutdown: CancellationToken);
}

struct BoundListeners {
    shutdown: CancellationToken,
    local_addrs: Vec<SocketAddr>,
    accept_loops: Vec<JoinHandle<()>>,
}

/// TCP监听端点
pub struct TcpEndpoints {
    addresses: Vec<SocketAddr>,
    handler: Arc<dyn ConnectionHandler>,
    bound: Mutex<Option<BoundListeners>>,
    connections: Arc<DashMap<u64, CancellationToken>>,
    next_connection: Arc<AtomicU64>,
}

impl TcpEndpoints {
    pub fn new(addresses: Vec<SocketAddr>, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            addresses,
            handler,
            bound: Mutex::new(None),
            connections: Arc::new(DashMap::new()),
            next_connection: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 配置的地址
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    /// 实际绑定的地址，未绑定时为空
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.bound
            .lock()
            .as_ref()
            .map(|bound| bound.local_addrs.clone())
            .unwrap_or_default()
    }

    pub fn is_bound(&self) -> bool {
        self.bound.lock().is_some()
    }

    /// 活跃连接数
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    fn spawn_accept_loop(&self, listener: TcpListener, shutdown: CancellationToken) -> JoinHandle<()> {
        let handler = self.handler.clone();
        let connections = self.connections.clone();
        let next_connection = self.next_connection.clone();

        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };

                let (stream, peer) = match accepted {
                    Ok(connection) => connection,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let id = next_connection.fetch_add(1, Ordering::Relaxed);
                let token = shutdown.child_token();
                connections.insert(id, token.clone());
                debug!("Accepted connection {} from {}", id, peer);

                let handler = handler.clone();
                let connections = connections.clone();
                tokio::spawn(async move {
                    handler.handle(stream, peer, token).await;
                    connections.remove(&id);
                    debug!("Connection {} from {} closed", id, peer);
                });
            }
        })
    }
}

#[async_trait]
impl ListenerEndpoints for TcpEndpoints {
    async fn bind_all(&self, cancel: &CancellationToken) -> Result<()> {
        if self.is_bound() {
            return Ok(());
        }

        let mut listeners = Vec::with_capacity(self.addresses.len());
        for address in &self.addresses {
            if cancel.is_cancelled() {
                return Err(RealmError::cancelled("bind"));
            }
            let listener = TcpListener::bind(address)
                .await
                .map_err(|e| RealmError::endpoint(&format!("Failed to bind {}: {}", address, e)))?;
            listeners.push(listener);
        }

        let shutdown = CancellationToken::new();
        let mut local_addrs = Vec::with_capacity(listeners.len());
        let mut accept_loops = Vec::with_capacity(listeners.len());
        for listener in listeners {
            let local_addr = listener.local_addr()?;
            info!("Listening on {}", local_addr);
            local_addrs.push(local_addr);
            accept_loops.push(self.spawn_accept_loop(listener, shutdown.clone()));
        }

        *self.bound.lock() = Some(BoundListeners {
            shutdown,
            local_addrs,
            accept_loops,
        });
        Ok(())
    }

    async fn unbind_all(&self, _cancel: &CancellationToken) -> Result<()> {
        let bound = self.bound.lock().take();
        let Some(bound) = bound else {
            return Ok(());
        };

        bound.shutdown.cancel();
        for accept_loop in bound.accept_loops {
            if let Err(e) = accept_loop.await {
                warn!("Accept loop terminated abnormally: {}", e);
            }
        }

        info!("Stopped listening on {:?}", bound.local_addrs);
        Ok(())
    }
}

impl std::fmt::Debug for TcpEndpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpEndpoints")
            .field("addresses", &self.addresses)
            .field("bound", &self.is_bound())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

//! 远程会话客户端
//!
//! 与原生总线 peer 之间的调用都是跨边界的同步调用，可能独立于本地状态失败，
//! 因此 [`RemoteSession`] 把每个调用建模为显式的 `Result`。
//! [`SessionClient`] 在此之上把失败降级为哨兵值（`false` / `None`）并记录日志，
//! 只有初始化失败会向上传播，调用方必须据此终止自身。

pub mod ipc_session;
pub mod peer;

pub use ipc_session::IpcSession;
pub use peer::{PeerList, PeerRecord};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// 发现通知：某个远端服务被找到
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundPeer {
    pub name: String,
    pub address: String,
    pub guid: String,
}

/// 会话错误
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session initialization failed with status {0}")]
    InitFailed(i32),

    #[error("Session not initialized")]
    NotInitialized,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote call failed: {0}")]
    Remote(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Transport(e.to_string())
    }
}

/// 原生总线 peer 的远程调用接口
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// 初始化会话，之后发现通知通过 `found` 异步送达
    ///
    /// 必须在其它调用之前恰好调用一次。
    async fn initialize(&self, found: mpsc::Sender<FoundPeer>) -> Result<(), SessionError>;

    async fn connect(&self, address: &str) -> Result<(), SessionError>;

    async fn disconnect(&self, address: &str) -> Result<(), SessionError>;

    /// 调用远端 Ping 方法，返回应答字符串
    async fn ping(&self, target: &str, message: &str) -> Result<String, SessionError>;

    /// 释放会话资源
    async fn destroy(&self);
}

/// 服务名规则：只接受带前缀的 well-known name
#[derive(Debug, Clone)]
pub struct ServiceNaming {
    prefix: String,
}

impl ServiceNaming {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 把广播名拆成 (peer 名称, 会话地址)；不匹配前缀时返回 `None`
    pub fn split(&self, advertised: &str) -> Option<(String, String)> {
        let suffix = advertised.strip_prefix(&self.prefix)?;
        if suffix.is_empty() {
            return None;
        }
        Some((suffix.to_string(), advertised.to_string()))
    }

    /// peer 名称还原为完整 well-known name
    pub fn well_known(&self, name: &str) -> String {
        if name.starts_with(&self.prefix) {
            name.to_string()
        } else {
            format!("{}{}", self.prefix, name)
        }
    }
}

/// 把远程调用失败降级为哨兵值的客户端
#[derive(Clone)]
pub struct SessionClient {
    session: Arc<dyn RemoteSession>,
}

impl SessionClient {
    pub fn new(session: Arc<dyn RemoteSession>) -> Self {
        Self { session }
    }

    /// 初始化失败对调用方是致命的，因此这里不降级
    pub async fn initialize(&self, found: mpsc::Sender<FoundPeer>) -> Result<(), SessionError> {
        match self.session.initialize(found).await {
            Ok(()) => {
                info!("Session initialized");
                Ok(())
            }
            Err(e) => {
                error!("Session initialization failed: {e}");
                Err(e)
            }
        }
    }

    pub async fn connect(&self, address: &str) -> bool {
        debug!("Joining session with {address}");
        match self.session.connect(address).await {
            Ok(()) => {
                info!("Joined session with {address}");
                true
            }
            Err(e) => {
                warn!("Connect to {address} failed: {e}");
                false
            }
        }
    }

    pub async fn disconnect(&self, address: &str) -> bool {
        match self.session.disconnect(address).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Disconnect from {address} failed: {e}");
                false
            }
        }
    }

    pub async fn ping(&self, target: &str, message: &str) -> Option<String> {
        match self.session.ping(target, message).await {
            Ok(reply) => {
                info!("Ping reply from {target}: \"{reply}\"");
                Some(reply)
            }
            Err(e) => {
                warn!("Ping to {target} failed: {e}");
                None
            }
        }
    }

    pub async fn destroy(&self) {
        self.session.destroy().await;
        debug!("Session destroyed");
    }
}

//! 交互界面状态 actor
//!
//! 所有可见状态（peer 列表）只由一个消费任务持有和修改。
//! 发现通知在独立的投递任务中到达，被转成消息放入同一个队列，
//! 因此同一 peer 的通知保持到达顺序，不同 peer 之间不保证顺序。
//!
//! 状态变化通过 [`SurfaceUpdate`] 广播给观察者。

use crate::session::{FoundPeer, PeerList, PeerRecord, RemoteSession, SessionClient, SessionError};
use futures_util::Stream;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

const COMMAND_QUEUE: usize = 64;
const UPDATE_QUEUE: usize = 64;

/// 界面状态变化
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceUpdate {
    PeerAdded(PeerRecord),
    PeerUpdated(PeerRecord),
    /// 连接失败的 peer 会被移除
    PeerRemoved(PeerRecord),
    PingReply {
        peer: String,
        reply: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Peer not connected: {0}")]
    NotConnected(String),

    #[error("Surface has stopped")]
    Stopped,
}

enum Command {
    PeerFound(FoundPeer),
    Connect {
        address: String,
        reply: oneshot::Sender<Result<bool, SurfaceError>>,
    },
    Disconnect {
        address: String,
        reply: oneshot::Sender<Result<bool, SurfaceError>>,
    },
    Ping {
        address: String,
        message: String,
        reply: oneshot::Sender<Result<Option<String>, SurfaceError>>,
    },
    PingConnected {
        message: String,
        reply: oneshot::Sender<Vec<(String, Option<String>)>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<PeerRecord>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// actor 持有的状态
struct SurfaceActor {
    client: SessionClient,
    peers: PeerList,
    updates: broadcast::Sender<SurfaceUpdate>,
}

impl SurfaceActor {
    fn publish(&self, update: SurfaceUpdate) {
        // 没有观察者时发送失败是正常的
        let _ = self.updates.send(update);
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::PeerFound(found) => self.on_found(found),
                Command::Connect { address, reply } => {
                    let _ = reply.send(self.on_connect(&address).await);
                }
                Command::Disconnect { address, reply } => {
                    let _ = reply.send(self.on_disconnect(&address).await);
                }
                Command::Ping {
                    address,
                    message,
                    reply,
                } => {
                    let _ = reply.send(self.on_ping(&address, &message).await);
                }
                Command::PingConnected { message, reply } => {
                    let _ = reply.send(self.on_ping_connected(&message).await);
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.peers.to_vec());
                }
                Command::Shutdown { reply } => {
                    self.client.destroy().await;
                    let _ = reply.send(());
                    return;
                }
            }
        }

        // 所有句柄都已释放
        debug!("Surface handles dropped, destroying session");
        self.client.destroy().await;
    }

    fn on_found(&mut self, found: FoundPeer) {
        info!("Found name {} at {}", found.name, found.address);
        let (record, is_new) = self.peers.upsert(found);
        if is_new {
            self.publish(SurfaceUpdate::PeerAdded(record));
        } else {
            self.publish(SurfaceUpdate::PeerUpdated(record));
        }
    }

    async fn on_connect(&mut self, address: &str) -> Result<bool, SurfaceError> {
        let peer = self
            .peers
            .get(address)
            .ok_or_else(|| SurfaceError::UnknownPeer(address.to_string()))?;
        if peer.connected {
            return Ok(true);
        }

        if self.client.connect(address).await {
            if let Some(record) = self.peers.set_connected(address, true) {
                self.publish(SurfaceUpdate::PeerUpdated(record));
            }
            Ok(true)
        } else {
            if let Some(record) = self.peers.remove(address) {
                warn!("Removing peer {} after failed connect", record.name);
                self.publish(SurfaceUpdate::PeerRemoved(record));
            }
            Ok(false)
        }
    }

    async fn on_disconnect(&mut self, address: &str) -> Result<bool, SurfaceError> {
        if self.peers.get(address).is_none() {
            return Err(SurfaceError::UnknownPeer(address.to_string()));
        }

        let result = self.client.disconnect(address).await;
        // 无论远端结果如何，本地都视为已断开
        if let Some(record) = self.peers.set_connected(address, false) {
            self.publish(SurfaceUpdate::PeerUpdated(record));
        }
        Ok(result)
    }

    async fn on_ping(
        &mut self,
        address: &str,
        message: &str,
    ) -> Result<Option<String>, SurfaceError> {
        let peer = self
            .peers
            .get(address)
            .ok_or_else(|| SurfaceError::UnknownPeer(address.to_string()))?;
        if !peer.can_ping() {
            return Err(SurfaceError::NotConnected(peer.name.clone()));
        }

        let name = peer.name.clone();
        let reply = self.client.ping(&name, message).await;
        self.publish(SurfaceUpdate::PingReply {
            peer: name,
            reply: reply.clone(),
        });
        Ok(reply)
    }

    async fn on_ping_connected(&mut self, message: &str) -> Vec<(String, Option<String>)> {
        let targets: Vec<String> = self.peers.connected().map(|p| p.name.clone()).collect();
        let mut replies = Vec::with_capacity(targets.len());
        for name in targets {
            let reply = self.client.ping(&name, message).await;
            self.publish(SurfaceUpdate::PingReply {
                peer: name.clone(),
                reply: reply.clone(),
            });
            replies.push((name, reply));
        }
        replies
    }
}

/// 界面 actor 的入口
pub struct Surface;

impl Surface {
    /// 初始化会话并启动 actor
    ///
    /// 初始化失败时返回错误，调用方应当终止自身。
    pub async fn start(session: Arc<dyn RemoteSession>) -> Result<SurfaceHandle, SessionError> {
        let client = SessionClient::new(session);
        let (found_tx, mut found_rx) = mpsc::channel::<FoundPeer>(COMMAND_QUEUE);
        client.initialize(found_tx).await?;

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let (updates, _) = broadcast::channel(UPDATE_QUEUE);

        // 投递任务只持有弱引用，句柄全部释放后 actor 可以结束
        let weak = tx.downgrade();
        tokio::spawn(async move {
            while let Some(found) = found_rx.recv().await {
                let Some(tx) = weak.upgrade() else { break };
                if tx.send(Command::PeerFound(found)).await.is_err() {
                    break;
                }
            }
        });

        let actor = SurfaceActor {
            client,
            peers: PeerList::new(),
            updates: updates.clone(),
        };
        let task = tokio::spawn(actor.run(rx));

        Ok(SurfaceHandle {
            tx,
            updates,
            task: Arc::new(std::sync::Mutex::new(Some(task))),
        })
    }
}

/// 与 actor 交互的句柄
#[derive(Clone)]
pub struct SurfaceHandle {
    tx: mpsc::Sender<Command>,
    updates: broadcast::Sender<SurfaceUpdate>,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl SurfaceHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SurfaceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SurfaceError::Stopped)?;
        rx.await.map_err(|_| SurfaceError::Stopped)
    }

    /// 连接 peer；失败时该 peer 从列表中移除并返回 `false`
    pub async fn connect(&self, address: &str) -> Result<bool, SurfaceError> {
        let address = address.to_string();
        self.request(|reply| Command::Connect { address, reply })
            .await?
    }

    pub async fn disconnect(&self, address: &str) -> Result<bool, SurfaceError> {
        let address = address.to_string();
        self.request(|reply| Command::Disconnect { address, reply })
            .await?
    }

    /// ping 单个已连接的 peer；远端失败时返回 `Ok(None)`
    pub async fn ping(&self, address: &str, message: &str) -> Result<Option<String>, SurfaceError> {
        let address = address.to_string();
        let message = message.to_string();
        self.request(|reply| Command::Ping {
            address,
            message,
            reply,
        })
        .await?
    }

    /// ping 所有已连接的 peer
    pub async fn ping_connected(
        &self,
        message: &str,
    ) -> Result<Vec<(String, Option<String>)>, SurfaceError> {
        let message = message.to_string();
        self.request(|reply| Command::PingConnected { message, reply })
            .await
    }

    pub async fn peers(&self) -> Result<Vec<PeerRecord>, SurfaceError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SurfaceUpdate> {
        self.updates.subscribe()
    }

    /// 以 Stream 形式订阅状态变化，跳过因滞后丢失的消息
    pub fn updates(&self) -> impl Stream<Item = SurfaceUpdate> + Send + 'static {
        BroadcastStream::new(self.updates.subscribe()).filter_map(Result::ok)
    }

    /// 销毁会话并等待 actor 结束
    pub async fn shutdown(&self) {
        if self.request(|reply| Command::Shutdown { reply }).await.is_err() {
            debug!("Surface already stopped");
        }
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

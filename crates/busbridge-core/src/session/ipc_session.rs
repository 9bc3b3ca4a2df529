//! 基于 Unix Domain Socket 的会话实现
//!
//! 使用两条连接：
//! 1. 调用连接：create/connect/disconnect/ping/destroy 的请求-应答
//! 2. 订阅连接：`subscribe` 之后只接收 `found` 通知，由独立任务转发

use crate::config::Settings;
use crate::ipc::{SessionRequest, SessionResponse, read_message, write_message};
use crate::session::{FoundPeer, RemoteSession, ServiceNaming, SessionError};
use async_trait::async_trait;
use log::{debug, info, trace, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(path: &Path) -> Result<Self, SessionError> {
        let stream = UnixStream::connect(path).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn round_trip(
        &mut self,
        request: &SessionRequest,
    ) -> Result<SessionResponse, SessionError> {
        write_message(&mut self.writer, request)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        match read_message(&mut self.reader).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(SessionError::Transport("peer closed connection".into())),
            Err(e) => Err(SessionError::Protocol(e.to_string())),
        }
    }
}

pub struct IpcSession {
    socket: PathBuf,
    client_name: String,
    naming: ServiceNaming,
    connect_timeout: Duration,
    ping_timeout: Duration,
    conn: Mutex<Option<Connection>>,
    subscriber: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl IpcSession {
    pub fn new(socket: impl Into<PathBuf>, naming: ServiceNaming) -> Self {
        let defaults = Settings::default();
        let connect_timeout = defaults.connect_timeout();
        let ping_timeout = defaults.ping_timeout();
        Self {
            socket: socket.into(),
            client_name: defaults.client_name,
            naming,
            connect_timeout,
            ping_timeout,
            conn: Mutex::new(None),
            subscriber: std::sync::Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.session_socket.clone(),
            ServiceNaming::new(settings.name_prefix.clone()),
        )
        .with_client_name(settings.client_name.clone())
        .with_timeouts(settings.connect_timeout(), settings.ping_timeout())
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, ping: Duration) -> Self {
        self.connect_timeout = connect;
        self.ping_timeout = ping;
        self
    }

    async fn call(
        &self,
        request: SessionRequest,
        timeout: Duration,
    ) -> Result<SessionResponse, SessionError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(SessionError::NotInitialized)?;

        trace!("-> {request:?}");
        let response = match time::timeout(timeout, conn.round_trip(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                // 超时后连接里可能残留迟到的应答，丢弃连接
                *guard = None;
                return Err(SessionError::Timeout(timeout));
            }
        };
        trace!("<- {response:?}");

        match response {
            SessionResponse::Error { message } => Err(SessionError::Remote(message)),
            other => Ok(other),
        }
    }

    /// ok 或 status 0 视为成功
    fn expect_ok(response: SessionResponse) -> Result<(), SessionError> {
        match response {
            SessionResponse::Ok | SessionResponse::Status { code: 0 } => Ok(()),
            SessionResponse::Status { code } => {
                Err(SessionError::Remote(format!("status {code}")))
            }
            other => Err(SessionError::Protocol(format!(
                "unexpected response: {other:?}"
            ))),
        }
    }

    async fn subscribe(&self, found: mpsc::Sender<FoundPeer>) -> Result<(), SessionError> {
        let mut conn = Connection::open(&self.socket).await?;
        let response = time::timeout(
            self.connect_timeout,
            conn.round_trip(&SessionRequest::Subscribe),
        )
        .await
        .map_err(|_| SessionError::Timeout(self.connect_timeout))??;
        Self::expect_ok(response)?;

        let naming = self.naming.clone();
        let handle = tokio::spawn(async move {
            forward_found(conn, naming, found).await;
        });

        if let Ok(mut slot) = self.subscriber.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
        Ok(())
    }
}

/// 在独立任务中读取发现通知并转发
///
/// 持有整个连接，写端保持打开，订阅才不会被对端视为结束。
async fn forward_found(
    mut conn: Connection,
    naming: ServiceNaming,
    found: mpsc::Sender<FoundPeer>,
) {
    loop {
        let message: SessionResponse = match read_message(&mut conn.reader).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("Discovery channel closed by peer");
                break;
            }
            Err(e) if e.downcast_ref::<serde_json::Error>().is_some() => {
                warn!("Malformed discovery notification: {e}");
                continue;
            }
            Err(e) => {
                warn!("Discovery channel failed: {e}");
                break;
            }
        };

        let (advertised, guid) = match message {
            SessionResponse::Found { name, guid, .. } => (name, guid),
            other => {
                debug!("Ignoring non-discovery message on subscription: {other:?}");
                continue;
            }
        };

        let Some((name, address)) = naming.split(&advertised) else {
            trace!("Ignoring advertised name without prefix: {advertised}");
            continue;
        };

        debug!("Found name {name} at {address}");
        if found
            .send(FoundPeer {
                name,
                address,
                guid,
            })
            .await
            .is_err()
        {
            debug!("Discovery receiver dropped, stop forwarding");
            break;
        }
    }
}

#[async_trait]
impl RemoteSession for IpcSession {
    async fn initialize(&self, found: mpsc::Sender<FoundPeer>) -> Result<(), SessionError> {
        let mut conn = Connection::open(&self.socket)
            .await
            .inspect_err(|e| warn!("Cannot reach session peer at {:?}: {e}", self.socket))?;

        let create = SessionRequest::Create {
            client_name: self.client_name.clone(),
        };
        let response = time::timeout(self.connect_timeout, conn.round_trip(&create))
            .await
            .map_err(|_| SessionError::Timeout(self.connect_timeout))??;

        match response {
            SessionResponse::Ok | SessionResponse::Status { code: 0 } => {}
            SessionResponse::Status { code } => return Err(SessionError::InitFailed(code)),
            SessionResponse::Error { message } => return Err(SessionError::Remote(message)),
            other => {
                return Err(SessionError::Protocol(format!(
                    "unexpected response to create: {other:?}"
                )));
            }
        }

        *self.conn.lock().await = Some(conn);
        if let Err(e) = self.subscribe(found).await {
            // 订阅失败时撤销已创建的会话，保持未初始化
            warn!("Discovery subscription failed: {e}");
            self.destroy().await;
            return Err(e);
        }
        info!(
            "Session created as '{}', looking for names with prefix {}",
            self.client_name,
            self.naming.prefix()
        );
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<(), SessionError> {
        let response = self
            .call(
                SessionRequest::Connect {
                    address: address.to_string(),
                },
                self.connect_timeout,
            )
            .await?;
        Self::expect_ok(response)
    }

    async fn disconnect(&self, address: &str) -> Result<(), SessionError> {
        let response = self
            .call(
                SessionRequest::Disconnect {
                    address: address.to_string(),
                },
                self.connect_timeout,
            )
            .await?;
        Self::expect_ok(response)
    }

    async fn ping(&self, target: &str, message: &str) -> Result<String, SessionError> {
        let target = self.naming.well_known(target);
        let response = self
            .call(
                SessionRequest::Ping {
                    target,
                    message: message.to_string(),
                },
                self.ping_timeout,
            )
            .await?;
        match response {
            SessionResponse::Reply { message } => Ok(message),
            other => Err(SessionError::Protocol(format!(
                "unexpected response to ping: {other:?}"
            ))),
        }
    }

    async fn destroy(&self) {
        if let Some(mut conn) = self.conn.lock().await.take() {
            if let Err(e) = write_message(&mut conn.writer, &SessionRequest::Destroy).await {
                debug!("Destroy notification not delivered: {e}");
            }
        }
        if let Ok(mut slot) = self.subscriber.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::net::UnixListener;

    const PREFIX: &str = "org.example.simple.";

    fn temp_socket() -> PathBuf {
        std::env::temp_dir().join(format!("busbridge-session-{}.sock", uuid::Uuid::new_v4()))
    }

    /// 假的总线 peer：create 返回 `create_code`，kitchen 可连接，ping 回显
    #[derive(Clone, Default)]
    struct FakePeer {
        create_code: i32,
        refuse_subscribe: bool,
        destroyed: Arc<AtomicBool>,
    }

    async fn serve_fake_peer(listener: UnixListener, peer: FakePeer) {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let peer = peer.clone();
            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                let mut reader = BufReader::new(reader);
                while let Ok(Some(request)) = read_message::<_, SessionRequest>(&mut reader).await
                {
                    let response = match request {
                        SessionRequest::Create { .. } => SessionResponse::Status {
                            code: peer.create_code,
                        },
                        SessionRequest::Subscribe if peer.refuse_subscribe => {
                            SessionResponse::Error {
                                message: "subscriptions disabled".to_string(),
                            }
                        }
                        SessionRequest::Subscribe => {
                            write_message(&mut writer, &SessionResponse::Ok).await.unwrap();
                            for name in ["org.other.thing", "org.example.simple.kitchen"] {
                                let found = SessionResponse::Found {
                                    name: name.to_string(),
                                    address: String::new(),
                                    guid: "g1".to_string(),
                                };
                                write_message(&mut writer, &found).await.unwrap();
                            }
                            continue;
                        }
                        SessionRequest::Connect { address } if address.ends_with("kitchen") => {
                            SessionResponse::Status { code: 0 }
                        }
                        SessionRequest::Connect { .. } => SessionResponse::Status { code: 17 },
                        SessionRequest::Disconnect { .. } => SessionResponse::Ok,
                        SessionRequest::Ping { target, message } => SessionResponse::Reply {
                            message: format!("{target}:{message}"),
                        },
                        SessionRequest::Destroy => {
                            peer.destroyed.store(true, Ordering::SeqCst);
                            return;
                        }
                    };
                    write_message(&mut writer, &response).await.unwrap();
                }
            });
        }
    }

    #[test]
    fn test_new_uses_default_settings() {
        let defaults = Settings::default();
        let session = IpcSession::new(temp_socket(), ServiceNaming::new(PREFIX));
        assert_eq!(session.client_name, defaults.client_name);
        assert_eq!(session.connect_timeout, defaults.connect_timeout());
        assert_eq!(session.ping_timeout, defaults.ping_timeout());
    }

    #[tokio::test]
    async fn test_failed_subscription_rolls_back_initialize() {
        let path = temp_socket();
        let listener = UnixListener::bind(&path).unwrap();
        let peer = FakePeer {
            refuse_subscribe: true,
            ..Default::default()
        };
        tokio::spawn(serve_fake_peer(listener, peer.clone()));

        let session = IpcSession::new(&path, ServiceNaming::new(PREFIX));
        let (tx, _rx) = mpsc::channel(4);
        assert!(session.initialize(tx).await.is_err());
        assert!(matches!(
            session.connect("org.example.simple.kitchen").await,
            Err(SessionError::NotInitialized)
        ));

        // 已创建的会话被通知销毁
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !peer.destroyed.load(Ordering::SeqCst) {
            assert!(std::time::Instant::now() < deadline, "peer never saw destroy");
            time::sleep(Duration::from_millis(10)).await;
        }
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_calls_before_initialize_fail() {
        let session = IpcSession::new(temp_socket(), ServiceNaming::new(PREFIX));
        assert!(matches!(
            session.connect("x").await,
            Err(SessionError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_initialize_without_peer_is_transport_error() {
        let session = IpcSession::new(temp_socket(), ServiceNaming::new(PREFIX));
        let (tx, _rx) = mpsc::channel(4);
        assert!(matches!(
            session.initialize(tx).await,
            Err(SessionError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_nonzero_create_status_is_init_failure() {
        let path = temp_socket();
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(serve_fake_peer(
            listener,
            FakePeer {
                create_code: 5,
                ..Default::default()
            },
        ));

        let session = IpcSession::new(&path, ServiceNaming::new(PREFIX));
        let (tx, _rx) = mpsc::channel(4);
        assert!(matches!(
            session.initialize(tx).await,
            Err(SessionError::InitFailed(5))
        ));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_full_session_against_fake_peer() {
        let path = temp_socket();
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(serve_fake_peer(listener, FakePeer::default()));

        let session = IpcSession::new(&path, ServiceNaming::new(PREFIX));
        let (tx, mut rx) = mpsc::channel(4);
        session.initialize(tx).await.unwrap();

        // 不带前缀的名称被过滤
        let found = time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.name, "kitchen");
        assert_eq!(found.address, "org.example.simple.kitchen");
        assert_eq!(found.guid, "g1");

        session.connect(&found.address).await.unwrap();
        assert!(matches!(
            session.connect("org.example.simple.garage").await,
            Err(SessionError::Remote(_))
        ));

        let reply = session.ping("kitchen", "hello").await.unwrap();
        assert_eq!(reply, "org.example.simple.kitchen:hello");

        session.disconnect(&found.address).await.unwrap();
        session.destroy().await;
        assert!(matches!(
            session.ping("kitchen", "again").await,
            Err(SessionError::NotInitialized)
        ));
        let _ = std::fs::remove_file(path);
    }
}

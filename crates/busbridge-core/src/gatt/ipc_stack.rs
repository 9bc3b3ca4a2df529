//! 通过 Unix Domain Socket 访问蓝牙协议栈桥
//!
//! 每次调用单独建立一条连接，发送一条请求并读取一条应答。

use crate::config::Settings;
use crate::gatt::{AttributeStack, DiscoverySink, StackError};
use crate::ipc::{GattRequest, GattResponse, read_message, write_message};
use async_trait::async_trait;
use log::trace;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::time;

pub struct IpcAttributeStack {
    socket: PathBuf,
    call_timeout: Duration,
}

impl IpcAttributeStack {
    pub fn new(socket: impl Into<PathBuf>, call_timeout: Duration) -> Self {
        Self {
            socket: socket.into(),
            call_timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.gatt_socket.clone(), settings.connect_timeout())
    }

    async fn round_trip(&self, request: &GattRequest) -> Result<GattResponse, StackError> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|e| StackError::Unavailable(format!("{:?}: {e}", self.socket)))?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        write_message(&mut writer, request)
            .await
            .map_err(|e| StackError::Unavailable(e.to_string()))?;
        match read_message(&mut reader).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(StackError::Unavailable("stack bridge closed connection".into())),
            Err(e) => Err(StackError::Remote(e.to_string())),
        }
    }

    async fn call(&self, request: GattRequest) -> Result<GattResponse, StackError> {
        trace!("-> {request:?}");
        let response = time::timeout(self.call_timeout, self.round_trip(&request))
            .await
            .map_err(|_| StackError::Unavailable(format!("no reply in {:?}", self.call_timeout)))??;
        trace!("<- {response:?}");

        match response {
            GattResponse::Error { message } => Err(StackError::Remote(message)),
            other => Ok(other),
        }
    }

    async fn call_ok(&self, request: GattRequest) -> Result<bool, StackError> {
        match self.call(request).await? {
            GattResponse::Ok => Ok(true),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: GattResponse) -> StackError {
    StackError::Remote(format!("unexpected response: {response:?}"))
}

#[async_trait]
impl AttributeStack for IpcAttributeStack {
    async fn service_name(&self, service_path: &str) -> Result<String, StackError> {
        let request = GattRequest::ServiceName {
            path: service_path.to_string(),
        };
        match self.call(request).await? {
            GattResponse::Name { name } => Ok(name),
            other => Err(unexpected(other)),
        }
    }

    async fn discover_characteristics(
        &self,
        service_path: &str,
        sink: DiscoverySink,
    ) -> Result<(), StackError> {
        let request = GattRequest::Discover {
            path: service_path.to_string(),
        };
        match self.call(request).await? {
            GattResponse::Characteristics { characteristics } => {
                sink.complete(characteristics);
                Ok(())
            }
            other => Err(unexpected(other)),
        }
    }

    async fn register_watcher(&self, service_path: &str) -> Result<bool, StackError> {
        self.call_ok(GattRequest::RegisterWatcher {
            path: service_path.to_string(),
        })
        .await
    }

    async fn deregister_watcher(&self, service_path: &str) -> Result<bool, StackError> {
        self.call_ok(GattRequest::DeregisterWatcher {
            path: service_path.to_string(),
        })
        .await
    }
}

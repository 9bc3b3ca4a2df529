//! IPC Server - Unix Domain Socket 通信

use crate::service::LauncherService;
use anyhow::Result;
use busbridge_core::ActivationPayload;
use busbridge_core::ipc::{ControlRequest, ControlResponse, write_message};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::UnixListener;
use tokio::sync::Mutex;

pub async fn run_ipc_server(path: &Path, service: Arc<Mutex<LauncherService>>) -> Result<()> {
    // 删除旧的 socket 文件
    let _ = std::fs::remove_file(path);

    let listener = UnixListener::bind(path)?;
    tracing::info!("IPC server listening on {:?}", path);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let (reader, writer) = stream.into_split();
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(reader, writer, service).await {
                        tracing::debug!("Client connection closed: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("Failed to accept connection: {}", e);
            }
        }
    }
}

pub async fn handle_client<R, W>(
    reader: R,
    mut writer: W,
    service: Arc<Mutex<LauncherService>>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let request: ControlRequest = match serde_json::from_str(line.trim_end()) {
            Ok(req) => req,
            Err(e) => {
                let resp = ControlResponse::Error {
                    message: format!("Invalid request: {}", e),
                };
                write_message(&mut writer, &resp).await?;
                line.clear();
                continue;
            }
        };

        tracing::debug!("Received request: {:?}", request);

        let response = match request {
            ControlRequest::Status => service.lock().await.status(),
            ControlRequest::Start { argv, config } => {
                let payload = if argv.is_none() && config.is_none() {
                    None
                } else {
                    Some(ActivationPayload { argv, config })
                };
                service.lock().await.start(payload)
            }
        };

        write_message(&mut writer, &response).await?;
        line.clear();
    }

    Ok(())
}

//! IPC Client - 与守护进程通信

use anyhow::{Result, bail};
use busbridge_core::ipc::{ControlRequest, ControlResponse, read_message, write_message};
use std::path::Path;
use tokio::io::BufReader;
use tokio::net::UnixStream;

pub async fn send_request(socket: &Path, request: ControlRequest) -> Result<ControlResponse> {
    let stream = match UnixStream::connect(socket).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ 无法连接到守护进程: {}", e);
            eprintln!("   请确保 busbridge-daemon 正在运行");
            eprintln!("   运行: cargo xtask dev");
            return Err(e.into());
        }
    };

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    write_message(&mut writer, &request).await?;

    let Some(response) = read_message::<_, ControlResponse>(&mut reader).await? else {
        bail!("守护进程关闭了连接");
    };

    match &response {
        ControlResponse::Ok { message } => println!("✅ {}", message),
        ControlResponse::Error { message } => eprintln!("❌ {}", message),
        _ => {}
    }

    Ok(response)
}

//! Busbridge Daemon
//!
//! 后台守护进程，负责：
//! - 接收激活负载并在分离线程中启动 worker
//! - 重启后重新投递上一次的负载
//! - 通过 Unix Socket 与 CLI 通信

mod ipc;
mod service;

use anyhow::Result;
use busbridge_core::{PayloadStore, ProcessWorker, Settings, WorkerLauncher};
use clap::Parser;
use service::LauncherService;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "busbridge-daemon")]
#[command(about = "Busbridge worker launcher daemon", long_about = None)]
struct Args {
    /// 控制 socket 路径（覆盖配置文件）
    #[arg(long)]
    socket: Option<PathBuf>,

    /// worker 程序路径（覆盖配置文件）
    #[arg(long)]
    worker: Option<PathBuf>,

    /// 启动时不重新投递上次的负载
    #[arg(long)]
    no_redeliver: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 桥接 log crate（busbridge-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    // 初始化日志
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,busbridge_core=debug")),
        )
        .try_init();

    let args = Args::parse();
    let settings = Settings::load();

    tracing::info!("Busbridge Daemon starting...");

    let worker_program = args.worker.unwrap_or_else(|| settings.worker_program.clone());
    let store = PayloadStore::new(&settings.state_dir);
    let worker = ProcessWorker::new(worker_program).with_pid_file(store.pid_path());
    let mut service = LauncherService::new(WorkerLauncher::new(worker), store);

    if args.no_redeliver {
        tracing::info!("Redelivery disabled");
    } else if let Err(e) = service.redeliver() {
        tracing::error!("Failed to redeliver stored payload: {}", e);
    }

    let socket = args.socket.unwrap_or_else(|| settings.control_socket.clone());
    let service = Arc::new(Mutex::new(service));

    // 启动 IPC 服务器
    let ipc_handle = tokio::spawn(async move { ipc::run_ipc_server(&socket, service).await });

    tokio::select! {
        res = ipc_handle => {
            tracing::error!("IPC server exited: {:?}", res);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
        }
    }

    Ok(())
}

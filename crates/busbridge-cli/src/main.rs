//! Busbridge CLI
//!
//! 命令行客户端：
//! - `start` / `status` 通过 Unix Socket 与守护进程通信
//! - `session` 运行逐行交互的会话客户端
//! - `gatt` 经协议栈桥查看一个 GATT 服务的特征
//!
//! 日志默认只输出警告，可通过 RUST_LOG 调整：
//!
//! ```bash
//! RUST_LOG=debug busbridge session 2>> /tmp/busbridge.log
//! ```

mod client;
mod gatt;
mod session;

use anyhow::{Context, Result};
use busbridge_core::ipc::{ControlRequest, ControlResponse};
use busbridge_core::launcher::DEFAULT_ARGV;
use busbridge_core::{ActivationPayload, LogLevel, Settings};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "busbridge", version, about = "消息总线 worker 启动器与会话客户端")]
struct Cli {
    /// 控制 socket 路径（覆盖配置文件）
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// 本地日志级别（未设置 RUST_LOG 时生效）
    #[arg(long, global = true, default_value = "warn")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 启动 worker
    Start {
        /// worker 参数（第一个为程序名），可重复
        #[arg(short, long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
        /// 配置文档文件
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// 使用内置示例参数和配置
        #[arg(long, conflicts_with_all = ["args", "config"])]
        sample: bool,
        /// worker 日志级别 (error, warn, info, debug)
        #[arg(short, long)]
        verbosity: Option<LogLevel>,
    },
    /// 查看 worker 状态
    Status,
    /// 交互式会话
    Session {
        /// 会话 peer 的 socket（覆盖配置文件）
        #[arg(long)]
        peer: Option<PathBuf>,
    },
    /// 查看 GATT 服务的特征
    Gatt {
        /// 服务对象路径
        path: String,
        /// 服务 UUID
        #[arg(long)]
        uuid: Option<Uuid>,
        /// 注册特征变化监听，直到 Ctrl+C
        #[arg(long)]
        watch: bool,
        /// 协议栈桥的 socket（覆盖配置文件）
        #[arg(long)]
        bridge: Option<PathBuf>,
    },
}

/// 由命令行参数组装激活负载；什么都没提供时返回 `None`，由守护进程使用默认值
fn build_payload(
    args: Vec<String>,
    config: Option<String>,
    sample: bool,
    verbosity: Option<LogLevel>,
) -> Option<ActivationPayload> {
    let mut payload = if sample {
        ActivationPayload::sample()
    } else {
        ActivationPayload {
            argv: (!args.is_empty()).then_some(args),
            config,
        }
    };

    if let Some(level) = verbosity {
        let argv = payload
            .argv
            .get_or_insert_with(|| DEFAULT_ARGV.iter().map(ToString::to_string).collect());
        argv.retain(|arg| !arg.starts_with("--verbosity="));
        argv.push(level.verbosity_arg());
    }

    (payload != ActivationPayload::default()).then_some(payload)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 桥接 log crate（busbridge-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.filter_directive())),
        )
        .try_init();

    let mut settings = Settings::load();
    if let Some(socket) = cli.socket {
        settings.control_socket = socket;
    }

    match cli.command {
        Commands::Start {
            args,
            config,
            sample,
            verbosity,
        } => {
            let config = match config {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("无法读取配置文件 {:?}", path))?,
                ),
                None => None,
            };
            let payload = build_payload(args, config, sample, verbosity);
            match &payload {
                Some(p) => println!("🚀 启动 worker: {:?}", p.argv),
                None => println!("🚀 启动 worker (默认参数)"),
            }
            let (argv, config) = payload.map_or((None, None), |p| (p.argv, p.config));
            client::send_request(&settings.control_socket, ControlRequest::Start { argv, config })
                .await?;
        }
        Commands::Status => {
            let resp =
                client::send_request(&settings.control_socket, ControlRequest::Status).await?;
            if let ControlResponse::Status {
                running,
                argv,
                config_len,
                started_at,
            } = resp
            {
                if running {
                    println!("状态: 运行中");
                    println!("参数: {}", argv.join(" "));
                    println!("配置: {} 字节", config_len);
                    if let Some(ts) = started_at {
                        println!("启动时间: {} (Unix)", ts);
                    }
                } else {
                    println!("状态: 未启动");
                }
            }
        }
        Commands::Session { peer } => {
            if let Some(peer) = peer {
                settings.session_socket = peer;
            }
            session::run(&settings).await?;
        }
        Commands::Gatt {
            path,
            uuid,
            watch,
            bridge,
        } => {
            if let Some(bridge) = bridge {
                settings.gatt_socket = bridge;
            }
            gatt::run(&settings, path, uuid, watch).await?;
        }
    }

    Ok(())
}

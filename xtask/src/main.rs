use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Busbridge 开发任务自动化")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 构建所有组件 (release)
    Build,
    /// 运行守护进程 (开发模式)
    Dev {
        /// worker 程序路径
        #[arg(short, long)]
        worker: Option<String>,
    },
    /// 运行交互式会话 (开发模式)
    Session {
        /// 日志级别 (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "info")]
        log_level: String,
        /// 日志输出文件 (默认 /tmp/busbridge.log)
        #[arg(short = 'o', long)]
        log_file: Option<String>,
        /// 会话 peer 的 socket
        #[arg(long)]
        peer: Option<String>,
    },
    /// 运行测试
    Test {
        /// 只测试指定 crate (如 busbridge-core)
        #[arg(short, long)]
        package: Option<String>,
    },
    /// 检查格式与 clippy 警告
    Lint,
    /// 生成 core 与 daemon 的覆盖率报告 (需要 cargo-tarpaulin)
    Coverage,
    /// 清理构建产物与残留的 socket
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // 确保在项目根目录执行
    let project_root = match std::env::var("CARGO_MANIFEST_DIR")
        .map(std::path::PathBuf::from)
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Build => build(&sh)?,
        Commands::Dev { worker } => dev(&sh, worker)?,
        Commands::Session {
            log_level,
            log_file,
            peer,
        } => session(&sh, &log_level, log_file, peer)?,
        Commands::Test { package } => test(&sh, package)?,
        Commands::Lint => lint(&sh)?,
        Commands::Coverage => coverage(&sh)?,
        Commands::Clean => clean(&sh)?,
    }

    Ok(())
}

fn build(sh: &Shell) -> Result<()> {
    println!("🔨 构建所有组件...");
    cmd!(
        sh,
        "cargo build --release -p busbridge-daemon -p busbridge-cli"
    )
    .run()?;
    println!("✅ 构建完成");
    Ok(())
}

fn dev(sh: &Shell, worker: Option<String>) -> Result<()> {
    println!("🚀 启动开发模式守护进程...");
    let worker_args: Vec<String> = worker
        .map(|w| vec!["--worker".to_string(), w])
        .unwrap_or_default();
    cmd!(sh, "cargo run -p busbridge-daemon -- --no-redeliver {worker_args...}").run()?;
    Ok(())
}

fn session(
    sh: &Shell,
    log_level: &str,
    log_file: Option<String>,
    peer: Option<String>,
) -> Result<()> {
    let log_file = log_file.unwrap_or_else(|| "/tmp/busbridge.log".to_string());
    println!("🖥️  启动会话 (日志级别 {}, 实时日志: tail -f {})", log_level, log_file);

    // 会话占用 stdin/stdout，日志追加到文件
    sh.set_var("RUST_LOG", format!("warn,busbridge_core={}", log_level));
    let peer_arg = peer
        .map(|p| format!(" --peer '{}'", p))
        .unwrap_or_default();
    let command = format!(
        "cargo run -q -p busbridge-cli -- session{} 2>> '{}'",
        peer_arg, log_file
    );
    cmd!(sh, "bash -c {command}").run()?;

    println!("📁 日志已保存到: {}", log_file);
    Ok(())
}

fn test(sh: &Shell, package: Option<String>) -> Result<()> {
    match package {
        Some(package) => {
            println!("🧪 运行 {} 的测试...", package);
            cmd!(sh, "cargo test -p {package}").run()?;
        }
        None => {
            println!("🧪 运行测试...");
            cmd!(sh, "cargo test --workspace").run()?;
        }
    }
    println!("✅ 测试完成");
    Ok(())
}

fn lint(sh: &Shell) -> Result<()> {
    println!("🔍 检查格式...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    println!("🔍 运行 clippy...");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    println!("✅ 检查通过");
    Ok(())
}

fn coverage(sh: &Shell) -> Result<()> {
    if cmd!(sh, "cargo tarpaulin --version").quiet().run().is_err() {
        anyhow::bail!("未找到 cargo-tarpaulin，请先运行: cargo install cargo-tarpaulin");
    }

    println!("📊 分析 busbridge-core 与 busbridge-daemon 的覆盖率...");
    let out_dir = "target/coverage";
    cmd!(
        sh,
        "cargo tarpaulin -p busbridge-core -p busbridge-daemon --out Html --output-dir {out_dir}"
    )
    .run()?;

    println!("✅ 覆盖率报告: {}/tarpaulin-report.html", out_dir);
    Ok(())
}

/// 开发运行中断后留下的 socket 文件
fn stale_sockets(runtime_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(runtime_dir) else {
        return vec![];
    };
    entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("busbridge") && name.ends_with(".sock"))
        })
        .collect()
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 清理构建产物...");
    cmd!(sh, "cargo clean").run()?;

    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"));
    for socket in stale_sockets(&runtime_dir) {
        println!("   删除 {}", socket.display());
        sh.remove_path(&socket)?;
    }

    println!("✅ 清理完成");
    Ok(())
}

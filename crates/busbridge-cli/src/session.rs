//! 交互式会话 - 逐行读取命令，状态变化由 actor 广播后打印

use anyhow::{Context, Result};
use busbridge_core::{IpcSession, PeerRecord, Settings, Surface, SurfaceHandle, SurfaceUpdate};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
命令:
  list                 列出已发现的 peer
  connect <N>          连接第 N 个 peer
  disconnect <N>       断开第 N 个 peer
  ping <N> <消息>      ping 第 N 个 peer
  <消息>               ping 所有已连接的 peer
  help                 显示帮助
  quit                 退出";

#[derive(Debug, PartialEq, Eq)]
pub enum ReplCommand {
    List,
    Connect(usize),
    Disconnect(usize),
    Ping(usize, String),
    Broadcast(String),
    Help,
    Quit,
    Empty,
}

pub fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ReplCommand::Empty);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let index = |arg: &str| {
        arg.parse::<usize>()
            .map_err(|_| format!("无效的序号: '{}'", arg))
    };

    match word {
        "list" | "ls" => Ok(ReplCommand::List),
        "help" | "?" => Ok(ReplCommand::Help),
        "quit" | "exit" => Ok(ReplCommand::Quit),
        "connect" => Ok(ReplCommand::Connect(index(rest)?)),
        "disconnect" => Ok(ReplCommand::Disconnect(index(rest)?)),
        "ping" => {
            let (n, message) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| "用法: ping <N> <消息>".to_string())?;
            Ok(ReplCommand::Ping(index(n)?, message.trim().to_string()))
        }
        _ => Ok(ReplCommand::Broadcast(line.to_string())),
    }
}

fn print_update(update: &SurfaceUpdate) {
    match update {
        SurfaceUpdate::PeerAdded(peer) => println!("🔍 发现: {} ({})", peer.name, peer.address),
        SurfaceUpdate::PeerUpdated(peer) => {
            let state = if peer.connected { "已连接" } else { "未连接" };
            println!("🔄 {}: {}", peer.name, state);
        }
        SurfaceUpdate::PeerRemoved(peer) => println!("❌ 连接失败，已移除: {}", peer.name),
        SurfaceUpdate::PingReply { peer, reply } => match reply {
            Some(reply) => println!("📨 {}: {}", peer, reply),
            None => println!("⚠️  {}: 无回复", peer),
        },
    }
}

fn print_peers(peers: &[PeerRecord]) {
    if peers.is_empty() {
        println!("   未发现 peer");
        return;
    }
    for (i, peer) in peers.iter().enumerate() {
        let mark = if peer.connected { "*" } else { " " };
        println!("   [{}]{} {} ({})", i, mark, peer.name, peer.address);
    }
}

async fn address_at(handle: &SurfaceHandle, index: usize) -> Result<Option<String>> {
    let peers = handle.peers().await?;
    match peers.get(index) {
        Some(peer) => Ok(Some(peer.address.clone())),
        None => {
            eprintln!("❌ 没有第 {} 个 peer", index);
            Ok(None)
        }
    }
}

async fn execute(handle: &SurfaceHandle, command: ReplCommand) -> Result<bool> {
    match command {
        ReplCommand::Empty => {}
        ReplCommand::Help => println!("{}", HELP),
        ReplCommand::Quit => return Ok(false),
        ReplCommand::List => print_peers(&handle.peers().await?),
        ReplCommand::Connect(n) => {
            if let Some(address) = address_at(handle, n).await? {
                if let Err(e) = handle.connect(&address).await {
                    eprintln!("❌ {}", e);
                }
            }
        }
        ReplCommand::Disconnect(n) => {
            if let Some(address) = address_at(handle, n).await? {
                if let Err(e) = handle.disconnect(&address).await {
                    eprintln!("❌ {}", e);
                }
            }
        }
        ReplCommand::Ping(n, message) => {
            if let Some(address) = address_at(handle, n).await? {
                if let Err(e) = handle.ping(&address, &message).await {
                    eprintln!("❌ {}", e);
                }
            }
        }
        ReplCommand::Broadcast(message) => {
            if handle.ping_connected(&message).await?.is_empty() {
                println!("   没有已连接的 peer");
            }
        }
    }
    Ok(true)
}

pub async fn run(settings: &Settings) -> Result<()> {
    let session = Arc::new(IpcSession::from_settings(settings));
    let handle = Surface::start(session)
        .await
        .context("会话初始化失败")?;

    println!("🔗 会话已建立 ({})，输入 help 查看命令", settings.client_name);

    let updates = handle.updates();
    let printer = tokio::spawn(async move {
        tokio::pin!(updates);
        while let Some(update) = updates.next().await {
            print_update(&update);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(message) => {
                eprintln!("❌ {}", message);
                continue;
            }
        };
        if !execute(&handle, command).await? {
            break;
        }
    }

    handle.shutdown().await;
    printer.abort();
    println!("👋 会话已关闭");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("  "), Ok(ReplCommand::Empty));
        assert_eq!(parse_command("list"), Ok(ReplCommand::List));
        assert_eq!(parse_command("connect 2"), Ok(ReplCommand::Connect(2)));
        assert_eq!(parse_command("disconnect 0"), Ok(ReplCommand::Disconnect(0)));
        assert_eq!(
            parse_command("ping 1 hello there"),
            Ok(ReplCommand::Ping(1, "hello there".to_string()))
        );
        assert_eq!(parse_command("quit"), Ok(ReplCommand::Quit));
    }

    #[test]
    fn test_plain_text_is_broadcast() {
        assert_eq!(
            parse_command("hello everyone"),
            Ok(ReplCommand::Broadcast("hello everyone".to_string()))
        );
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(parse_command("connect x").is_err());
        assert!(parse_command("connect").is_err());
        assert!(parse_command("ping 1").is_err());
    }
}

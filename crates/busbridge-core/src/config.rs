//! 应用配置和持久化
//!
//! 提供 socket 路径、worker 程序、超时时间等设置的存储和读取。

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// 服务名前缀（与示例服务端广播的 well-known name 保持一致）
pub const DEFAULT_NAME_PREFIX: &str = "org.busbridge.samples.simple.";

/// 应用设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 守护进程控制 socket
    pub control_socket: PathBuf,
    /// 会话 peer 的 socket
    pub session_socket: PathBuf,
    /// GATT 协议栈桥的 socket
    pub gatt_socket: PathBuf,
    /// 持久化状态目录（保存最近一次激活请求）
    pub state_dir: PathBuf,
    /// worker 可执行文件
    pub worker_program: PathBuf,
    /// 只接受以该前缀开头的服务名
    pub name_prefix: String,
    /// 本端名称（用于日志）
    pub client_name: String,
    /// 等待特征发现完成的超时（毫秒）
    pub discovery_timeout_ms: u64,
    /// connect/disconnect 调用超时（毫秒）
    pub connect_timeout_ms: u64,
    /// ping 调用超时（毫秒）
    pub ping_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            control_socket: runtime_dir().join("busbridge.sock"),
            session_socket: runtime_dir().join("busbridge-session.sock"),
            gatt_socket: runtime_dir().join("busbridge-gatt.sock"),
            state_dir: dirs::state_dir()
                .or_else(dirs::data_local_dir)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("busbridge"),
            worker_program: PathBuf::from("busbridge-worker"),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            client_name: get_default_client_name(),
            discovery_timeout_ms: 5000,
            connect_timeout_ms: 4000,
            ping_timeout_ms: 5000,
        }
    }
}

impl Settings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("busbridge")
            .join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// 从指定路径加载设置，读取或解析失败时回退到默认值
    pub fn load_from(path: &std::path::Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {path:?}");
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {e}, using defaults");
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {e}, using defaults");
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// 获取默认本端名称（主机名）
fn get_default_client_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "busbridge".to_string())
}

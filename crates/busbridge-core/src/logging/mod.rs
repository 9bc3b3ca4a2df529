//! 日志模块
//!
//! 统一的日志级别定义，并负责与 worker 的 `--verbosity=N` 参数互相转换。
//! worker 使用 syslog 风格的数值级别（3 = LOG_ERR, 7 = LOG_DEBUG）。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 日志级别
///
/// 实现了 `PartialOrd` 以便过滤。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    /// 获取显示名称
    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// 对应的 syslog 数值级别
    pub fn verbosity(self) -> u8 {
        match self {
            LogLevel::Error => 3,
            LogLevel::Warn => 4,
            LogLevel::Info => 6,
            LogLevel::Debug | LogLevel::Trace => 7,
        }
    }

    /// 从 syslog 数值级别转换
    ///
    /// 0..=3 (EMERG..ERR) 都归为 Error，大于 7 的值归为 Debug。
    pub fn from_verbosity(level: u8) -> Self {
        match level {
            0..=3 => LogLevel::Error,
            4 => LogLevel::Warn,
            5 | 6 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }

    /// 生成 worker 命令行参数，例如 `--verbosity=7`
    pub fn verbosity_arg(self) -> String {
        format!("--verbosity={}", self.verbosity())
    }

    /// 从 argv 中查找 `--verbosity=N` 参数
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        argv.iter()
            .filter_map(|arg| arg.strip_prefix("--verbosity="))
            .filter_map(|value| value.parse::<u8>().ok())
            .next_back()
            .map(Self::from_verbosity)
    }

    /// 转换为 `EnvFilter` 可用的指令
    pub fn filter_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ERROR" => Ok(LogLevel::Error),
            "WARN" => Ok(LogLevel::Warn),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            "TRACE" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

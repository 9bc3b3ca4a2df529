//! 激活请求
//!
//! 激活请求由调用方（CLI 或重启后的守护进程）一次性交付，其中 argv 和 config
//! 两部分可以分别缺省，缺省部分使用内置默认值替代。

use log::{info, warn};
use serde::{Deserialize, Serialize};

/// 默认 argv：argv[0] 为约定的程序名，必须存在
pub const DEFAULT_ARGV: [&str; 3] = ["busbridge-worker", "--internal", "--verbosity=3"];

/// 示例 argv：使用外部提供的配置，禁用蓝牙，LOG_DEBUG 级别
pub const SAMPLE_ARGV: [&str; 4] = [
    "busbridge-worker",
    "--config-service",
    "--no-bt",
    "--verbosity=7",
];

/// 示例配置文档，原样交给 worker
pub const SAMPLE_CONFIG: &str = concat!(
    "<busconfig>",
    "  <type>alljoyn</type>",
    "  <listen>unix:abstract=alljoyn</listen>",
    "  <listen>tcp:addr=0.0.0.0,port=9955</listen>",
    "  <policy context=\"default\">",
    "    <allow send_interface=\"*\"/>",
    "    <allow receive_interface=\"*\"/>",
    "    <allow own=\"*\"/>",
    "    <allow user=\"*\"/>",
    "    <allow send_requested_reply=\"true\"/>",
    "    <allow receive_requested_reply=\"true\"/>",
    "  </policy>",
    "  <limit name=\"auth_timeout\">32768</limit>",
    "  <limit name=\"max_incomplete_connections_tcp\">16</limit>",
    "  <limit name=\"max_completed_connections_tcp\">64</limit>",
    "  <alljoyn module=\"ipns\">",
    "    <property interfaces=\"*\"/>",
    "  </alljoyn>",
    "</busconfig>",
);

/// 激活负载（线上格式）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argv: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

impl ActivationPayload {
    pub fn new(argv: Vec<String>, config: impl Into<String>) -> Self {
        Self {
            argv: Some(argv),
            config: Some(config.into()),
        }
    }

    /// 示例负载
    pub fn sample() -> Self {
        Self::new(
            SAMPLE_ARGV.iter().map(ToString::to_string).collect(),
            SAMPLE_CONFIG,
        )
    }
}

/// 交给 worker 的启动请求，构造后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupRequest {
    argv: Vec<String>,
    config: String,
}

impl Default for StartupRequest {
    fn default() -> Self {
        Self {
            argv: DEFAULT_ARGV.iter().map(ToString::to_string).collect(),
            config: String::new(),
        }
    }
}

impl StartupRequest {
    /// 从激活负载构造启动请求
    ///
    /// 负载缺失、argv 缺失或为空、config 缺失时都会记录警告并使用默认值，
    /// 提供的部分则原样使用。
    pub fn from_payload(payload: Option<ActivationPayload>) -> Self {
        let mut request = Self::default();

        let Some(payload) = payload else {
            warn!("No activation payload provided, using defaults");
            return request;
        };
        info!("Activation payload provided");

        match payload.argv {
            Some(argv) if !argv.is_empty() => request.argv = argv,
            _ => warn!("Using default arguments"),
        }

        match payload.config {
            Some(config) => request.config = config,
            None => warn!("Using default config"),
        }

        request
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// 配置文档；空字符串表示使用 worker 的默认配置
    pub fn config(&self) -> &str {
        &self.config
    }

    /// 约定的程序名（argv[0]）
    pub fn program_name(&self) -> &str {
        self.argv.first().map_or(DEFAULT_ARGV[0], String::as_str)
    }

    /// 还原为可重新投递的负载
    pub fn to_payload(&self) -> ActivationPayload {
        ActivationPayload::new(self.argv.clone(), self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_payload_used_verbatim() {
        let argv = strings(&["worker", "--no-bt", "--verbosity=7"]);
        let payload = ActivationPayload::new(argv.clone(), "<busconfig/>");

        let request = StartupRequest::from_payload(Some(payload.clone()));
        assert_eq!(request.argv(), argv.as_slice());
        assert_eq!(request.config(), "<busconfig/>");
        assert_eq!(request.to_payload(), payload);
    }

    #[test]
    fn test_absent_payload_uses_defaults() {
        let request = StartupRequest::from_payload(None);
        assert_eq!(request.argv(), strings(&DEFAULT_ARGV).as_slice());
        assert_eq!(request.config(), "");
        assert_eq!(request.program_name(), "busbridge-worker");
    }

    #[test]
    fn test_empty_argv_uses_default_argv_but_keeps_config() {
        let payload = ActivationPayload {
            argv: Some(vec![]),
            config: Some("cfg".to_string()),
        };
        let request = StartupRequest::from_payload(Some(payload));
        assert_eq!(request.argv(), strings(&DEFAULT_ARGV).as_slice());
        assert_eq!(request.config(), "cfg");
    }

    #[test]
    fn test_missing_config_is_empty() {
        let payload = ActivationPayload {
            argv: Some(strings(&["w", "--internal"])),
            config: None,
        };
        let request = StartupRequest::from_payload(Some(payload));
        assert_eq!(request.argv(), strings(&["w", "--internal"]).as_slice());
        assert_eq!(request.config(), "");
    }

    #[test]
    fn test_payload_json_omits_absent_fields() {
        let json = serde_json::to_string(&ActivationPayload::default()).unwrap();
        assert_eq!(json, "{}");

        let parsed: ActivationPayload = serde_json::from_str(r#"{"argv":["a"]}"#).unwrap();
        assert_eq!(parsed.argv, Some(vec!["a".to_string()]));
        assert_eq!(parsed.config, None);
    }

    #[test]
    fn test_sample_config_passed_through_unmodified() {
        let request = StartupRequest::from_payload(Some(ActivationPayload::sample()));
        assert_eq!(request.config(), SAMPLE_CONFIG);
        assert!(request.config().contains("max_completed_connections_tcp"));
        assert_eq!(request.argv()[1], "--config-service");
    }
}

//! IPC 协议 - 换行分隔的 JSON 消息
//!
//! 三条通道共用同一种帧格式：
//! - 控制通道：CLI ↔ 守护进程（启动 worker、查询状态）
//! - 会话通道：会话客户端 ↔ 原生总线 peer
//! - GATT 通道：属性缓存 ↔ 蓝牙协议栈桥

use crate::gatt::DiscoveredCharacteristic;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ControlRequest {
    /// 启动 worker；argv/config 可分别缺省
    #[serde(rename = "start")]
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        argv: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<String>,
    },
    #[serde(rename = "status")]
    Status,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ControlResponse {
    #[serde(rename = "ok")]
    Ok { message: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "status")]
    Status {
        running: bool,
        argv: Vec<String>,
        config_len: usize,
        /// Unix 时间戳（秒）
        started_at: Option<u64>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum SessionRequest {
    #[serde(rename = "create")]
    Create { client_name: String },
    #[serde(rename = "connect")]
    Connect { address: String },
    #[serde(rename = "disconnect")]
    Disconnect { address: String },
    #[serde(rename = "ping")]
    Ping { target: String, message: String },
    #[serde(rename = "destroy")]
    Destroy,
    /// 订阅发现通知；之后该连接只接收 `found` 消息
    #[serde(rename = "subscribe")]
    Subscribe,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum SessionResponse {
    #[serde(rename = "ok")]
    Ok,
    /// 远端状态码，0 表示成功
    #[serde(rename = "status")]
    Status { code: i32 },
    #[serde(rename = "reply")]
    Reply { message: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "found")]
    Found {
        name: String,
        address: String,
        #[serde(default)]
        guid: String,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum GattRequest {
    #[serde(rename = "service_name")]
    ServiceName { path: String },
    /// 发现服务下的全部特征，应答一次性携带所有结果
    #[serde(rename = "discover")]
    Discover { path: String },
    #[serde(rename = "register_watcher")]
    RegisterWatcher { path: String },
    #[serde(rename = "deregister_watcher")]
    DeregisterWatcher { path: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum GattResponse {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "name")]
    Name { name: String },
    #[serde(rename = "characteristics")]
    Characteristics {
        characteristics: Vec<DiscoveredCharacteristic>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

/// 写入一条消息（JSON + `\n`）
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// 读取一条消息；对端关闭时返回 `None`
pub async fn read_message<R, T>(reader: &mut R) -> anyhow::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line.trim_end())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_control_request_wire_format() {
        let json = serde_json::to_string(&ControlRequest::Start {
            argv: Some(vec!["w".into()]),
            config: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"start","argv":["w"]}"#);

        let parsed: ControlRequest = serde_json::from_str(r#"{"type":"start"}"#).unwrap();
        assert_eq!(
            parsed,
            ControlRequest::Start {
                argv: None,
                config: None
            }
        );
    }

    #[test]
    fn test_found_without_guid() {
        let parsed: SessionResponse =
            serde_json::from_str(r#"{"type":"found","name":"a","address":"b"}"#).unwrap();
        assert_eq!(
            parsed,
            SessionResponse::Found {
                name: "a".into(),
                address: "b".into(),
                guid: String::new()
            }
        );
    }

    #[test]
    fn test_characteristics_keep_null_property_slots() {
        let json = r#"{"type":"characteristics","characteristics":[
            {"path":"/svc/char0","properties":["UUID",null,"Value","d"]}]}"#;
        let parsed: GattResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed,
            GattResponse::Characteristics {
                characteristics: vec![DiscoveredCharacteristic::new(
                    "/svc/char0",
                    vec![Some("UUID".into()), None, Some("Value".into()), Some("d".into())],
                )],
            }
        );
    }

    #[tokio::test]
    async fn test_framing_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let (_, mut client_writer) = tokio::io::split(client);
        let (server_reader, _) = tokio::io::split(server);
        let mut server_reader = BufReader::new(server_reader);

        write_message(&mut client_writer, &SessionRequest::Destroy)
            .await
            .unwrap();
        write_message(
            &mut client_writer,
            &SessionRequest::Ping {
                target: "t".into(),
                message: "hi".into(),
            },
        )
        .await
        .unwrap();
        drop(client_writer);

        let first: Option<SessionRequest> = read_message(&mut server_reader).await.unwrap();
        assert_eq!(first, Some(SessionRequest::Destroy));
        let second: Option<SessionRequest> = read_message(&mut server_reader).await.unwrap();
        assert!(matches!(second, Some(SessionRequest::Ping { .. })));
    }
}

//! GATT 服务查看 - 列出特征及其缓存属性

use anyhow::Result;
use busbridge_core::{GattService, IpcAttributeStack, Settings};
use std::sync::Arc;
use uuid::Uuid;

/// 一个特征的展示行
pub fn format_characteristic(
    path: &str,
    uuid: Option<Uuid>,
    description: Option<&str>,
    value: Option<&str>,
) -> String {
    let uuid = uuid.map_or_else(|| "-".to_string(), |u| u.to_string());
    format!(
        "{path}\n    UUID: {uuid}\n    描述: {}\n    值:   {}",
        description.unwrap_or("-"),
        value.unwrap_or("-")
    )
}

pub async fn run(
    settings: &Settings,
    path: String,
    uuid: Option<Uuid>,
    watch: bool,
) -> Result<()> {
    let stack = Arc::new(IpcAttributeStack::from_settings(settings));
    let service = GattService::open(
        stack,
        uuid.unwrap_or_default(),
        path,
        settings.discovery_timeout(),
    );

    match service.service_name().await {
        Some(name) => println!("📡 {} ({})", name, service.object_path()),
        None => println!("📡 {}", service.object_path()),
    }

    let Some(paths) = service.characteristics().await else {
        eprintln!(
            "⚠️  {:?} 内未完成特征发现，协议栈桥: {:?}",
            settings.discovery_timeout(),
            settings.gatt_socket
        );
        return Ok(());
    };

    println!("共 {} 个特征", paths.len());
    for path in &paths {
        let uuid = service.characteristic_uuid(path).await;
        let description = service.characteristic_description(path).await;
        let value = service.read_characteristic_string(path).await;
        println!(
            "{}",
            format_characteristic(path, uuid, description.as_deref(), value.as_deref())
        );
    }

    if watch {
        if !service.register_watcher().await {
            anyhow::bail!("无法注册特征变化监听");
        }
        println!("👀 正在监听特征变化，Ctrl+C 退出");
        tokio::signal::ctrl_c().await?;
        service.deregister_watcher().await;
    }

    Ok(())
}

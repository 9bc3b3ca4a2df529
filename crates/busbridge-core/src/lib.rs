//! Busbridge Core Library
//!
//! 消息总线客户端工具集：worker 启动器、远端会话客户端以及 GATT 属性缓存
//!
//! # 模块
//!
//! - **launcher**: 由激活载荷（argv + 配置文档）启动后台 worker
//! - **session**: 远端会话客户端与 peer 发现
//! - **surface**: 串行处理会话事件和用户命令的 actor
//! - **gatt**: 远端 GATT 服务属性的懒加载缓存，可经 socket 访问协议栈桥
//! - **ipc**: 守护进程与客户端之间的换行分隔 JSON 协议
//!
//! # 使用示例
//!
//! ## 启动 worker
//!
//! ```ignore
//! use busbridge_core::{ProcessWorker, StartupRequest, WorkerLauncher};
//!
//! let launcher = WorkerLauncher::new(ProcessWorker::new("busbridge-worker"));
//! let handle = launcher.launch(StartupRequest::from_payload(None))?;
//! ```
//!
//! ## 会话
//!
//! ```ignore
//! use busbridge_core::{IpcSession, Settings, Surface};
//!
//! let session = Arc::new(IpcSession::from_settings(&Settings::load()));
//! let handle = Surface::start(session).await?;
//! let mut updates = handle.updates();
//! while let Some(update) = updates.next().await {
//!     println!("{update:?}");
//! }
//! ```
//!
//! ## GATT 服务
//!
//! ```ignore
//! use busbridge_core::{GattService, IpcAttributeStack, Settings};
//!
//! let settings = Settings::load();
//! let stack = Arc::new(IpcAttributeStack::from_settings(&settings));
//! let service = GattService::open(stack, uuid, path, settings.discovery_timeout());
//! for path in service.characteristics().await.unwrap_or_default() {
//!     println!("{path}: {:?}", service.read_characteristic_string(&path).await);
//! }
//! ```

pub mod config;
pub mod gatt;
pub mod ipc;
pub mod launcher;
pub mod logging;
pub mod session;
pub mod surface;

pub use config::Settings;
pub use logging::LogLevel;

// Launcher re-exports
pub use launcher::{
    ActivationPayload, LaunchError, PayloadStore, ProcessWorker, StartupRequest, Worker,
    WorkerHandle, WorkerLauncher,
};

// Session re-exports
pub use session::{
    FoundPeer, IpcSession, PeerList, PeerRecord, RemoteSession, ServiceNaming, SessionClient,
    SessionError,
};
pub use surface::{Surface, SurfaceError, SurfaceHandle, SurfaceUpdate};

// GATT re-exports
pub use gatt::{
    AttributeStack, DiscoveredCharacteristic, DiscoverySink, DiscoveryState, GattService,
    IpcAttributeStack, StackError,
};

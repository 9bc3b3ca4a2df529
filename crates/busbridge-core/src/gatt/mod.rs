//! GATT 服务属性包装
//!
//! 特征属性从远端协议栈懒加载并在本地缓存。
//!
//! # 状态机
//!
//! `NotStarted` → (发起发现请求) → `Pending` → (发现完成信号) → `Ready`
//!
//! - 在 `Pending` 状态下读取属性会等待，最长 `discovery_timeout`，
//!   超时后返回当前缓存的值（可能为空），不会报错
//! - 进入 `Ready` 后的读取不会再次触发发现
//! - 发现完成信号与等待方使用独立的同步原语，信号方不会被等待方阻塞

pub mod cache;
pub mod ipc_stack;

pub use cache::{AttributeCache, DiscoveredCharacteristic};
pub use ipc_stack::IpcAttributeStack;

use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell, watch};
use tokio::time;
use uuid::Uuid;

pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

const PROP_UUID: &str = "UUID";
const PROP_DESCRIPTION: &str = "Description";
const PROP_VALUE: &str = "Value";
const PROP_REPRESENTATION: &str = "Representation";

/// 远端协议栈错误
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("Remote stack unavailable: {0}")]
    Unavailable(String),

    #[error("Remote call failed: {0}")]
    Remote(String),
}

/// 特征发现状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    NotStarted,
    Pending,
    Ready,
}

/// 远端蓝牙协议栈
#[async_trait]
pub trait AttributeStack: Send + Sync {
    async fn service_name(&self, service_path: &str) -> Result<String, StackError>;

    /// 发起特征发现；结果稍后通过 `sink` 异步送达
    async fn discover_characteristics(
        &self,
        service_path: &str,
        sink: DiscoverySink,
    ) -> Result<(), StackError>;

    async fn register_watcher(&self, service_path: &str) -> Result<bool, StackError>;

    async fn deregister_watcher(&self, service_path: &str) -> Result<bool, StackError>;
}

struct Shared {
    cache: RwLock<AttributeCache>,
    state: watch::Sender<DiscoveryState>,
}

/// 发现完成信号的投递端，由协议栈在任意上下文中调用
#[derive(Clone)]
pub struct DiscoverySink {
    shared: Arc<Shared>,
    service_path: Arc<str>,
}

impl DiscoverySink {
    /// 一次性写入全部发现结果并标记为 Ready
    ///
    /// 只接受第一次完成信号，返回是否被接受。
    pub fn complete(&self, batch: Vec<DiscoveredCharacteristic>) -> bool {
        {
            let mut cache = match self.shared.cache.write() {
                Ok(cache) => cache,
                Err(poisoned) => poisoned.into_inner(),
            };
            if cache.paths().is_some() {
                debug!(
                    "Ignoring repeated discovery completion for {}",
                    self.service_path
                );
                return false;
            }
            info!(
                "Discovered {} characteristics for service {}",
                batch.len(),
                self.service_path
            );
            cache.populate(batch);
        }

        // 写锁已释放后再通知
        self.shared.state.send_replace(DiscoveryState::Ready);
        true
    }
}

/// 远端 GATT 服务
pub struct GattService {
    uuid: Uuid,
    path: Arc<str>,
    stack: Arc<dyn AttributeStack>,
    name: OnceCell<String>,
    shared: Arc<Shared>,
    watcher_registered: Mutex<bool>,
    discovery_timeout: Duration,
}

impl GattService {
    /// 创建服务包装，尚未发起发现
    pub fn new(stack: Arc<dyn AttributeStack>, uuid: Uuid, path: impl Into<String>) -> Self {
        let (state, _) = watch::channel(DiscoveryState::NotStarted);
        Self {
            uuid,
            path: Arc::from(path.into()),
            stack,
            name: OnceCell::new(),
            shared: Arc::new(Shared {
                cache: RwLock::new(AttributeCache::new()),
                state,
            }),
            watcher_registered: Mutex::new(false),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// 创建服务包装并立即发起特征发现
    pub fn open(
        stack: Arc<dyn AttributeStack>,
        uuid: Uuid,
        path: impl Into<String>,
        discovery_timeout: Duration,
    ) -> Self {
        let service = Self::new(stack, uuid, path).with_discovery_timeout(discovery_timeout);
        service.request_discovery();
        service
    }

    pub fn service_uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn object_path(&self) -> &str {
        &self.path
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        *self.shared.state.borrow()
    }

    /// 发起发现请求；仅在 `NotStarted` 状态下生效
    ///
    /// 请求在独立任务中发出，调用方不会等待协议栈，也不会因被取消而丢失请求。
    /// 必须在 tokio 运行时中调用。
    pub fn request_discovery(&self) {
        let started = self.shared.state.send_if_modified(|state| {
            if *state == DiscoveryState::NotStarted {
                *state = DiscoveryState::Pending;
                true
            } else {
                false
            }
        });
        if !started {
            return;
        }

        debug!("Requesting characteristic discovery for {}", self.path);
        let stack = Arc::clone(&self.stack);
        let path = Arc::clone(&self.path);
        let sink = DiscoverySink {
            shared: Arc::clone(&self.shared),
            service_path: Arc::clone(&self.path),
        };
        tokio::spawn(async move {
            if let Err(e) = stack.discover_characteristics(&path, sink).await {
                // 保持 Pending，读取会在超时后降级
                warn!("Characteristic discovery request for {path} failed: {e}");
            }
        });
    }

    /// 等待发现完成，最长 `discovery_timeout`
    async fn wait_discovery_done(&self) {
        self.request_discovery();

        let mut rx = self.shared.state.subscribe();
        if *rx.borrow_and_update() == DiscoveryState::Ready {
            return;
        }

        let wait = rx.wait_for(|state| *state == DiscoveryState::Ready);
        if time::timeout(self.discovery_timeout, wait).await.is_err() {
            debug!(
                "Discovery for {} not finished after {:?}, using cached values",
                self.path, self.discovery_timeout
            );
        }
    }

    fn with_cache<T>(&self, read: impl FnOnce(&AttributeCache) -> T) -> T {
        match self.shared.cache.read() {
            Ok(cache) => read(&*cache),
            Err(poisoned) => read(&*poisoned.into_inner()),
        }
    }

    fn property(&self, path: &str, name: &str) -> Option<String> {
        self.with_cache(|cache| cache.property(path, name).map(str::to_string))
    }

    /// 服务名称，首次成功获取后缓存
    pub async fn service_name(&self) -> Option<String> {
        let result = self
            .name
            .get_or_try_init(|| self.stack.service_name(&self.path))
            .await;
        match result {
            Ok(name) => Some(name.clone()),
            Err(e) => {
                warn!("Failed to get service name for {}: {e}", self.path);
                None
            }
        }
    }

    /// 特征对象路径列表
    pub async fn characteristics(&self) -> Option<Vec<String>> {
        self.wait_discovery_done().await;
        self.with_cache(|cache| cache.paths().map(<[String]>::to_vec))
    }

    /// 所有特征的 UUID；缺失或无法解析的值被跳过
    pub async fn characteristic_uuids(&self) -> Option<Vec<Uuid>> {
        self.wait_discovery_done().await;
        self.with_cache(|cache| {
            let paths = cache.paths()?;
            let uuids = paths
                .iter()
                .filter_map(|path| {
                    let value = cache.property(path, PROP_UUID);
                    debug!("Characteristic UUID: {value:?}");
                    parse_uuid(path, value?)
                })
                .collect();
            Some(uuids)
        })
    }

    pub async fn characteristic_uuid(&self, path: &str) -> Option<Uuid> {
        self.wait_discovery_done().await;
        let value = self.property(path, PROP_UUID)?;
        parse_uuid(path, &value)
    }

    pub async fn characteristic_description(&self, path: &str) -> Option<String> {
        self.wait_discovery_done().await;
        self.property(path, PROP_DESCRIPTION)
    }

    /// 特征原始值
    pub async fn read_characteristic_raw(&self, path: &str) -> Option<Vec<u8>> {
        self.wait_discovery_done().await;
        self.with_cache(|cache| {
            cache.paths()?;
            cache
                .property(path, PROP_VALUE)
                .map(|value| value.as_bytes().to_vec())
        })
    }

    /// 特征值的字符串表示
    pub async fn read_characteristic_string(&self, path: &str) -> Option<String> {
        self.wait_discovery_done().await;
        self.with_cache(|cache| {
            cache.paths()?;
            cache.property(path, PROP_REPRESENTATION).map(str::to_string)
        })
    }

    /// 注册特征变化监听；已注册时直接返回成功
    pub async fn register_watcher(&self) -> bool {
        let mut registered = self.watcher_registered.lock().await;
        if *registered {
            return true;
        }

        debug!("Registering characteristics watcher for {}", self.path);
        *registered = match self.stack.register_watcher(&self.path).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!("Failed to register watcher for {}: {e}", self.path);
                false
            }
        };
        *registered
    }

    /// 注销监听；未注册时直接返回成功
    pub async fn deregister_watcher(&self) -> bool {
        let mut registered = self.watcher_registered.lock().await;
        if !*registered {
            return true;
        }

        debug!("Deregistering characteristics watcher for {}", self.path);
        *registered = false;
        match self.stack.deregister_watcher(&self.path).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!("Failed to deregister watcher for {}: {e}", self.path);
                false
            }
        }
    }

    /// 丢弃某个特征路径下缓存的属性
    pub fn invalidate(&self, path: &str) -> bool {
        match self.shared.cache.write() {
            Ok(mut cache) => cache.invalidate(path),
            Err(poisoned) => poisoned.into_inner().invalidate(path),
        }
    }
}

fn parse_uuid(path: &str, value: &str) -> Option<Uuid> {
    match Uuid::parse_str(value) {
        Ok(uuid) => Some(uuid),
        Err(e) => {
            warn!("Invalid UUID '{value}' for characteristic {path}: {e}");
            None
        }
    }
}

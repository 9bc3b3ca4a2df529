//! Worker 启动器
//!
//! - **request**: 激活负载与启动请求（缺省值替换）
//! - **worker**: worker trait、外部进程 worker、分离线程启动
//! - **store**: 最近一次负载的持久化，用于重启后重新投递

pub mod request;
pub mod store;
pub mod worker;

pub use request::{
    ActivationPayload, DEFAULT_ARGV, SAMPLE_ARGV, SAMPLE_CONFIG, StartupRequest,
};
pub use store::PayloadStore;
pub use worker::{LaunchError, ProcessWorker, Worker, WorkerHandle, WorkerLauncher};

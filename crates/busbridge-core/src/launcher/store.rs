//! 激活负载持久化
//!
//! 守护进程被非自愿重启后，需要把最近一次交付的负载原样重新投递给 worker。

use crate::launcher::ActivationPayload;
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

const PAYLOAD_FILE: &str = "last-activation.json";
const PID_FILE: &str = "worker.pid";

pub struct PayloadStore {
    path: PathBuf,
    pid_path: PathBuf,
}

impl PayloadStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(PAYLOAD_FILE),
            pid_path: state_dir.as_ref().join(PID_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 正在运行的 worker 进程写入的 pid 文件
    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }

    /// 上一个守护进程启动的 worker 是否仍然存活
    ///
    /// 只认 pid 文件中记录且在 `/proc` 下存在的进程；残留的失效文件被删除。
    pub fn live_worker_pid(&self) -> Option<u32> {
        let content = fs::read_to_string(&self.pid_path).ok()?;
        let pid = match content.trim().parse::<u32>() {
            Ok(pid) => pid,
            Err(e) => {
                warn!("Ignoring malformed worker pid file {:?}: {e}", self.pid_path);
                let _ = fs::remove_file(&self.pid_path);
                return None;
            }
        };

        if Path::new("/proc").join(pid.to_string()).exists() {
            Some(pid)
        } else {
            debug!("Removing stale worker pid file for pid {pid}");
            let _ = fs::remove_file(&self.pid_path);
            None
        }
    }

    /// 保存负载（覆盖之前的记录）
    pub fn save(&self, payload: &ActivationPayload) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(payload)?;
        // 先写临时文件再重命名，避免被杀死时留下半个文件
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Saved activation payload to {:?}", self.path);
        Ok(())
    }

    /// 读取负载；文件不存在或损坏时返回 `None`
    pub fn load(&self) -> Option<ActivationPayload> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read stored payload {:?}: {e}", self.path);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!("Ignoring corrupt stored payload {:?}: {e}", self.path);
                None
            }
        }
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

//! Launcher Service - worker 启动与负载重新投递

use busbridge_core::ipc::ControlResponse;
use busbridge_core::{
    ActivationPayload, LaunchError, LogLevel, PayloadStore, StartupRequest, WorkerHandle,
    WorkerLauncher,
};
use std::time::UNIX_EPOCH;

/// 上一个守护进程留下、仍在运行的 worker
struct AdoptedWorker {
    pid: u32,
    payload: ActivationPayload,
}

pub struct LauncherService {
    launcher: WorkerLauncher,
    store: PayloadStore,
    current: Option<WorkerHandle>,
    adopted: Option<AdoptedWorker>,
}

impl LauncherService {
    pub fn new(launcher: WorkerLauncher, store: PayloadStore) -> Self {
        Self {
            launcher,
            store,
            current: None,
            adopted: None,
        }
    }

    /// 守护进程重启后，把上次交付的负载原样重新投递
    ///
    /// 上一个 worker 仍存活时不再启动第二个，只接管其状态。
    pub fn redeliver(&mut self) -> Result<bool, LaunchError> {
        let Some(payload) = self.store.load() else {
            tracing::debug!("No stored activation payload at {:?}", self.store.path());
            return Ok(false);
        };
        if let Some(pid) = self.store.live_worker_pid() {
            tracing::info!("Worker pid {} survived the restart, skipping redelivery", pid);
            self.adopted = Some(AdoptedWorker { pid, payload });
            return Ok(false);
        }
        tracing::info!("Redelivering stored activation payload");
        let handle = self.launcher.launch(StartupRequest::from_payload(Some(payload)))?;
        self.current = Some(handle);
        Ok(true)
    }

    /// 处理一次激活；每个守护进程生命周期只启动一个 worker
    pub fn start(&mut self, payload: Option<ActivationPayload>) -> ControlResponse {
        if let Some(current) = &self.current {
            return ControlResponse::Error {
                message: format!("Worker already running on thread {}", current.thread_name()),
            };
        }
        if let Some(pid) = self.store.live_worker_pid() {
            return ControlResponse::Error {
                message: format!("Worker already running as pid {}", pid),
            };
        }

        let request = StartupRequest::from_payload(payload);
        if let Some(level) = LogLevel::from_argv(request.argv()) {
            tracing::info!("Worker verbosity: {}", level);
        }
        if let Err(e) = self.store.save(&request.to_payload()) {
            // 无法持久化只影响重启后的重新投递
            tracing::warn!("Failed to store activation payload: {}", e);
        }

        match self.launcher.launch(request) {
            Ok(handle) => {
                let message = format!("Worker started on thread {}", handle.thread_name());
                self.current = Some(handle);
                ControlResponse::Ok { message }
            }
            Err(e) => {
                tracing::error!("Worker launch failed: {}", e);
                ControlResponse::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    pub fn status(&self) -> ControlResponse {
        let adopted = self
            .adopted
            .as_ref()
            .filter(|a| self.current.is_none() && self.store.live_worker_pid() == Some(a.pid));
        if let Some(adopted) = adopted {
            let request = StartupRequest::from_payload(Some(adopted.payload.clone()));
            return ControlResponse::Status {
                running: true,
                argv: request.argv().to_vec(),
                config_len: request.config().len(),
                started_at: None,
            };
        }

        match &self.current {
            Some(handle) => ControlResponse::Status {
                running: true,
                argv: handle.request().argv().to_vec(),
                config_len: handle.request().config().len(),
                started_at: handle
                    .started_at()
                    .duration_since(UNIX_EPOCH)
                    .ok()
                    .map(|d| d.as_secs()),
            },
            None => ControlResponse::Status {
                running: false,
                argv: vec![],
                config_len: 0,
                started_at: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("busbridge-daemon-{}", uuid::Uuid::new_v4()))
    }

    fn recording_launcher() -> (WorkerLauncher, mpsc::Receiver<Vec<String>>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let launcher = WorkerLauncher::new(move |argv: &[String], _config: &str| -> i32 {
            let _ = tx.lock().unwrap().send(argv.to_vec());
            0
        });
        (launcher, rx)
    }

    #[test]
    fn test_start_once_and_status() {
        let dir = temp_dir();
        let (launcher, rx) = recording_launcher();
        let mut service = LauncherService::new(launcher, PayloadStore::new(&dir));

        assert!(matches!(
            service.status(),
            ControlResponse::Status { running: false, .. }
        ));

        let payload = ActivationPayload::sample();
        assert!(matches!(
            service.start(Some(payload.clone())),
            ControlResponse::Ok { .. }
        ));
        assert_eq!(Some(rx.recv_timeout(Duration::from_secs(5)).unwrap()), payload.argv);

        match service.status() {
            ControlResponse::Status {
                running,
                argv,
                config_len,
                started_at,
            } => {
                assert!(running);
                assert_eq!(Some(argv), payload.argv);
                assert_eq!(Some(config_len), payload.config.map(|c| c.len()));
                assert!(started_at.is_some());
            }
            other => panic!("unexpected response: {:?}", other),
        }

        assert!(matches!(service.start(None), ControlResponse::Error { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_redeliver_after_restart() {
        let dir = temp_dir();
        let payload = ActivationPayload::new(vec!["worker".into(), "--verbosity=7".into()], "");

        let (launcher, _rx) = recording_launcher();
        let mut first = LauncherService::new(launcher, PayloadStore::new(&dir));
        first.start(Some(payload.clone()));

        // 模拟重启
        let (launcher, rx) = recording_launcher();
        let mut restarted = LauncherService::new(launcher, PayloadStore::new(&dir));
        assert!(restarted.redeliver().unwrap());
        assert_eq!(Some(rx.recv_timeout(Duration::from_secs(5)).unwrap()), payload.argv);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_surviving_worker_is_not_launched_twice() {
        let dir = temp_dir();
        let payload = ActivationPayload::sample();
        let store = PayloadStore::new(&dir);
        store.save(&payload).unwrap();
        // 本测试进程代替仍在运行的 worker
        std::fs::write(store.pid_path(), std::process::id().to_string()).unwrap();

        let (launcher, rx) = recording_launcher();
        let mut restarted = LauncherService::new(launcher, store);
        assert!(!restarted.redeliver().unwrap());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        match restarted.status() {
            ControlResponse::Status { running, argv, .. } => {
                assert!(running);
                assert_eq!(Some(argv), payload.argv);
            }
            other => panic!("unexpected response: {:?}", other),
        }
        assert!(matches!(restarted.start(None), ControlResponse::Error { .. }));
        assert!(rx.try_recv().is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_stale_pid_file_does_not_block_redelivery() {
        let dir = temp_dir();
        let payload = ActivationPayload::sample();
        let store = PayloadStore::new(&dir);
        store.save(&payload).unwrap();
        std::fs::write(store.pid_path(), "4000000000").unwrap();

        let (launcher, rx) = recording_launcher();
        let mut restarted = LauncherService::new(launcher, store);
        assert!(restarted.redeliver().unwrap());
        assert_eq!(Some(rx.recv_timeout(Duration::from_secs(5)).unwrap()), payload.argv);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_redeliver_without_stored_payload() {
        let dir = temp_dir();
        let (launcher, _rx) = recording_launcher();
        let mut service = LauncherService::new(launcher, PayloadStore::new(&dir));
        assert!(!service.redeliver().unwrap());
        assert!(matches!(
            service.status(),
            ControlResponse::Status { running: false, .. }
        ));
    }
}

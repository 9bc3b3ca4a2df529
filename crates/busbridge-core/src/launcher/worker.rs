//! Worker 执行上下文
//!
//! worker 在独立的、分离的 OS 线程中运行，预期永不返回。启动器既不等待它，
//! 也不提供停止它的接口：worker 只会被外部强制终止。

use crate::launcher::StartupRequest;
use log::{debug, error, info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::SystemTime;

/// 启动错误
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// 长期运行的 worker
///
/// `run` 阻塞当前线程，正常情况下永不返回。返回值仅用于日志。
pub trait Worker: Send + Sync + 'static {
    fn run(&self, argv: &[String], config: &str) -> i32;
}

impl<F> Worker for F
where
    F: Fn(&[String], &str) -> i32 + Send + Sync + 'static,
{
    fn run(&self, argv: &[String], config: &str) -> i32 {
        self(argv, config)
    }
}

/// 以外部进程方式运行 worker
///
/// argv[0] 作为进程的约定名称，其余参数原样传递；配置文档写入子进程 stdin 后关闭。
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    program: PathBuf,
    pid_file: Option<PathBuf>,
}

impl ProcessWorker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            pid_file: None,
        }
    }

    /// 子进程存活期间把 pid 写入该文件，退出后删除
    pub fn with_pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    fn write_pid(&self, pid: u32) {
        let Some(path) = &self.pid_file else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, pid.to_string()) {
            warn!("Failed to write worker pid file {path:?}: {e}");
        }
    }

    fn remove_pid(&self) {
        if let Some(path) = &self.pid_file {
            let _ = std::fs::remove_file(path);
        }
    }

    fn spawn_and_wait(&self, argv: &[String], config: &str) -> std::io::Result<i32> {
        let mut command = Command::new(&self.program);
        if let Some((name, args)) = argv.split_first() {
            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt;
                command.arg0(name);
            }
            #[cfg(not(unix))]
            let _ = name;
            command.args(args);
        }
        command.stdin(Stdio::piped());

        let mut child = command.spawn()?;
        debug!("Worker process started: pid={}", child.id());
        self.write_pid(child.id());

        if let Some(mut stdin) = child.stdin.take() {
            // worker 可能不读配置就退出，写失败后仍需回收子进程
            if let Err(e) = stdin.write_all(config.as_bytes()) {
                warn!("Failed to pipe config to worker: {e}");
            }
            // drop 关闭 stdin，worker 读到 EOF
        }

        let status = child.wait();
        self.remove_pid();
        Ok(status?.code().unwrap_or(-1))
    }
}

impl Worker for ProcessWorker {
    fn run(&self, argv: &[String], config: &str) -> i32 {
        info!(
            "Running worker {:?} (argc={}, config {} bytes)",
            self.program,
            argv.len(),
            config.len()
        );
        match self.spawn_and_wait(argv, config) {
            Ok(code) => code,
            Err(e) => {
                error!("Worker process failed: {e}");
                -1
            }
        }
    }
}

/// 已启动 worker 的描述
///
/// 仅记录启动时的信息，不能用于观察或停止 worker。
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    request: StartupRequest,
    started_at: SystemTime,
    thread_name: String,
}

impl WorkerHandle {
    pub fn request(&self) -> &StartupRequest {
        &self.request
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }
}

/// Worker 启动器
pub struct WorkerLauncher {
    worker: Arc<dyn Worker>,
}

impl WorkerLauncher {
    pub fn new(worker: impl Worker) -> Self {
        Self {
            worker: Arc::new(worker),
        }
    }

    /// 在分离线程中启动 worker
    ///
    /// 只有线程创建失败会返回错误；worker 的退出不会被观察到。
    pub fn launch(&self, request: StartupRequest) -> Result<WorkerHandle, LaunchError> {
        let thread_name = format!("worker-{}", request.program_name());
        let worker = Arc::clone(&self.worker);
        let argv = request.argv().to_vec();
        let config = request.config().to_string();

        info!(
            "Launching worker '{}' with {} argument(s)",
            request.program_name(),
            argv.len()
        );

        // JoinHandle 被丢弃，线程分离
        std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let rc = worker.run(&argv, &config);
                log::warn!("Worker returned unexpectedly: rc={rc}");
            })?;

        Ok(WorkerHandle {
            request,
            started_at: SystemTime::now(),
            thread_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::ActivationPayload;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_worker_receives_exact_request() {
        let (tx, rx) = mpsc::channel();
        let launcher = WorkerLauncher::new(move |argv: &[String], config: &str| -> i32 {
            tx.send((argv.to_vec(), config.to_string())).unwrap();
            0
        });

        let argv = vec!["svc".to_string(), "--no-bt".to_string()];
        let request =
            StartupRequest::from_payload(Some(ActivationPayload::new(argv.clone(), "<c/>")));
        let handle = launcher.launch(request).unwrap();

        let (seen_argv, seen_config) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(seen_argv, argv);
        assert_eq!(seen_config, "<c/>");
        assert_eq!(handle.thread_name(), "worker-svc");
    }

    #[test]
    fn test_launch_returns_while_worker_blocks() {
        let (started_tx, started_rx) = mpsc::channel();
        let launcher = WorkerLauncher::new(move |_: &[String], _: &str| -> i32 {
            started_tx.send(()).unwrap();
            loop {
                std::thread::park();
            }
        });

        let handle = launcher.launch(StartupRequest::default()).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(handle.request(), &StartupRequest::default());

        // 启动器先于 worker 结束
        drop(launcher);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_worker_pipes_config_to_stdin() {
        let dir = std::env::temp_dir().join(format!("busbridge-worker-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let out = dir.join("config.out");

        let worker = ProcessWorker::new("/bin/sh");
        let argv = vec![
            "fake-worker".to_string(),
            "-c".to_string(),
            format!("cat > {}", out.display()),
        ];
        let rc = worker.run(&argv, "<busconfig/>");

        assert_eq!(rc, 0);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "<busconfig/>");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_worker_reaps_child_that_ignores_config() {
        let worker = ProcessWorker::new("/bin/sh");
        let argv = vec![
            "fake-worker".to_string(),
            "-c".to_string(),
            "exit 3".to_string(),
        ];
        // 超过管道缓冲区，子进程退出后写入必然失败
        let config = "x".repeat(1 << 20);
        assert_eq!(worker.run(&argv, &config), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_worker_pid_file_lifetime() {
        let dir = std::env::temp_dir().join(format!("busbridge-worker-{}", uuid::Uuid::new_v4()));
        let pid_file = dir.join("worker.pid");
        let seen = dir.join("pid.seen");

        let worker = ProcessWorker::new("/bin/sh").with_pid_file(&pid_file);
        let argv = vec![
            "fake-worker".to_string(),
            "-c".to_string(),
            // 配置在写 pid 之后才送达
            format!("read _; cat {} > {}", pid_file.display(), seen.display()),
        ];
        assert_eq!(worker.run(&argv, "go\n"), 0);

        let pid: u32 = std::fs::read_to_string(&seen).unwrap().trim().parse().unwrap();
        assert!(pid > 0);
        assert!(!pid_file.exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_process_worker_missing_program() {
        let worker = ProcessWorker::new("/nonexistent/busbridge-worker");
        assert_eq!(worker.run(&["w".to_string()], ""), -1);
    }
}

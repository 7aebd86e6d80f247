use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::config::LauncherConfig;
use crate::python_env;
use crate::supervisor::error::{LauncherError, Result};

/// 로그 tail 로 읽어오는 최대 바이트
const LOG_TAIL_BYTES: u64 = 4096;

/// 종료 시그널 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Term,
    Kill,
}

impl StopSignal {
    pub fn from_force(force: bool) -> Self {
        if force {
            Self::Kill
        } else {
            Self::Term
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Term => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }
}

/// PID 에 종료 시그널을 보냅니다. 전달 후 실제 종료 여부는 확인하지 않습니다.
pub fn send_signal(pid: u32, signal: StopSignal) -> Result<()> {
    tracing::info!("Sending {} to pid {}", signal.name(), pid);

    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| LauncherError::Signal {
            pid,
            reason: "pid out of range".into(),
        })?;
        let sig = match signal {
            StopSignal::Term => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        };
        signal::kill(Pid::from_raw(raw), sig).map_err(|e| LauncherError::Signal {
            pid,
            reason: e.to_string(),
        })?;
    }

    #[cfg(not(unix))]
    {
        let mut cmd = Command::new("taskkill");
        cmd.args(["/PID", &pid.to_string()]);
        if signal == StopSignal::Kill {
            cmd.arg("/F");
        }
        let status = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| LauncherError::from_spawn("taskkill", e))?;
        if !status.success() {
            return Err(LauncherError::Signal {
                pid,
                reason: format!("taskkill exited with {status}"),
            });
        }
    }

    Ok(())
}

/// 서버 실행 명령: `<venv python> -m streamlit run <app> --server.port <port>`
///
/// venv 활성화에 해당하는 환경변수를 붙이고 작업 디렉토리를 프로젝트로 고정합니다.
pub fn server_command(cfg: &LauncherConfig, venv_python: &Path, headless: bool) -> Command {
    let mut cmd = Command::new(venv_python);
    cmd.args(["-m", "streamlit", "run"])
        .arg(&cfg.app)
        .arg("--server.port")
        .arg(cfg.port.to_string());
    if headless {
        // 브라우저는 런처가 직접 엽니다
        cmd.args(["--server.headless", "true"]);
    }
    cmd.current_dir(&cfg.project_dir);
    for (key, value) in python_env::activation_env(&cfg.venv_dir) {
        cmd.env(key, value);
    }
    cmd
}

/// 프로세스를 분리(detach)하여 실행: 부모/터미널 종료 후에도 유지
///
/// stdout/stderr 는 `log_file` 로 리다이렉트 (실행마다 덮어씀).
pub fn spawn_detached(cmd: &mut Command, log_file: &Path) -> Result<Child> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = File::create(log_file)?;
    let log_err = log.try_clone()?;

    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // 새 프로세스 그룹 → 터미널의 SIGINT/SIGHUP 이 서버로 전달되지 않음
        cmd.process_group(0);
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x00000008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    let program = cmd.get_program().to_string_lossy().into_owned();
    let child = cmd
        .spawn()
        .map_err(|e| LauncherError::from_spawn(&program, e))?;
    tracing::info!(
        "Spawned detached process {} ({}), logging to {}",
        child.id(),
        program,
        log_file.display()
    );
    Ok(child)
}

/// 현재 프로세스 이미지를 서버로 교체합니다 (포그라운드, 터미널에 연결).
/// 성공하면 반환하지 않습니다.
#[cfg(unix)]
pub fn exec_foreground(mut cmd: Command) -> LauncherError {
    use std::os::unix::process::CommandExt;

    let program = cmd.get_program().to_string_lossy().into_owned();
    tracing::info!("Exec {} in foreground", program);
    let err = cmd.exec();
    LauncherError::from_spawn(&program, err)
}

/// exec 가 없는 플랫폼: 자식으로 실행하고 종료까지 블록한 뒤 같은 코드로 종료
#[cfg(not(unix))]
pub fn exec_foreground(mut cmd: Command) -> LauncherError {
    let program = cmd.get_program().to_string_lossy().into_owned();
    match cmd.status() {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(e) => LauncherError::from_spawn(&program, e),
    }
}

/// 로그 파일 끝부분 (최대 4 KiB): 서버 조기 종료 리포트용
pub fn log_tail(path: &Path) -> String {
    fn read_tail(path: &Path) -> std::io::Result<String> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        file.seek(SeekFrom::Start(len.saturating_sub(LOG_TAIL_BYTES)))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).trim_end().to_string())
    }
    read_tail(path).unwrap_or_default()
}

/// 분리 실행된 서버 핸들
#[derive(Debug)]
pub struct LaunchedServer {
    pub child: Child,
    pub log_file: PathBuf,
}

impl LaunchedServer {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// 준비 대기 중 서버가 먼저 죽었는지 확인합니다.
    pub fn check_exited(&mut self) -> Option<LauncherError> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(LauncherError::ServerExited {
                code: status.code(),
                log_tail: log_tail(&self.log_file),
            }),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("try_wait on pid {} failed: {}", self.pid(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_signal_names() {
        assert_eq!(StopSignal::from_force(false), StopSignal::Term);
        assert_eq!(StopSignal::from_force(true).name(), "SIGKILL");
    }

    #[test]
    fn test_server_command_args() {
        let cfg = LauncherConfig::with_project_dir("/srv/app");
        let cmd = server_command(&cfg, Path::new("/srv/app/.venv/bin/python"), true);
        let args: Vec<_> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-m",
                "streamlit",
                "run",
                "/srv/app/app.py",
                "--server.port",
                "8501",
                "--server.headless",
                "true",
            ]
        );
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/srv/app")));
        assert!(cmd
            .get_envs()
            .any(|(k, v)| k == "VIRTUAL_ENV" && v == Some(std::ffi::OsStr::new("/srv/app/.venv"))));

        let fg = server_command(&cfg, Path::new("/srv/app/.venv/bin/python"), false);
        assert!(!fg.get_args().any(|a| a == "--server.headless"));
    }

    #[test]
    fn test_log_tail_limits_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamlit.log");
        let mut content = "x".repeat(10_000);
        content.push_str("\nTraceback: boom\n");
        std::fs::write(&path, content).unwrap();

        let tail = log_tail(&path);
        assert!(tail.len() <= LOG_TAIL_BYTES as usize);
        assert!(tail.ends_with("Traceback: boom"));
        assert_eq!(log_tail(&dir.path().join("missing.log")), "");
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_detached_writes_log_and_exits() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("logs").join("out.log");
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo hello-from-child; exit 3"]);

        let child = spawn_detached(&mut cmd, &log).unwrap();
        let mut server = LaunchedServer {
            child,
            log_file: log.clone(),
        };

        let mut exited = None;
        for _ in 0..50 {
            exited = server.check_exited();
            if exited.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        match exited {
            Some(LauncherError::ServerExited { code, log_tail }) => {
                assert_eq!(code, Some(3));
                assert!(log_tail.contains("hello-from-child"));
            }
            other => panic!("expected ServerExited, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_send_signal_terminates_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        send_signal(child.id(), StopSignal::Term).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_send_signal_to_dead_pid_fails() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        let err = send_signal(pid, StopSignal::Term).unwrap_err();
        assert_eq!(err.error_code(), "SIGNAL_FAILED");
    }

    #[test]
    fn test_spawn_missing_program_is_tool_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd = Command::new("/nonexistent/streamlit-python");
        let err = spawn_detached(&mut cmd, &dir.path().join("x.log")).unwrap_err();
        assert_eq!(err.error_code(), "TOOL_MISSING");
    }
}

use sysinfo::{Pid, System};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningProcess {
    pub pid: u32,
    pub name: String,
    /// 프로세스 커맨드라인 인수 (예: ["python", "-m", "streamlit", "run", "app.py"])
    pub cmd: Vec<String>,
}

impl RunningProcess {
    /// streamlit 서버로 보이는 프로세스인지 (stop 출력 안내용)
    pub fn looks_like_streamlit(&self) -> bool {
        self.name.to_lowercase().contains("streamlit")
            || self.cmd.iter().any(|arg| arg.to_lowercase().contains("streamlit"))
    }
}

/// 특정 PID 의 프로세스 정보 (크로스 플랫폼)
pub fn describe(pid: u32) -> Option<RunningProcess> {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.process(Pid::from_u32(pid)).map(|process| RunningProcess {
        pid,
        name: process.name().to_string(),
        cmd: process.cmd().to_vec(),
    })
}

// ── Async wrappers ─────────────────────────────────────────
// sysinfo 는 OS 프로세스 테이블 전체를 동기적으로 스캔하므로
// spawn_blocking 으로 블로킹 스레드풀에서 실행합니다.

/// `describe`의 비동기 래퍼.
pub async fn describe_async(pid: u32) -> Option<RunningProcess> {
    tokio::task::spawn_blocking(move || describe(pid))
        .await
        .unwrap_or(None)
}

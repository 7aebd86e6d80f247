//! 고정 TCP 포트 점검: 리스너 탐지, 리스너 PID 조회, 준비 대기
//!
//! `is_listening` 은 외부 프로세스 없이 TCP 연결만으로 판단하고,
//! `find_listeners` 는 `lsof` 로 LISTEN 상태 소켓의 소유 PID를 구합니다.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::supervisor::error::{LauncherError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// `host:port` 에 리스너가 있는지 확인 (TCP 연결 성공 여부)
///
/// `localhost` 처럼 여러 주소로 풀리는 호스트는 하나라도 연결되면 true.
pub fn is_listening(host: &str, port: u16) -> bool {
    let addrs: Vec<SocketAddr> = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(e) => {
            tracing::debug!("Failed to resolve {}:{}: {}", host, port, e);
            return false;
        }
    };
    addrs
        .iter()
        .any(|addr| TcpStream::connect_timeout(addr, CONNECT_TIMEOUT).is_ok())
}

/// `is_listening` 의 비동기 래퍼.
pub async fn is_listening_async(host: &str, port: u16) -> bool {
    let host = host.to_string();
    tokio::task::spawn_blocking(move || is_listening(&host, port))
        .await
        .unwrap_or(false)
}

/// 포트에 직접 bind 를 시도해 비어 있는지 확인합니다.
///
/// 연결 프로브와 달리 bind 는 원자적이므로, 프로브 직후 다른 프로세스가
/// 포트를 잡은 경우도 `AddrInUse` 로 드러납니다. 소켓은 즉시 닫힙니다.
pub fn is_bindable(port: u16) -> Result<bool> {
    match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
        Ok(listener) => {
            drop(listener);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// LISTEN 상태로 포트를 점유한 프로세스 PID 목록 (중복 제거, 오름차순)
pub async fn find_listeners(port: u16) -> Result<Vec<u32>> {
    let mut cmd = Command::new("lsof");
    cmd.args(["-nP", &format!("-iTCP:{port}"), "-sTCP:LISTEN", "-t"]);

    let output = cmd
        .output()
        .await
        .map_err(|e| LauncherError::from_spawn("lsof", e))?;

    // lsof 는 일치 항목이 없으면 출력 없이 1로 종료합니다.
    // 접근 불가 파일시스템 경고 등으로 stderr 가 찰 수 있어 stdout 은 항상 파싱합니다.
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        tracing::debug!("lsof stderr: {}", stderr.trim());
    }

    let pids = parse_pid_list(&String::from_utf8_lossy(&output.stdout));
    tracing::debug!("Listeners on port {}: {:?}", port, pids);
    Ok(pids)
}

/// `lsof -t` 출력(한 줄에 PID 하나)을 파싱합니다.
/// IPv4/IPv6 소켓을 모두 가진 프로세스는 두 번 나오므로 중복을 제거합니다.
pub fn parse_pid_list(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .filter(|pid| *pid != 0)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// 준비 대기 폴링 간격: 매번 두 배, 최대 2초
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration) -> Self {
        Self {
            next: initial.min(MAX_POLL_INTERVAL),
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = (current * 2).min(MAX_POLL_INTERVAL);
        Some(current)
    }
}

/// 포트가 LISTEN 상태가 될 때까지 백오프로 폴링합니다.
///
/// 고정 지연 대신 명시적인 준비 확인: 제한 시간 안에 연결되면 경과 시간을,
/// 아니면 `ReadinessTimeout` 을 반환합니다. `early_exit` 은 매 라운드마다 호출되며
/// `Some(err)` 를 돌려주면 대기를 중단합니다 (예: 서버 프로세스 조기 종료).
pub async fn wait_until_listening<F>(
    host: &str,
    port: u16,
    timeout: Duration,
    poll_interval: Duration,
    mut early_exit: F,
) -> Result<Duration>
where
    F: FnMut() -> Option<LauncherError>,
{
    let started = Instant::now();
    let deadline = started + timeout;
    let mut backoff = Backoff::new(poll_interval);

    loop {
        if is_listening_async(host, port).await {
            let waited = started.elapsed();
            tracing::info!("Port {} is listening after {:?}", port, waited);
            return Ok(waited);
        }
        if let Some(err) = early_exit() {
            return Err(err);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(LauncherError::ReadinessTimeout {
                port,
                waited_secs: timeout.as_secs(),
            });
        }
        let delay = backoff.next().unwrap_or(MAX_POLL_INTERVAL);
        tokio::time::sleep(delay.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ephemeral_listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn free_port() -> u16 {
        let (listener, port) = ephemeral_listener();
        drop(listener);
        port
    }

    #[test]
    fn test_parse_pid_list() {
        assert_eq!(parse_pid_list("1234\n"), vec![1234]);
        assert_eq!(parse_pid_list("99\n1234\n99\n"), vec![99, 1234]);
        assert_eq!(parse_pid_list("  42  \r\n\n"), vec![42]);
        assert_eq!(parse_pid_list("garbage\n0\n"), Vec::<u32>::new());
        assert!(parse_pid_list("").is_empty());
    }

    #[test]
    fn test_is_listening_detects_bound_socket() {
        let (listener, port) = ephemeral_listener();
        assert!(is_listening("127.0.0.1", port));
        drop(listener);
        assert!(!is_listening("127.0.0.1", port));
    }

    #[test]
    fn test_is_listening_unresolvable_host() {
        assert!(!is_listening("host.invalid", 8501));
    }

    #[test]
    fn test_is_bindable() {
        let (listener, port) = ephemeral_listener();
        // wildcard bind 가 127.0.0.1 LISTEN 과 충돌하는지는 플랫폼마다 다름
        assert!(is_bindable(port).is_ok());
        #[cfg(target_os = "linux")]
        assert!(!is_bindable(port).unwrap());
        drop(listener);
        assert!(is_bindable(free_port()).unwrap());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let delays: Vec<_> = Backoff::new(Duration::from_millis(250)).take(6).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(2),
                Duration::from_secs(2),
            ]
        );
        assert_eq!(
            Backoff::new(Duration::from_secs(10)).next(),
            Some(Duration::from_secs(2))
        );
    }

    #[tokio::test]
    async fn test_wait_until_listening_immediate() {
        let (_listener, port) = ephemeral_listener();
        let waited = wait_until_listening(
            "127.0.0.1",
            port,
            Duration::from_secs(2),
            Duration::from_millis(10),
            || None,
        )
        .await
        .unwrap();
        assert!(waited < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_wait_until_listening_late_bind() {
        let port = free_port();
        let binder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            tokio::time::sleep(Duration::from_secs(3)).await;
            drop(listener);
        });

        let result = wait_until_listening(
            "127.0.0.1",
            port,
            Duration::from_secs(3),
            Duration::from_millis(20),
            || None,
        )
        .await;
        assert!(result.is_ok(), "expected readiness, got {result:?}");
        binder.abort();
    }

    #[tokio::test]
    async fn test_wait_until_listening_timeout() {
        let port = free_port();
        let err = wait_until_listening(
            "127.0.0.1",
            port,
            Duration::from_millis(200),
            Duration::from_millis(50),
            || None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LauncherError::ReadinessTimeout { port: p, .. } if p == port));
    }

    #[tokio::test]
    async fn test_wait_until_listening_guard_aborts() {
        let port = free_port();
        let mut rounds = 0;
        let err = wait_until_listening(
            "127.0.0.1",
            port,
            Duration::from_secs(5),
            Duration::from_millis(10),
            || {
                rounds += 1;
                (rounds >= 2).then(|| LauncherError::ServerExited {
                    code: Some(1),
                    log_tail: "ModuleNotFoundError: No module named 'streamlit'".into(),
                })
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.error_code(), "SERVER_EXITED");
    }

    #[tokio::test]
    async fn test_find_listeners_no_panic() {
        // lsof 유무에 따라 성공 또는 ToolMissing
        let port = free_port();
        match find_listeners(port).await {
            Ok(pids) => assert!(pids.is_empty()),
            Err(e) => println!("lsof unavailable (정상): {}", e),
        }
    }
}

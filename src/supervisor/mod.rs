//! 앱 수명주기 오케스트레이션: start / stop / run / status
//!
//! 모든 작업은 `LauncherConfig` 를 명시적으로 받습니다. 현재 작업 디렉토리나
//! 셸에서 활성화된 venv 같은 프로세스 전역 상태에는 의존하지 않습니다.

pub mod error;
pub mod lock;
pub mod process;
pub mod state_machine;

use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::browser;
use crate::config::LauncherConfig;
use crate::port;
use crate::process_monitor;
use crate::python_env;
use error::{LauncherError, Result};
use lock::LaunchLock;
use process::{LaunchedServer, StopSignal};
use state_machine::{StartPhase, StateMachine};

/// `start` 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// 포트에 이미 리스너가 있어 브라우저만 열었음
    /// `reachable == false`: 포트는 점유됐지만 `host` 로는 응답하지 않음
    AlreadyRunning {
        url: String,
        reachable: bool,
        browser_opened: bool,
    },
    /// 새 서버를 분리 실행했고 포트가 LISTEN 상태가 됨
    Launched {
        pid: u32,
        url: String,
        venv_created: bool,
        ready_after_ms: u64,
        browser_opened: bool,
    },
}

impl StartOutcome {
    pub fn lines(&self) -> Vec<String> {
        match self {
            Self::AlreadyRunning {
                url,
                reachable: true,
                ..
            } => vec![format!("✓ App is already running at {url}")],
            Self::AlreadyRunning { url, .. } => vec![format!(
                "⚠ Port is in use by another process, but {url} is not responding"
            )],
            Self::Launched {
                pid,
                url,
                venv_created,
                ready_after_ms,
                ..
            } => {
                let mut lines = Vec::new();
                if *venv_created {
                    lines.push("✓ Virtual environment created".to_string());
                }
                lines.push(format!(
                    "✓ App started at {url} (pid {pid}, ready in {:.1}s)",
                    *ready_after_ms as f64 / 1000.0
                ));
                lines
            }
        }
    }
}

/// PID 하나에 대한 시그널 전달 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopEntry {
    pub pid: u32,
    pub name: Option<String>,
    /// 커맨드라인으로 본 streamlit 여부 (프로세스 정보를 못 얻으면 None)
    pub streamlit: Option<bool>,
    pub error: Option<String>,
}

/// `stop` 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub port: u16,
    pub signal: &'static str,
    pub entries: Vec<StopEntry>,
}

impl StopReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.entries.iter().map(|e| e.pid).collect()
    }

    /// 사용자에게 보여줄 상태 줄
    pub fn lines(&self) -> Vec<String> {
        if self.entries.is_empty() {
            return vec![format!("ℹ No process listening on port {}", self.port)];
        }

        let pid_list = self
            .pids()
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let mut lines = vec![format!(
            "Stopping process(es) on port {}: {}",
            self.port, pid_list
        )];
        for entry in &self.entries {
            let mut name = entry.name.clone().unwrap_or_else(|| "unknown".into());
            if entry.streamlit == Some(false) {
                name.push_str(", not streamlit");
            }
            lines.push(match &entry.error {
                None => format!("  ✓ sent {} to {} ({})", self.signal, entry.pid, name),
                Some(err) => format!("  ✗ {} ({}): {}", entry.pid, name, err),
            });
        }
        lines
    }
}

/// `status` 결과
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub url: String,
    pub port: u16,
    pub listening: bool,
    pub listener_pids: Vec<u32>,
    pub launch_lock_owner: Option<u32>,
    pub log_file: PathBuf,
    pub python_env: serde_json::Value,
}

impl StatusReport {
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![if self.listening {
            format!("● running  {}", self.url)
        } else {
            format!("○ stopped  {}", self.url)
        }];
        if !self.listener_pids.is_empty() {
            let pids: Vec<_> = self.listener_pids.iter().map(u32::to_string).collect();
            lines.push(format!("  pids:     {}", pids.join(", ")));
        }
        if let Some(owner) = self.launch_lock_owner {
            lines.push(format!("  starting: launcher pid {owner}"));
        }
        lines.push(format!("  log:      {}", self.log_file.display()));
        lines.push(format!(
            "  venv:     {} ({})",
            self.python_env["venv_dir"].as_str().unwrap_or("?"),
            if self.python_env["available"].as_bool().unwrap_or(false) {
                "ready"
            } else {
                "not provisioned"
            }
        ));
        lines
    }
}

// ═══════════════════════════════════════════════════════════════
//  Stopper
// ═══════════════════════════════════════════════════════════════

/// 포트를 LISTEN 중인 모든 프로세스에 종료 시그널을 한 번씩 보냅니다.
/// 종료 여부는 확인하지 않습니다.
pub async fn stop(cfg: &LauncherConfig, force: bool) -> Result<StopReport> {
    let pids = port::find_listeners(cfg.port).await?;
    let signal = StopSignal::from_force(force);

    let mut described = Vec::with_capacity(pids.len());
    for pid in &pids {
        described.push(process_monitor::describe_async(*pid).await);
    }

    let mut entries = signal_all(&pids, |pid| process::send_signal(pid, signal));
    for (entry, process) in entries.iter_mut().zip(described) {
        if let Some(process) = process {
            if !process.looks_like_streamlit() {
                tracing::warn!(
                    "pid {} ({}) on port {} does not look like a streamlit server",
                    entry.pid,
                    process.name,
                    cfg.port
                );
            }
            entry.streamlit = Some(process.looks_like_streamlit());
            entry.name = Some(process.name);
        }
    }

    if entries.is_empty() {
        tracing::info!("No listener on port {}", cfg.port);
    }
    Ok(StopReport {
        port: cfg.port,
        signal: signal.name(),
        entries,
    })
}

/// 각 PID 에 정확히 한 번 `send` 를 호출합니다. 실패해도 나머지는 계속 진행합니다.
pub fn signal_all<F>(pids: &[u32], mut send: F) -> Vec<StopEntry>
where
    F: FnMut(u32) -> Result<()>,
{
    pids.iter()
        .map(|&pid| {
            let error = match send(pid) {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!("{}", e);
                    Some(e.to_string())
                }
            };
            StopEntry {
                pid,
                name: None,
                streamlit: None,
                error,
            }
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════
//  Starter (full)
// ═══════════════════════════════════════════════════════════════

/// 서버가 `http://<host>:<port>` 에서 동작하도록 멱등적으로 보장합니다.
///
/// Probe → (AlreadyRunning | Provision → Launch → Settle → Announce) → Done
pub async fn start(cfg: &LauncherConfig) -> Result<StartOutcome> {
    let _lock = LaunchLock::acquire(&cfg.lock_file)?;
    let mut sm = StateMachine::new();

    // ── Probe ──
    if port::is_listening_async(&cfg.host, cfg.port).await {
        return already_running(cfg, &mut sm, true).await;
    }

    // ── Provision ──
    sm.transition(StartPhase::Provision)?;
    ensure_entry_point(cfg)?;
    let venv = python_env::provision(cfg).await?;

    // 프로비저닝 동안 다른 누군가가 포트를 잡았을 수 있음: bind 로 재확인
    if !port::is_bindable(cfg.port)? {
        let reachable = port::is_listening_async(&cfg.host, cfg.port).await;
        if reachable {
            tracing::info!("Port {} became occupied during provisioning", cfg.port);
        } else {
            tracing::warn!(
                "Port {} is bound by another process but {} does not respond",
                cfg.port,
                cfg.url()
            );
        }
        return already_running(cfg, &mut sm, reachable).await;
    }

    // ── Launch ──
    sm.transition(StartPhase::Launch)?;
    let mut cmd = process::server_command(cfg, &venv.python, true);
    let child = process::spawn_detached(&mut cmd, &cfg.log_file)?;
    let mut server = LaunchedServer {
        child,
        log_file: cfg.log_file.clone(),
    };
    let pid = server.pid();

    // ── Settle ──
    sm.transition(StartPhase::Settle)?;
    let waited = port::wait_until_listening(
        &cfg.host,
        cfg.port,
        cfg.ready_timeout,
        cfg.poll_interval,
        || server.check_exited(),
    )
    .await
    .map_err(|e| {
        if matches!(e, LauncherError::ReadinessTimeout { .. }) {
            tracing::warn!(
                "Server pid {} is still running; see {}",
                pid,
                cfg.log_file.display()
            );
        }
        e
    })?;

    // ── Announce ──
    sm.transition(StartPhase::Announce)?;
    let browser_opened = browser::announce(cfg).await;
    sm.transition(StartPhase::Done)?;

    Ok(StartOutcome::Launched {
        pid,
        url: cfg.url(),
        venv_created: venv.created,
        ready_after_ms: duration_ms(waited),
        browser_opened,
    })
}

async fn already_running(
    cfg: &LauncherConfig,
    sm: &mut StateMachine,
    reachable: bool,
) -> Result<StartOutcome> {
    sm.transition(StartPhase::AlreadyRunning)?;
    tracing::info!("Port {} already has a listener, skipping launch", cfg.port);
    // 응답하지 않는 URL 은 열지 않음
    let browser_opened = reachable && browser::announce(cfg).await;
    sm.transition(StartPhase::Done)?;
    Ok(StartOutcome::AlreadyRunning {
        url: cfg.url(),
        reachable,
        browser_opened,
    })
}

// ═══════════════════════════════════════════════════════════════
//  Starter (minimal)
// ═══════════════════════════════════════════════════════════════

/// 무조건 프로비저닝 후 서버를 포그라운드로 실행합니다 (현재 프로세스를 교체).
/// 실패했을 때만 반환합니다.
pub async fn run_foreground(cfg: &LauncherConfig) -> Result<Infallible> {
    ensure_entry_point(cfg)?;
    let venv = python_env::provision(cfg).await?;
    let cmd = process::server_command(cfg, &venv.python, false);
    Err(process::exec_foreground(cmd))
}

// ═══════════════════════════════════════════════════════════════
//  Status
// ═══════════════════════════════════════════════════════════════

pub async fn status(cfg: &LauncherConfig) -> StatusReport {
    let listening = port::is_listening_async(&cfg.host, cfg.port).await;
    let listener_pids = match port::find_listeners(cfg.port).await {
        Ok(pids) => pids,
        Err(e) => {
            tracing::debug!("Listener lookup unavailable: {}", e);
            Vec::new()
        }
    };

    StatusReport {
        url: cfg.url(),
        port: cfg.port,
        listening,
        listener_pids,
        launch_lock_owner: lock::live_owner(&cfg.lock_file),
        log_file: cfg.log_file.clone(),
        python_env: python_env::status(cfg).await,
    }
}

fn ensure_entry_point(cfg: &LauncherConfig) -> Result<()> {
    if cfg.app.is_file() {
        Ok(())
    } else {
        Err(LauncherError::EntryPointMissing(cfg.app.clone()))
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

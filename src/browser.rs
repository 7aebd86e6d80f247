//! 기본 브라우저로 로컬 URL 열기

use std::process::Stdio;

use tokio::process::Command;

use crate::config::LauncherConfig;
use crate::supervisor::error::{LauncherError, Result};

/// 플랫폼 기본 URL 오프너
fn default_opener() -> (&'static str, Vec<&'static str>) {
    if cfg!(target_os = "macos") {
        ("open", vec![])
    } else if cfg!(target_os = "windows") {
        ("cmd", vec!["/C", "start", ""])
    } else {
        ("xdg-open", vec![])
    }
}

/// URL 을 엽니다. `browser` 설정이 있으면 그 명령을, 없으면 OS 기본 오프너를 씁니다.
pub async fn open_url(cfg: &LauncherConfig, url: &str) -> Result<()> {
    let mut cmd = match cfg.browser.as_deref() {
        Some(custom) => Command::new(custom),
        None => {
            let (program, args) = default_opener();
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        }
    };
    cmd.arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    tracing::debug!("Opening {} with {}", url, program);

    // 오프너가 띄운 브라우저가 파이프를 물고 있을 수 있어 출력은 수집하지 않음
    let status = cmd
        .status()
        .await
        .map_err(|e| LauncherError::from_spawn(&program, e))?;
    if !status.success() {
        return Err(LauncherError::Tool {
            tool: program,
            stderr: format!("exited with {status}"),
        });
    }
    Ok(())
}

/// 설정에 따라 브라우저를 엽니다. 실패는 경고만 남기고 무시합니다.
/// 실제로 열었으면 true.
pub async fn announce(cfg: &LauncherConfig) -> bool {
    if !cfg.open_browser {
        tracing::debug!("Browser disabled, skipping {}", cfg.url());
        return false;
    }
    match open_url(cfg, &cfg.url()).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Could not open browser for {}: {}", cfg.url(), e);
            false
        }
    }
}

//! Python 가상환경(venv) 매니저: 앱 전용 격리 의존성 환경
//!
//! ## 프로비저닝 흐름
//! 1. `<venv>/bin/python` 이 존재하고 동작하면 → 그대로 재사용
//! 2. 아니면 기반 인터프리터(설정값 → `python3` → `python`, 최소 3.8)를 찾아
//!    `<python> -m venv <venv>` 로 생성 (이미 있는 디렉토리에도 안전)
//! 3. `<venv python> -m pip install -r <manifest>`: 매 실행마다 재수행
//!
//! 셸의 `source .venv/bin/activate` 대신, 자식 프로세스에 `VIRTUAL_ENV` 와
//! `PATH` 를 명시적으로 넘깁니다 (`activation_env`).

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::config::LauncherConfig;
use crate::supervisor::error::{LauncherError, Result};

/// 기반 Python 최소 요구 버전
const MIN_PYTHON_VERSION: (u32, u32) = (3, 8);

/// ensure_venv 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenvState {
    /// venv 내부 Python 실행 파일
    pub python: PathBuf,
    /// 이번 호출에서 새로 생성했는지
    pub created: bool,
}

// ═══════════════════════════════════════════════════════════════
//  Public API
// ═══════════════════════════════════════════════════════════════

/// venv가 존재하고 유효한지 확인합니다. 없으면 생성합니다.
pub async fn ensure_venv(cfg: &LauncherConfig) -> Result<VenvState> {
    let python_exe = venv_python_exe(&cfg.venv_dir);

    // ── Fast path: 기존 venv 유효 ──
    if python_exe.exists() && verify_python(&python_exe).await {
        tracing::debug!("Python venv 확인 완료: {}", python_exe.display());
        return Ok(VenvState {
            python: python_exe,
            created: false,
        });
    }

    if cfg.venv_dir.exists() {
        tracing::warn!(
            "{} exists but has no working interpreter, re-running venv creation",
            cfg.venv_dir.display()
        );
    }

    let base_python = detect_base_python(&cfg.python).await?;
    tracing::info!(
        "Creating virtual environment: {} (base: {})",
        cfg.venv_dir.display(),
        base_python
    );

    if let Some(parent) = cfg.venv_dir.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let output = Command::new(&base_python)
        .arg("-m")
        .arg("venv")
        .arg(&cfg.venv_dir)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| LauncherError::from_spawn(&base_python, e))?;
    if !output.status.success() {
        return Err(LauncherError::Tool {
            tool: format!("{base_python} -m venv"),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    if !verify_python(&python_exe).await {
        return Err(LauncherError::Tool {
            tool: format!("{base_python} -m venv"),
            stderr: format!(
                "interpreter missing after creation: {}",
                python_exe.display()
            ),
        });
    }

    tracing::info!("Python venv 준비 완료: {}", python_exe.display());
    Ok(VenvState {
        python: python_exe,
        created: true,
    })
}

/// manifest(requirements.txt)로부터 의존성을 설치/갱신합니다.
///
/// pip 의 진행 출력은 터미널로 그대로 흘려보내고, stderr 만 수집해
/// 실패 시 에러 메시지로 사용합니다.
pub async fn install_requirements(venv_python: &Path, manifest: &Path) -> Result<()> {
    if !manifest.is_file() {
        return Err(LauncherError::ManifestMissing(manifest.to_path_buf()));
    }

    tracing::info!("Installing dependencies from {}", manifest.display());
    let child = Command::new(venv_python)
        .args(["-m", "pip", "install", "--disable-pip-version-check", "-r"])
        .arg(manifest)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| LauncherError::from_spawn("pip", e))?;

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(LauncherError::Tool {
            tool: "pip install".into(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// venv → manifest 설치까지 한 번에 (start / run 공통 단계)
pub async fn provision(cfg: &LauncherConfig) -> Result<VenvState> {
    let state = ensure_venv(cfg).await?;
    install_requirements(&state.python, &cfg.requirements).await?;
    Ok(state)
}

/// 시스템에서 Python ≥ 3.8 을 탐지합니다. 설정된 명령을 가장 먼저 시도합니다.
pub async fn detect_base_python(preferred: &str) -> Result<String> {
    let mut candidates = vec![preferred.to_string()];
    for fallback in ["python3", "python"] {
        if !candidates.iter().any(|c| c == fallback) {
            candidates.push(fallback.to_string());
        }
    }

    for cmd_name in &candidates {
        let mut cmd = Command::new(cmd_name);
        cmd.arg("--version").stdin(Stdio::null());
        let Ok(output) = cmd.output().await else {
            continue;
        };
        if !output.status.success() {
            continue;
        }
        // Python 2 는 버전을 stderr 로 출력
        let ver = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        match parse_python_version(&ver) {
            Some(v) if v >= MIN_PYTHON_VERSION => {
                tracing::debug!("Base Python: {} → {}", cmd_name, ver.trim());
                return Ok(cmd_name.clone());
            }
            Some((major, minor)) => tracing::debug!(
                "{} → {}.{} (최소 {}.{} 필요, 건너뜀)",
                cmd_name,
                major,
                minor,
                MIN_PYTHON_VERSION.0,
                MIN_PYTHON_VERSION.1
            ),
            None => {}
        }
    }

    Err(LauncherError::ToolMissing {
        tool: format!(
            "{} (Python >= {}.{})",
            preferred, MIN_PYTHON_VERSION.0, MIN_PYTHON_VERSION.1
        ),
    })
}

/// `source <venv>/bin/activate` 에 해당하는 환경변수
pub fn activation_env(venv_dir: &Path) -> Vec<(&'static str, OsString)> {
    let bin_dir = venv_bin_dir(venv_dir);
    let mut paths = vec![bin_dir];
    if let Some(existing) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    let path = std::env::join_paths(paths).unwrap_or_else(|_| OsString::from(venv_bin_dir(venv_dir)));

    vec![
        ("VIRTUAL_ENV", venv_dir.as_os_str().to_os_string()),
        ("PATH", path),
    ]
}

/// 진단 정보를 JSON으로 반환합니다. (`status` 서브커맨드용)
pub async fn status(cfg: &LauncherConfig) -> serde_json::Value {
    let python_exe = venv_python_exe(&cfg.venv_dir);
    let venv_ok = python_exe.exists() && verify_python(&python_exe).await;

    let mut info = serde_json::json!({
        "available": venv_ok,
        "venv_dir": cfg.venv_dir.to_string_lossy(),
        "venv_python": python_exe.to_string_lossy(),
        "requirements": cfg.requirements.to_string_lossy(),
        "requirements_present": cfg.requirements.is_file(),
    });

    if venv_ok {
        if let Ok(ver) = get_version(&python_exe).await {
            info["python_version"] = serde_json::json!(ver);
        }
    }

    info["base_python"] = match detect_base_python(&cfg.python).await {
        Ok(cmd) => serde_json::json!(cmd),
        Err(_) => serde_json::json!(null),
    };

    info
}

// ═══════════════════════════════════════════════════════════════
//  Internal: 경로 & 유틸리티
// ═══════════════════════════════════════════════════════════════

fn venv_bin_dir(venv_dir: &Path) -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        venv_dir.join("Scripts")
    }
    #[cfg(not(target_os = "windows"))]
    {
        venv_dir.join("bin")
    }
}

/// venv 내 Python 실행 파일 경로
pub fn venv_python_exe(venv_dir: &Path) -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        venv_bin_dir(venv_dir).join("python.exe")
    }
    #[cfg(not(target_os = "windows"))]
    {
        venv_bin_dir(venv_dir).join("python")
    }
}

/// Python 실행 파일이 정상 동작하는지 확인
async fn verify_python(exe: &Path) -> bool {
    let mut cmd = Command::new(exe);
    cmd.args(["-c", "import sys; print(sys.prefix)"])
        .stdin(Stdio::null());
    matches!(cmd.output().await, Ok(o) if o.status.success())
}

/// Python --version 문자열 반환
async fn get_version(exe: &Path) -> Result<String> {
    let output = Command::new(exe).arg("--version").output().await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// "Python 3.12.8" → (3, 12)
fn parse_python_version(s: &str) -> Option<(u32, u32)> {
    let s = s.trim();
    let ver_part = s
        .strip_prefix("Python ")
        .or_else(|| s.strip_prefix("python "))
        .unwrap_or(s);
    let mut parts = ver_part.split('.');
    let major = parts.next()?.trim().parse().ok()?;
    let minor = parts.next()?.trim().parse().ok()?;
    Some((major, minor))
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

//! 런처 설정: `launcher.toml` + 환경변수 + CLI 플래그
//!
//! 우선순위: CLI 플래그 > 환경변수 > 설정 파일 > 기본값.
//! 모든 상대 경로는 `project_dir` 기준으로 해석됩니다.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::supervisor::error::{LauncherError, Result};

pub const DEFAULT_PORT: u16 = 8501;
pub const CONFIG_FILE_NAME: &str = "launcher.toml";

pub const ENV_CONFIG: &str = "STREAMLIT_LAUNCHER_CONFIG";
pub const ENV_PORT: &str = "STREAMLIT_LAUNCHER_PORT";
pub const ENV_PYTHON: &str = "STREAMLIT_LAUNCHER_PYTHON";
pub const ENV_NO_BROWSER: &str = "STREAMLIT_LAUNCHER_NO_BROWSER";

/// `launcher.toml` 의 원본 형태. 모든 필드는 선택 사항입니다.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    port: Option<u16>,
    host: Option<String>,
    venv_dir: Option<PathBuf>,
    requirements: Option<PathBuf>,
    app: Option<PathBuf>,
    log_file: Option<PathBuf>,
    lock_file: Option<PathBuf>,
    python: Option<String>,
    open_browser: Option<bool>,
    browser: Option<String>,
    ready_timeout_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
}

/// start / stop / run 에 명시적으로 전달되는 설정.
/// 경로 필드는 항상 `project_dir` 기준으로 해석된 값입니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherConfig {
    pub project_dir: PathBuf,
    pub port: u16,
    pub host: String,
    pub venv_dir: PathBuf,
    pub requirements: PathBuf,
    pub app: PathBuf,
    pub log_file: PathBuf,
    pub lock_file: PathBuf,
    /// venv 생성에 쓰는 기반 인터프리터
    pub python: String,
    pub open_browser: bool,
    /// 지정 시 OS 기본 브라우저 대신 이 명령으로 URL을 엽니다
    pub browser: Option<String>,
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
}

/// CLI 에서 넘어오는 덮어쓰기 값
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_file: Option<PathBuf>,
    pub port: Option<u16>,
    pub no_browser: bool,
}

impl LauncherConfig {
    /// 기본값으로 채운 설정
    pub fn with_project_dir(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        Self {
            port: DEFAULT_PORT,
            host: "localhost".to_string(),
            venv_dir: project_dir.join(".venv"),
            requirements: project_dir.join("requirements.txt"),
            app: project_dir.join("app.py"),
            log_file: project_dir.join("streamlit.log"),
            lock_file: project_dir.join(".streamlit-launcher.lock"),
            python: "python3".to_string(),
            open_browser: true,
            browser: None,
            ready_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            project_dir,
        }
    }

    /// 프로젝트 디렉토리의 설정을 프로세스 환경변수와 함께 로드합니다.
    pub fn load(project_dir: &Path, overrides: &Overrides) -> Result<Self> {
        Self::load_with_env(project_dir, overrides, |key| std::env::var(key).ok())
    }

    /// 환경변수 조회를 주입할 수 있는 `load` (테스트용 진입점 겸용)
    pub fn load_with_env<F>(project_dir: &Path, overrides: &Overrides, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::with_project_dir(project_dir);

        let explicit = overrides
            .config_file
            .clone()
            .or_else(|| env(ENV_CONFIG).map(PathBuf::from));
        let path = match &explicit {
            Some(p) => cfg.resolve(p),
            None => project_dir.join(CONFIG_FILE_NAME),
        };

        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            let file: FileConfig = toml::from_str(&text).map_err(|e| {
                LauncherError::InvalidConfig(format!("{}: {}", path.display(), e))
            })?;
            cfg.apply_file(file);
            tracing::debug!("Loaded launcher config from {}", path.display());
        } else if explicit.is_some() {
            return Err(LauncherError::InvalidConfig(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        cfg.apply_env(&env)?;

        if let Some(port) = overrides.port {
            cfg.port = port;
        }
        if overrides.no_browser {
            cfg.open_browser = false;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(p) = file.venv_dir {
            self.venv_dir = self.resolve(&p);
        }
        if let Some(p) = file.requirements {
            self.requirements = self.resolve(&p);
        }
        if let Some(p) = file.app {
            self.app = self.resolve(&p);
        }
        if let Some(p) = file.log_file {
            self.log_file = self.resolve(&p);
        }
        if let Some(p) = file.lock_file {
            self.lock_file = self.resolve(&p);
        }
        if let Some(python) = file.python {
            self.python = python;
        }
        if let Some(open) = file.open_browser {
            self.open_browser = open;
        }
        if file.browser.is_some() {
            self.browser = file.browser;
        }
        if let Some(secs) = file.ready_timeout_secs {
            self.ready_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = file.poll_interval_ms {
            self.poll_interval = Duration::from_millis(ms);
        }
    }

    fn apply_env<F>(&mut self, env: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = env(ENV_PORT) {
            self.port = raw.trim().parse().map_err(|_| {
                LauncherError::InvalidConfig(format!("{ENV_PORT}={raw} is not a valid port"))
            })?;
        }
        if let Some(python) = env(ENV_PYTHON).filter(|s| !s.trim().is_empty()) {
            self.python = python;
        }
        if let Some(flag) = env(ENV_NO_BROWSER) {
            let flag = flag.trim();
            if ["1", "true", "yes"].iter().any(|v| flag.eq_ignore_ascii_case(v)) {
                self.open_browser = false;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(LauncherError::InvalidConfig("port must be non-zero".into()));
        }
        if self.host.trim().is_empty() {
            return Err(LauncherError::InvalidConfig("host must not be empty".into()));
        }
        if self.ready_timeout.is_zero() || self.poll_interval.is_zero() {
            return Err(LauncherError::InvalidConfig(
                "ready_timeout_secs and poll_interval_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    fn resolve(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.project_dir.join(p)
        }
    }

    /// 브라우저로 여는 로컬 URL
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

//! Launcher 전용 에러 타입: 에러 종류를 구분하여 바이너리가
//! 적절한 종료 코드를 반환할 수 있게 합니다.

use std::path::PathBuf;

/// start / stop / run 작업 중 발생할 수 있는 에러 유형
#[derive(thiserror::Error, Debug)]
pub enum LauncherError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Required tool '{tool}' was not found on PATH")]
    ToolMissing { tool: String },

    #[error("{tool} failed: {stderr}")]
    Tool { tool: String, stderr: String },

    #[error("Dependency manifest not found: {}", .0.display())]
    ManifestMissing(PathBuf),

    #[error("App entry point not found: {}", .0.display())]
    EntryPointMissing(PathBuf),

    #[error("Another launcher (pid {0}) is already starting the app")]
    LaunchInProgress(u32),

    #[error("Server exited before listening (exit code {code:?})\n{log_tail}")]
    ServerExited { code: Option<i32>, log_tail: String },

    #[error("Server did not start listening on port {port} within {waited_secs}s")]
    ReadinessTimeout { port: u16, waited_secs: u64 },

    #[error("Failed to signal pid {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl LauncherError {
    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::ToolMissing { .. } => "TOOL_MISSING",
            Self::Tool { .. } => "TOOL_FAILED",
            Self::ManifestMissing(_) => "MANIFEST_MISSING",
            Self::EntryPointMissing(_) => "ENTRY_POINT_MISSING",
            Self::LaunchInProgress(_) => "LAUNCH_IN_PROGRESS",
            Self::ServerExited { .. } => "SERVER_EXITED",
            Self::ReadinessTimeout { .. } => "READINESS_TIMEOUT",
            Self::Signal { .. } => "SIGNAL_FAILED",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 프로세스 종료 코드 매핑
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidConfig(_) => 2,
            Self::ToolMissing { .. }
            | Self::Tool { .. }
            | Self::ManifestMissing(_)
            | Self::EntryPointMissing(_) => 3,
            Self::LaunchInProgress(_)
            | Self::ServerExited { .. }
            | Self::ReadinessTimeout { .. } => 4,
            Self::Signal { .. } | Self::Io(_) | Self::Internal(_) => 1,
        }
    }

    /// JSON 에러 응답 생성 (`status --json` 출력용)
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        })
    }

    /// 실행 파일이 없어서 spawn 이 실패한 경우 `ToolMissing` 으로 변환
    pub fn from_spawn(tool: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::ToolMissing {
                tool: tool.to_string(),
            }
        } else {
            Self::Io(err)
        }
    }
}

impl From<super::state_machine::TransitionError> for LauncherError {
    fn from(err: super::state_machine::TransitionError) -> Self {
        Self::Internal(anyhow::Error::new(err))
    }
}

pub type Result<T, E = LauncherError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            LauncherError::InvalidConfig("x".into()),
            LauncherError::ToolMissing { tool: "lsof".into() },
            LauncherError::Tool {
                tool: "pip".into(),
                stderr: "boom".into(),
            },
            LauncherError::ManifestMissing(PathBuf::from("requirements.txt")),
            LauncherError::EntryPointMissing(PathBuf::from("app.py")),
            LauncherError::LaunchInProgress(42),
            LauncherError::ServerExited {
                code: Some(1),
                log_tail: String::new(),
            },
            LauncherError::ReadinessTimeout {
                port: 8501,
                waited_secs: 30,
            },
            LauncherError::Signal {
                pid: 1,
                reason: "EPERM".into(),
            },
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.error_code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(LauncherError::InvalidConfig("port".into()).exit_code(), 2);
        assert_eq!(
            LauncherError::ToolMissing { tool: "python3".into() }.exit_code(),
            3
        );
        assert_eq!(
            LauncherError::ReadinessTimeout {
                port: 8501,
                waited_secs: 5
            }
            .exit_code(),
            4
        );
    }

    #[test]
    fn test_from_spawn_not_found_maps_to_tool_missing() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        match LauncherError::from_spawn("lsof", err) {
            LauncherError::ToolMissing { tool } => assert_eq!(tool, "lsof"),
            other => panic!("unexpected: {other:?}"),
        }

        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            LauncherError::from_spawn("lsof", err),
            LauncherError::Io(_)
        ));
    }

    #[test]
    fn test_to_json_shape() {
        let json = LauncherError::LaunchInProgress(7).to_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_code"], "LAUNCH_IN_PROGRESS");
        assert!(json["error"].as_str().unwrap().contains('7'));
    }
}

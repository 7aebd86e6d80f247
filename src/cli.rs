//! 커맨드라인: `streamlit-launcher` 와 세 개의 무인자 바이너리가 공유합니다.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{LauncherConfig, Overrides};
use crate::supervisor::{self, error::LauncherError};

#[derive(Debug, Parser)]
#[command(
    name = "streamlit-launcher",
    version,
    about = "Start, stop and run a local Streamlit app"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Project directory containing the app, manifest and venv (default: cwd)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Explicit launcher.toml path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the server port
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Never open a browser tab
    #[arg(long, global = true)]
    pub no_browser: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Ensure the app is running in the background and open it in the browser
    Start,
    /// Terminate every process listening on the app port
    Stop {
        /// Send SIGKILL instead of SIGTERM
        #[arg(long)]
        force: bool,
    },
    /// Provision and run the app in the foreground
    Run,
    /// Show whether the app is running and the venv state
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

/// stderr 로 tracing 출력. stdout 은 상태 줄 전용입니다.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_config(global: &GlobalArgs) -> Result<LauncherConfig, LauncherError> {
    let project_dir = match &global.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let overrides = Overrides {
        config_file: global.config.clone(),
        port: global.port,
        no_browser: global.no_browser,
    };
    LauncherConfig::load(&project_dir, &overrides)
}

/// 서브커맨드 실행 → 종료 코드
pub async fn run(global: GlobalArgs, command: Command) -> ExitCode {
    init_tracing(global.verbose);
    let json = matches!(command, Command::Status { json: true });

    match execute(&global, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error_code = e.error_code(), "{}", e);
            if json {
                println!("{}", e.to_json());
            } else {
                eprintln!("✗ {e}");
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn execute(global: &GlobalArgs, command: Command) -> Result<(), LauncherError> {
    let cfg = load_config(global)?;

    match command {
        Command::Start => {
            let outcome = supervisor::start(&cfg).await?;
            print_lines(outcome.lines());
        }
        Command::Stop { force } => {
            let report = supervisor::stop(&cfg, force).await?;
            print_lines(report.lines());
        }
        Command::Run => {
            let err = match supervisor::run_foreground(&cfg).await {
                Ok(never) => match never {},
                Err(e) => e,
            };
            return Err(err);
        }
        Command::Status { json } => {
            let report = supervisor::status(&cfg).await;
            if json {
                let text = serde_json::to_string_pretty(&report)
                    .map_err(|e| LauncherError::Internal(e.into()))?;
                println!("{text}");
            } else {
                print_lines(report.lines());
            }
        }
    }
    Ok(())
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from(["streamlit-launcher", "stop", "--force"]);
        assert!(matches!(cli.command, Command::Stop { force: true }));

        let cli = Cli::parse_from([
            "streamlit-launcher",
            "start",
            "--port",
            "9000",
            "--no-browser",
        ]);
        assert!(matches!(cli.command, Command::Start));
        assert_eq!(cli.global.port, Some(9000));
        assert!(cli.global.no_browser);

        let cli = Cli::parse_from(["streamlit-launcher", "--project-dir", "/srv/app", "run"]);
        assert!(matches!(cli.command, Command::Run));
        assert_eq!(cli.global.project_dir, Some(PathBuf::from("/srv/app")));
    }

    #[test]
    fn test_load_config_uses_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        let global = GlobalArgs {
            project_dir: Some(dir.path().to_path_buf()),
            port: Some(9300),
            ..Default::default()
        };
        let cfg = load_config(&global).unwrap();
        assert_eq!(cfg.project_dir, dir.path());
        assert_eq!(cfg.port, 9300);
    }
}

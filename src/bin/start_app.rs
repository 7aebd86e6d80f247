//! 무인자 full starter: `streamlit-launcher start` 와 동일

use std::process::ExitCode;

use streamlit_launcher::cli::{self, Command, GlobalArgs};

#[tokio::main]
async fn main() -> ExitCode {
    cli::run(GlobalArgs::default(), Command::Start).await
}

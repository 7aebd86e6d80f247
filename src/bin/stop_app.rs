//! 무인자 stopper: `streamlit-launcher stop` 과 동일

use std::process::ExitCode;

use streamlit_launcher::cli::{self, Command, GlobalArgs};

#[tokio::main]
async fn main() -> ExitCode {
    cli::run(GlobalArgs::default(), Command::Stop { force: false }).await
}

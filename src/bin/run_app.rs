//! 무인자 minimal starter: `streamlit-launcher run` 과 동일

use std::process::ExitCode;

use streamlit_launcher::cli::{self, Command, GlobalArgs};

#[tokio::main]
async fn main() -> ExitCode {
    cli::run(GlobalArgs::default(), Command::Run).await
}

use std::process::ExitCode;

use clap::Parser;
use streamlit_launcher::cli::{self, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    cli::run(args.global, args.command).await
}

use clap::Parser;
use docker_blob_transfer::cli::{Args, Runner};
use std::process::ExitCode;

/// Exit status for any failed command
const EXIT_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let runner = match Runner::new(args) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match runner.run().await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(EXIT_FAILURE)),
        Err(e) => {
            runner.output().error(&e.to_string());
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

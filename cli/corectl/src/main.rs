//! corectl - operator entry point.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use corecluster::commands::Cli;
use corecluster::error::{exit_code, print_error};
use corecluster::output::print_report;
use corecluster::privilege::ProcessContext;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries results other tools parse.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.run(&ProcessContext).await {
        Ok(Some(report)) => {
            print_report(&report);
            if !report.is_success() {
                std::process::exit(1);
            }
        }
        Ok(None) => {}
        Err(e) => {
            print_error(&e);
            std::process::exit(exit_code(&e));
        }
    }
}

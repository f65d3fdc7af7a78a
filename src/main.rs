use clap::Parser;
use docflow::config::Config;
use tracing::error;

mod cli;

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level for this crate
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "docflow=info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let args = cli::Cli::parse();
    let config = Config::load();

    if let Err(e) = cli::run(args, config).await {
        error!("{}", e);
        if let cli::CliError::Workflow(workflow_error) = &e {
            eprintln!("{}", workflow_error.user_message());
        }
        std::process::exit(1);
    }
}

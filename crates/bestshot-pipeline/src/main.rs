//! `bestshot` command-line binary.

use clap::Parser;

use bestshot_pipeline::cli::Cli;
use bestshot_pipeline::{commands, init_tracing};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = commands::run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

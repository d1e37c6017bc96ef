//! jobscrape
//!
//! Authenticated, paginated job listing scraper with scroll stabilization,
//! retry and CSV export.

mod cli;
mod config;
mod error;
mod logging;
mod output;
mod retry;
mod scraper;
mod types;

use clap::Parser;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape(args) => cli::run_scrape(args, cli.verbose).await,
        Commands::Parse {
            input,
            format,
            base_url,
            config,
        } => cli::run_parse(input, format, base_url, config, cli.verbose),
        Commands::Combine { inputs, output } => cli::run_combine(inputs, output, cli.verbose),
    }
}

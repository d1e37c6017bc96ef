//! CLI commands for jobscrape.
//!
//! Supports live scraping, offline parsing of saved pages and merging CSV
//! exports.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::config::{AppConfig, LoggingConfig, Secret};
use crate::logging;
use crate::output::{self, CsvPageSink, OutputPaths};
use crate::retry::{retry, RetryPolicy};
use crate::scraper::parsers::JobCardParser;
use crate::scraper::{ChromePage, JobScraper, NoopSink};
use crate::types::{RunStatus, StopSignal};

#[derive(Parser)]
#[command(name = "jobscrape")]
#[command(version, about = "Scrape paginated job listings into CSV", long_about = None)]
pub struct Cli {
    /// Debug-level logging (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and scrape search result pages
    Scrape(ScrapeArgs),

    /// Extract listings from a saved HTML page
    Parse {
        /// Path to an HTML file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = ParseFormat::Text)]
        format: ParseFormat,

        /// Base URL for resolving relative links
        #[arg(long)]
        base_url: Option<String>,

        /// Config file with extraction selectors
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Merge CSV exports, dropping duplicate rows
    Combine {
        /// CSV files, or directories whose CSV files are all merged
        #[arg(value_name = "INPUTS", required = true)]
        inputs: Vec<PathBuf>,

        /// Combined output file
        #[arg(short, long, default_value = "combined_jobs.csv")]
        output: PathBuf,
    },
}

#[derive(clap::Args)]
pub struct ScrapeArgs {
    /// Login email or username
    #[arg(short, long, env = "JOBSCRAPE_USERNAME")]
    pub username: Option<String>,

    /// Login password
    #[arg(short, long, env = "JOBSCRAPE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Search keywords, used when no search URL is given
    #[arg(short = 'q', long)]
    pub search_query: Option<String>,

    /// Full search results URL
    #[arg(long)]
    pub search_url: Option<String>,

    /// Maximum number of result pages
    #[arg(short = 'n', long)]
    pub pages: Option<u32>,

    /// Directory for CSV, listing and summary files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Run the browser headless (true/false)
    #[arg(long)]
    pub headless: Option<bool>,

    /// Config file (defaults to ./jobscrape.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ParseFormat {
    /// `title - link` per line
    Text,
    Json,
}

impl ScrapeArgs {
    /// Apply command-line overrides on top of loaded configuration
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(username) = &self.username {
            config.scraping.username = username.clone();
        }
        if let Some(password) = &self.password {
            config.scraping.password = Secret::new(password.clone());
        }
        if let Some(query) = &self.search_query {
            config.scraping.search_query = query.clone();
        }
        if let Some(url) = &self.search_url {
            config.scraping.search_url = url.clone();
        }
        if let Some(pages) = self.pages {
            config.scraping.total_pages = pages;
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if let Some(headless) = self.headless {
            config.browser.headless = headless;
        }
    }
}

/// Run a live scrape.
pub async fn run_scrape(args: ScrapeArgs, verbose: bool) -> Result<()> {
    // Load configuration
    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    let _guard = logging::init(&config.logging, verbose)?;

    config.validate()?;
    config.scraping.validate_credentials()?;

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping after the current page");
                stop.trigger();
            }
        });
    }

    let scraper = JobScraper::new(&config, stop)?;
    tracing::info!(
        "Scraping up to {} pages from {}",
        config.scraping.total_pages,
        scraper.search_url()
    );

    tracing::info!("Launching browser...");
    let page = retry(
        &RetryPolicy::from_config(&config.scraping),
        "launch browser",
        || ChromePage::launch(&config.browser, config.scraping.timeouts()),
    )
    .await
    .map_err(|e| e.into_inner())?;

    let paths = OutputPaths::new(&config.output.dir, &config.output.prefix);
    let mut page_files = config
        .output
        .per_page_files
        .then(|| CsvPageSink::new(paths.clone()));

    let report = match page_files.as_mut() {
        Some(sink) => scraper.run(page, sink).await,
        None => scraper.run(page, &mut NoopSink).await,
    };
    if let Some(sink) = &page_files {
        tracing::info!("Wrote {} per-page CSV files", sink.written().len());
    }

    output::write_records(&paths.combined(), &report.records)?;
    tracing::info!(
        "Saved {} records to {}",
        report.records.len(),
        paths.combined().display()
    );
    if config.output.text_listing {
        output::write_listing_text(&paths.listing(), &report.records)?;
    }
    if config.output.summary {
        output::write_summary_json(&paths.summary(), &report.summary)?;
    }

    let summary = &report.summary;
    eprintln!(
        "Pages: {} attempted, {} completed. Records: {} ({} duplicates dropped).",
        summary.pages_attempted,
        summary.pages_completed,
        summary.total_records,
        summary.duplicates_dropped
    );
    match &summary.status {
        RunStatus::Completed => eprintln!("Status: completed"),
        RunStatus::Partial { skipped_pages } => {
            eprintln!("Status: partial (skipped pages: {:?})", skipped_pages)
        }
        RunStatus::Failed { kind, message } => eprintln!("Status: failed [{}] {}", kind, message),
    }

    if report.is_failure() {
        if let Some(e) = report.error {
            return Err(anyhow::Error::new(e).context("Scrape failed"));
        }
        anyhow::bail!("Scrape failed");
    }
    Ok(())
}

/// Extract listings from a saved page.
pub fn run_parse(
    input: PathBuf,
    format: ParseFormat,
    base_url: Option<String>,
    config_path: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let _guard = logging::init(&console_only(&config.logging), verbose)?;

    let rules = config.selectors.compile()?;
    let html = std::fs::read_to_string(&input)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let report = JobCardParser::parse(&html, base_url.as_deref(), &rules);
    eprintln!(
        "Parsed {} listings ({} fragments skipped)",
        report.records.len(),
        report.skipped.len()
    );

    match format {
        ParseFormat::Text => {
            for record in &report.records {
                println!("{} - {}", record.title, record.link);
            }
        }
        ParseFormat::Json => println!("{}", serde_json::to_string_pretty(&report.records)?),
    }
    Ok(())
}

/// Merge CSV files into one.
pub fn run_combine(inputs: Vec<PathBuf>, output_path: PathBuf, verbose: bool) -> Result<()> {
    let _guard = logging::init(&console_only(&LoggingConfig::default()), verbose)?;

    let files = expand_inputs(&inputs, &output_path)?;
    eprintln!("Found {} CSV files to combine", files.len());

    let stats = output::combine_files(&files, &output_path)?;
    eprintln!(
        "Combined {} files into {} ({} rows, {} duplicates removed, {} files skipped)",
        stats.files_read,
        output_path.display(),
        stats.rows,
        stats.duplicates_removed,
        stats.files_skipped
    );
    Ok(())
}

fn console_only(config: &LoggingConfig) -> LoggingConfig {
    LoggingConfig {
        file_enabled: false,
        ..config.clone()
    }
}

/// Replace directories with the CSV files they contain, sorted by name
fn expand_inputs(inputs: &[PathBuf], output: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Failed to list {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
                .filter(|p| p.as_path() != output)
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

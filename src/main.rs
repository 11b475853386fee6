//! Kumo main entry point
//!
//! This is the command-line interface for the Kumo crawl engine.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kumo_crawl::config::{load_config_with_hash, Config};
use kumo_crawl::crawler::{Engine, ScrapeOptions, Scraper};
use kumo_crawl::output::{print_report, write_markdown_report, JobReport};
use kumo_crawl::{CrawlParams, JobStatus, RequestMode, ReturnFormat};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Kumo: crawl orchestration and fetch-decision engine
///
/// Kumo fetches pages over plain HTTP or a headless renderer, extracts
/// readable content and links, and follows links within per-job bounds
/// while respecting robots.txt, per-host politeness and SSRF rules.
#[derive(Parser, Debug)]
#[command(name = "kumo")]
#[command(version)]
#[command(about = "Crawl orchestration and fetch-decision engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a crawl job to completion and print its report
    Crawl {
        /// Seed URL
        url: String,

        /// Tenant the job belongs to
        #[arg(long, default_value = "default")]
        tenant: String,

        /// Link depth to follow from the seed
        #[arg(long)]
        depth: Option<u32>,

        /// Maximum pages (0 means the engine cap)
        #[arg(long)]
        limit: Option<u32>,

        /// Transport: http, chrome or smart
        #[arg(long, value_parser = parse_lowercase::<RequestMode>)]
        request: Option<RequestMode>,

        /// Content format: markdown, commonmark, raw, text, xml, bytes or empty
        #[arg(long = "format", value_parser = parse_lowercase::<ReturnFormat>)]
        return_format: Option<ReturnFormat>,

        /// JSON file with full crawl parameters; flags override its fields
        #[arg(long, value_name = "FILE")]
        params: Option<PathBuf>,

        /// Idempotency key for the submission
        #[arg(long)]
        idempotency_key: Option<String>,

        /// Seconds to wait for the job before giving up
        #[arg(long, default_value_t = 600)]
        wait: u64,

        /// Also write the report as markdown
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Scrape URLs synchronously and print the results as JSON
    Scrape {
        /// URLs to scrape
        #[arg(required = true)]
        urls: Vec<String>,

        #[arg(long, default_value = "default")]
        tenant: String,

        #[arg(long, value_parser = parse_lowercase::<RequestMode>)]
        request: Option<RequestMode>,

        #[arg(long = "format", value_parser = parse_lowercase::<ReturnFormat>)]
        return_format: Option<ReturnFormat>,

        /// Include page metadata in each result
        #[arg(long)]
        metadata: bool,
    },

    /// Show a job's status from the database
    Status {
        job_id: String,

        /// Also write the report as markdown
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Print one page of a job's results as JSON
    Results {
        job_id: String,

        /// Cursor returned by the previous page
        #[arg(long)]
        cursor: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Validate the configuration and print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Crawl {
            url,
            tenant,
            depth,
            limit,
            request,
            return_format,
            params,
            idempotency_key,
            wait,
            report,
        } => {
            let mut crawl_params = match params {
                Some(path) => read_json::<CrawlParams>(&path)?,
                None => CrawlParams::new(url.clone()),
            };
            crawl_params.url = url;
            if let Some(depth) = depth {
                crawl_params.depth = depth;
            }
            if let Some(limit) = limit {
                crawl_params.limit = limit;
            }
            if let Some(request) = request {
                crawl_params.request = request;
            }
            if let Some(format) = return_format {
                crawl_params.return_format = format;
            }

            handle_crawl(
                config,
                &tenant,
                crawl_params,
                idempotency_key.as_deref(),
                Duration::from_secs(wait),
                report,
            )
            .await
        }
        Command::Scrape {
            urls,
            tenant,
            request,
            return_format,
            metadata,
        } => {
            let options = ScrapeOptions {
                request: request.unwrap_or_default(),
                return_format: return_format.unwrap_or_default(),
                metadata,
                ..ScrapeOptions::default()
            };
            handle_scrape(config, &tenant, &urls, &options).await
        }
        Command::Status { job_id, report } => handle_status(config, &job_id, report),
        Command::Results {
            job_id,
            cursor,
            limit,
        } => handle_results(config, &job_id, cursor.as_deref(), limit),
        Command::CheckConfig => handle_check_config(&config, &config_hash),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("kumo_crawl=info,warn"),
            1 => EnvFilter::new("kumo_crawl=debug,info"),
            2 => EnvFilter::new("kumo_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Submits a job, waits for it and reports on it
async fn handle_crawl(
    config: Config,
    tenant: &str,
    params: CrawlParams,
    idempotency_key: Option<&str>,
    wait: Duration,
    report_path: Option<PathBuf>,
) -> Result<()> {
    let mut engine = Engine::new(config)?;

    let job_id = engine.submit(tenant, params, idempotency_key)?;
    tracing::info!("Submitted {}", job_id);

    let job = engine.wait_for_job(&job_id, wait).await?;
    if !job.status.is_terminal() {
        tracing::warn!("{} still {} after {:?}, canceling", job_id, job.status, wait);
        engine.cancel(&job_id)?;
    }

    let report = JobReport::from_snapshot(&engine.status(&job_id)?);
    print_report(&report);
    if let Some(path) = report_path {
        write_markdown_report(&report, &path)?;
        println!("✓ Report written to: {}", path.display());
    }

    engine.shutdown();

    if report.status == JobStatus::Failed {
        bail!("Job {} failed", job_id);
    }
    Ok(())
}

async fn handle_scrape(
    config: Config,
    tenant: &str,
    urls: &[String],
    options: &ScrapeOptions,
) -> Result<()> {
    let scraper = Scraper::new(config)?;
    let results = scraper.scrape(tenant, urls, options).await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn handle_status(config: Config, job_id: &str, report_path: Option<PathBuf>) -> Result<()> {
    let engine = Engine::new(config)?;
    let report = JobReport::from_snapshot(&engine.status(job_id)?);
    print_report(&report);
    if let Some(path) = report_path {
        write_markdown_report(&report, &path)?;
    }
    Ok(())
}

fn handle_results(config: Config, job_id: &str, cursor: Option<&str>, limit: usize) -> Result<()> {
    let engine = Engine::new(config)?;
    let page = engine.results(job_id, cursor, limit)?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}

/// Validates config and prints the effective settings
fn handle_check_config(config: &Config, config_hash: &str) -> Result<()> {
    println!("=== Kumo Configuration ===\n");

    println!("Engine:");
    println!("  HTTP workers: {}", config.engine.http_workers);
    println!("  Chrome workers: {}", config.engine.chrome_workers);
    println!("  Page hard cap: {}", config.engine.max_crawl_pages_hard_cap);
    println!(
        "  Max runtime: {}s",
        config.engine.max_crawl_runtime_seconds
    );
    println!(
        "  Renderer backpressure: {}",
        config.engine.renderer_queue_backpressure
    );

    println!("\nHTTP:");
    println!("  User agent: {}", config.http.user_agent);
    println!("  Default timeout: {}ms", config.http.default_timeout_ms);
    println!("  Max redirects: {}", config.http.max_redirects);

    println!("\nRenderer:");
    match &config.renderer.base_url {
        Some(url) => println!("  Base URL: {}", url),
        None => println!("  Base URL: (not configured)"),
    }
    println!(
        "  Circuit: {} failures in {}s opens for {}s",
        config.renderer.failure_threshold,
        config.renderer.failure_window_seconds,
        config.renderer.open_seconds
    );

    println!("\nSecurity:");
    println!(
        "  Private networks: {}",
        if config.security.allow_private_networks {
            "allowed"
        } else {
            "blocked"
        }
    );

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Objects: {}", config.storage.object_root);

    println!("\nPoliteness:");
    println!("  Per-host delay: {}ms", config.politeness.per_host_delay_ms);
    println!("  Jitter: {}", config.politeness.jitter_ratio);
    println!("  Max retries: {}", config.politeness.max_retries);

    println!("\n✓ Configuration is valid (hash: {})", config_hash);
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Parses a lowercase serde enum name from a flag value
fn parse_lowercase<T: DeserializeOwned>(value: &str) -> std::result::Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.to_ascii_lowercase()))
        .map_err(|_| format!("unsupported value '{}'", value))
}

//! Meshhunt main entry point
//!
//! This is the command-line interface for the Meshhunt asset search crawler.

use anyhow::{bail, Context};
use clap::Parser;
use meshhunt::config::{load_config_with_hash, Config};
use meshhunt::crawler::{Coordinator, Services};
use meshhunt::output::{
    print_health, print_performance, print_proxies, print_recovery, print_search_summary,
    write_markdown_report, RunReport,
};
use meshhunt::proxy::{HttpProbe, ProxyPool};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Meshhunt: a resilient 3D asset search crawler
///
/// Meshhunt searches several 3D model sites at once, pacing requests per
/// site, rotating egress proxies and recovering from failures, then reports
/// system health alongside the results.
#[derive(Parser, Debug)]
#[command(name = "meshhunt")]
#[command(version = "1.0.0")]
#[command(about = "A resilient 3D asset search crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Text to search for
    #[arg(value_name = "QUERY", required_unless_present_any = ["dry_run", "check_proxies"])]
    query: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be searched without searching
    #[arg(long, conflicts_with = "check_proxies")]
    dry_run: bool,

    /// Probe every configured proxy once and exit
    #[arg(long, conflicts_with = "dry_run")]
    check_proxies: bool,

    /// Print the run report as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Also write a markdown run report to this path
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    if cli.check_proxies {
        return handle_check_proxies(&config, cli.json).await;
    }

    let Some(query) = cli.query.as_deref() else {
        bail!("a search query is required");
    };
    handle_search(&config, config_hash, query, cli.json, cli.report).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("meshhunt=info,warn"),
            1 => EnvFilter::new("meshhunt=debug,info"),
            2 => EnvFilter::new("meshhunt=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the resolved configuration
fn handle_dry_run(config: &Config) {
    println!("=== Meshhunt Dry Run ===\n");

    println!("Crawler Configuration:");
    println!(
        "  Max concurrent tasks: {}",
        config.crawler.max_concurrent_tasks
    );
    println!("  Request timeout: {}ms", config.crawler.request_timeout);
    println!(
        "  Max recovery attempts: {}",
        config.crawler.max_recovery_attempts
    );
    println!(
        "  Max attempts per site: {}",
        config.crawler.max_attempts_per_site
    );

    println!("\nUser Agent: {}", config.user_agent.header_value());

    let defaults = &config.rate_limit.defaults;
    println!("\nDefault Rate Limit:");
    println!(
        "  {} req/s, {} req/min, {} req/h, burst {}",
        defaults.requests_per_second,
        defaults.requests_per_minute,
        defaults.requests_per_hour,
        defaults.burst_allowance
    );
    println!(
        "  Adaptive delay: {}, Retry-After: {}",
        defaults.adaptive_delay, defaults.respect_retry_after
    );

    println!("\nSites ({}):", config.sites.len());
    for site in &config.sites {
        let policy = config.policy_for_site(site);
        println!(
            "  - {} [{}]{}",
            site.display_name(),
            site.id,
            if site.enabled { "" } else { " (disabled)" }
        );
        println!("    {}", site.search_url);
        println!(
            "    {} req/s, {} req/min, {} req/h",
            policy.requests_per_second, policy.requests_per_minute, policy.requests_per_hour
        );
    }

    println!(
        "\nProxies: {} configured ({})",
        config.proxy.list.len(),
        if config.proxy.enabled { "enabled" } else { "disabled" }
    );
    println!(
        "Health check every {}ms, proxy sweep every {}ms",
        config.health.check_interval, config.proxy.check_interval
    );

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would search {} sites",
        config.enabled_sites().count()
    );
}

/// Handles the --check-proxies mode: one probe sweep over the configured list
async fn handle_check_proxies(config: &Config, json: bool) -> anyhow::Result<()> {
    let pool = ProxyPool::new();
    let imported = pool.import(&config.proxy.list);
    if imported.added == 0 {
        bail!("no usable proxies configured");
    }

    let probe = HttpProbe::new(
        config.proxy.check_url.clone(),
        config.proxy.probe_timeout(),
        config.user_agent.header_value(),
    );
    let summary = pool
        .health_check(&probe, Services::probe_settings(config))
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&pool.stats())?);
    } else {
        print_proxies(&pool.snapshot());
        println!(
            "{}/{} proxies healthy ({} deactivated)",
            summary.healthy, summary.checked, summary.deactivated
        );
    }

    Ok(())
}

/// Handles the main search operation
async fn handle_search(
    config: &Config,
    config_hash: String,
    query: &str,
    json: bool,
    report_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let services = Services::from_config(config).context("Failed to build services")?;
    let coordinator = Coordinator::new(config, services);
    let tickers = coordinator.start_background();

    let cancel = coordinator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling search");
            cancel.cancel();
        }
    });

    let outcome = coordinator.search(query).await;
    for ticker in tickers {
        ticker.stop().await;
    }
    let summary = match outcome {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!("Search failed: {}", e);
            return Err(e.into());
        }
    };

    let succeeded = summary.succeeded();
    let total = summary.total_sites;
    let report = RunReport::collect(coordinator.services(), Some(summary), Some(config_hash));

    if json {
        println!("{}", report.to_json()?);
    } else {
        if let Some(search) = &report.search {
            print_search_summary(search);
        }
        println!();
        print_health(&report.health);
        print_recovery(&report.recovery);
        print_performance(&report.performance);
    }

    if let Some(path) = report_path {
        write_markdown_report(&report, &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Report written to {}", path.display());
    }

    if total > 0 && succeeded == 0 {
        bail!("no site returned results");
    }
    Ok(())
}

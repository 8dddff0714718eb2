use std::path::PathBuf;
use std::process::ExitCode;

use ajw_core::Platform;
use ajw_sync::{load_watch_list, run_watch_once, ConfigError, RunFilter, WatchConfig};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "ajw-cli")]
#[command(about = "Watches ATS job boards for keyword-matching postings")]
struct Cli {
    #[command(flatten)]
    opts: WatchOpts,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every target once and append new matches (default).
    Run,
    /// Print the configured targets after filtering, without fetching.
    Targets,
}

#[derive(Debug, Args)]
struct WatchOpts {
    /// Limit to one platform.
    #[arg(long, global = true)]
    platform: Option<Platform>,
    /// Limit to one target (slug, company, host, tenant or account).
    #[arg(long, visible_alias = "target", global = true)]
    company: Option<String>,
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    csv: Option<PathBuf>,
    #[arg(long, global = true)]
    seen: Option<PathBuf>,
    /// Keyword to match as a whole word; repeat for alternatives.
    #[arg(long = "keyword", global = true)]
    keywords: Vec<String>,
    /// Targets fetched at once.
    #[arg(long, global = true)]
    concurrency: Option<usize>,
}

impl WatchOpts {
    fn config(&self) -> WatchConfig {
        let mut config = WatchConfig::from_env();
        if let Some(path) = &self.config {
            config.config_path = path.clone();
        }
        if let Some(path) = &self.csv {
            config.csv_path = path.clone();
        }
        if let Some(path) = &self.seen {
            config.seen_path = path.clone();
        }
        if !self.keywords.is_empty() {
            config.keywords = self.keywords.clone();
        }
        if let Some(n) = self.concurrency {
            config.max_concurrent_targets = n.max(1);
        }
        config
    }

    fn filter(&self) -> RunFilter {
        RunFilter {
            platform: self.platform,
            target: self.company.clone(),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
        .init();
}

async fn run(opts: &WatchOpts) -> Result<()> {
    let summary = run_watch_once(&opts.config(), &opts.filter()).await?;

    for (platform, count) in &summary.per_platform {
        eprintln!("[SUMMARY] {platform}: {count} new");
    }
    println!("Done. New matches: {}", summary.total_new);
    Ok(())
}

async fn list_targets(opts: &WatchOpts) -> Result<()> {
    let config = opts.config();
    let watch_list = load_watch_list(&config.config_path).await?;
    let filter = opts.filter();
    for (platform, target) in watch_list.targets() {
        if filter.admits(platform, target) {
            println!("{platform}\t{target}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&cli.opts).await,
        Commands::Targets => list_targets(&cli.opts).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.downcast_ref::<ConfigError>().is_some() => {
            eprintln!("[ERROR] {err}");
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("[ERROR] {err:#}");
            ExitCode::FAILURE
        }
    }
}

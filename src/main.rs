use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use colored::Colorize;
use futures_util::future::join_all;
use gitfleet::Config;
use gitfleet::Orchestrator;
use gitfleet::Report;
use gitfleet::branch::BranchOps;
use gitfleet::orchestrator::parse_operations;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gitfleet")]
#[command(about = "Coordinate branch operations across many git repositories", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "gitfleet.json")]
    config: PathBuf,

    /// Print the full report as JSON instead of a summary
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// Repository the starter configuration should cover
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Fetch all configured branches
    Fetch {
        /// Only these repositories
        #[arg(short, long)]
        repos: Vec<String>,
    },
    /// Fetch and pull all configured branches
    Sync {
        /// Only these repositories
        #[arg(short, long)]
        repos: Vec<String>,
    },
    /// Run a list of operations in order, e.g. `run fetch pull`
    Run {
        /// Operation names (fetch, pull, push, merge, create, switch)
        #[arg(required = true)]
        operations: Vec<String>,
        /// Only these repositories
        #[arg(long)]
        repos: Vec<String>,
        /// Only these branches
        #[arg(long)]
        branches: Vec<String>,
    },
    /// List each configured repository's branches
    Branches,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path } => {
            let config = Config::default_for(&path);
            config.save(&cli.config)?;
            println!("Wrote starter config to {}", cli.config.display());
        }
        Commands::Fetch { repos } => {
            let orchestrator = Orchestrator::new(Config::load(&cli.config)?)?;
            let report = match filter(repos) {
                None => orchestrator.fetch_all().await,
                Some(repos) => {
                    orchestrator
                        .run_workflow(&["fetch".parse()?], Some(&repos), None)
                        .await
                }
            };
            emit(&report, cli.json)?;
        }
        Commands::Sync { repos } => {
            let orchestrator = Orchestrator::new(Config::load(&cli.config)?)?;
            let report = match filter(repos) {
                None => orchestrator.sync_all().await,
                Some(repos) => {
                    orchestrator
                        .run_workflow(
                            &["fetch".parse()?, "pull".parse()?],
                            Some(&repos),
                            None,
                        )
                        .await
                }
            };
            emit(&report, cli.json)?;
        }
        Commands::Run {
            operations,
            repos,
            branches,
        } => {
            let operations = parse_operations(&operations)?;
            let orchestrator = Orchestrator::new(Config::load(&cli.config)?)?;
            let report = orchestrator
                .run_workflow(
                    &operations,
                    filter(repos).as_deref(),
                    filter(branches).as_deref(),
                )
                .await;
            emit(&report, cli.json)?;
        }
        Commands::Branches => {
            list_branches(&Config::load(&cli.config)?).await;
        }
    }

    Ok(())
}

fn filter(names: Vec<String>) -> Option<Vec<String>> {
    if names.is_empty() { None } else { Some(names) }
}

fn emit(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", report.to_json()?);
    } else {
        report.render_summary(&mut std::io::stdout())?;
    }
    Ok(())
}

/// Print every configured repository's live branch listing.
async fn list_branches(config: &Config) {
    let retry = config.retry_policy();
    let facades: Vec<BranchOps> = config
        .repositories
        .iter()
        .map(|repo| BranchOps::new(repo.clone(), retry))
        .collect();

    let listings = join_all(facades.iter().map(|f| f.list_branches(false))).await;

    for (repo, branches) in config.repositories.iter().zip(listings) {
        println!("{}", repo.name.bold());

        if branches.is_empty() {
            println!("  {}", "(no branches)".dimmed());
            continue;
        }

        for info in branches {
            let marker = if info.current { "*" } else { " " };
            let tracking = match &info.remote {
                Some(remote) if info.ahead > 0 || info.behind > 0 => {
                    format!(" [{remote}: ahead {}, behind {}]", info.ahead, info.behind)
                }
                Some(remote) => format!(" [{remote}]"),
                None => String::new(),
            };
            println!(
                "{} {}{}",
                marker.green(),
                info.name.cyan(),
                tracking.dimmed()
            );
        }
    }
}

mod config;
mod db;
mod formatting;
mod github;
mod http;
mod identifier;
mod reconcile;
mod summary;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use config::Config;
use db::Database;
use formatting::{commit_subject, format_line_count, truncate_str};
use github::{GitHubClient, GitHubConfig};
use reconcile::{query_github, QueryMode};

#[derive(Parser)]
#[command(name = "github-status")]
#[command(version)]
#[command(about = "Track GitHub repositories: line delta, top committers and latest commit")]
#[command(after_help = "\x1b[36mExamples:\x1b[0m
  github-status serve                 # Web UI and API on 127.0.0.1:5000
  github-status add rust-lang/rust    # Start tracking a repository
  github-status update rust-lang/rust # Refresh its metadata
  github-status list                  # Show tracked repositories")]
struct Cli {
    /// SQLite database file (default: platform data directory)
    #[arg(long, global = true, env = "GITHUB_STATUS_DB")]
    db: Option<PathBuf>,

    /// GitHub API base URL (default: $GITHUB_API_URL or https://api.github.com)
    #[arg(long, global = true)]
    api_base: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the web server (index, details, query API)
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: IpAddr,

        /// Port to listen on
        #[arg(short, long, default_value = "5000")]
        port: u16,
    },

    /// Start tracking a repository (e.g., "owner/project")
    Add {
        repo: String,
    },

    /// Refresh metadata of a tracked repository
    Update {
        repo: String,
    },

    /// List tracked repositories
    List,

    /// Show stored metadata for one repository
    Show {
        repo: String,
    },

    /// Stop tracking every repository
    Clear,

    /// Check GitHub API rate limit
    RateLimit,
}

fn init_tracing() {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("github_status=info,tower_http=info"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let db_path = match cli.db {
        Some(path) => path,
        None => Config::db_path()?,
    };
    let db = Database::open(&db_path)?;
    tracing::debug!(path = %db.path().display(), "database opened");

    match cli.command {
        Commands::Serve { bind, port } => {
            let client = github_client(cli.api_base)?;
            let state = http::AppState::new(db, client);
            http::start_server(state, SocketAddr::new(bind, port)).await
        }
        Commands::Add { repo } => {
            let client = github_client(cli.api_base)?;
            run_query(db, &client, &repo, QueryMode::Add).await
        }
        Commands::Update { repo } => {
            let client = github_client(cli.api_base)?;
            run_query(db, &client, &repo, QueryMode::Update).await
        }
        Commands::List => list_repos(&db),
        Commands::Show { repo } => show_repo(&db, &repo),
        Commands::Clear => {
            let removed = db.delete_all()?;
            eprintln!("\x1b[32mok\x1b[0m Removed {} repositories", removed);
            Ok(())
        }
        Commands::RateLimit => check_rate_limit(&github_client(cli.api_base)?).await,
    }
}

/// Resolve the token and build the client; only commands that call GitHub do this
fn github_client(api_base: Option<String>) -> Result<GitHubClient> {
    let token = Config::github_token();
    if token.is_none() {
        tracing::warn!("no GitHub token found, rate limit is 60 requests/hour (set GITHUB_TOKEN or run: gh auth login)");
    }
    GitHubClient::new(GitHubConfig {
        api_base: api_base.unwrap_or_else(Config::api_base),
        token,
        ..GitHubConfig::default()
    })
    .context("Failed to create HTTP client")
}

async fn run_query(db: Database, client: &GitHubClient, repo: &str, mode: QueryMode) -> Result<()> {
    let db = Mutex::new(db);
    match query_github(&db, client, repo, mode).await {
        Ok(()) => {
            eprintln!("\x1b[32mok\x1b[0m {}", repo);
            Ok(())
        }
        Err(e) if e.is_storage() => Err(e.into()),
        Err(e) => {
            eprintln!("\x1b[31mx\x1b[0m {}", e);
            std::process::exit(1);
        }
    }
}

fn list_repos(db: &Database) -> Result<()> {
    let records = db.list_records()?;
    if records.is_empty() {
        eprintln!("No repositories tracked yet.");
        eprintln!("  Run: github-status add <owner/project>");
        return Ok(());
    }

    for record in &records {
        println!(
            "{:<40} {:>12}  {:<30} {}",
            record.url,
            format_line_count(record.line_count),
            record.top_committers,
            truncate_str(commit_subject(&record.last_commit), 50)
        );
    }
    Ok(())
}

fn show_repo(db: &Database, repo: &str) -> Result<()> {
    let Some(record) = db.get_by_url(repo)? else {
        eprintln!("\x1b[31mx\x1b[0m {} is not being tracked", repo);
        std::process::exit(1);
    };

    println!("\x1b[1m{}\x1b[0m", record.url);
    println!("  Line count:     {}", format_line_count(record.line_count));
    println!("  Top committers: {}", record.committers().collect::<Vec<_>>().join(", "));
    println!("  Last commit:");
    for line in record.last_commit.lines() {
        println!("    {}", line);
    }
    Ok(())
}

async fn check_rate_limit(client: &GitHubClient) -> Result<()> {
    let limits = client.rate_limit().await?;
    let core = limits.core;
    eprintln!(
        "REST API: {}/{} remaining (resets at unix {})",
        core.remaining, core.limit, core.reset
    );
    Ok(())
}

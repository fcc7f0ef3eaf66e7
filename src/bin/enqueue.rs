//! CLI tool to enqueue one analysis task.
//!
//! Usage:
//!   collector-enqueue github.com/octocat/Hello-World
//!   collector-enqueue --redis redis://localhost:6379 https://github.com/owner/repo.git

use clap::Parser;
use tracing::info;

use collector_lib::config::LogFormat;
use collector_lib::handlers::{AnalyzePayload, TYPE_ANALYZE};
use collector_lib::models::{AnalyzeRequest, ValidationError};
use collector_lib::queue::{QueueClient, TaskEnqueuer};
use collector_lib::telemetry;

#[derive(Parser, Debug)]
#[command(name = "collector-enqueue")]
#[command(about = "Enqueue a repository for test inventory analysis", long_about = None)]
struct Cli {
    /// GitHub repository (owner/repo, github.com/owner/repo or a full URL)
    github_url: String,

    /// Redis URL
    #[arg(long, env = "REDIS_URL")]
    redis: String,

    /// User whose OAuth token should be used for private repositories
    #[arg(long)]
    user_id: Option<String>,

    /// Queue name
    #[arg(long, env = "QUEUE_NAME", default_value = "default")]
    queue: String,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
enum UrlError {
    #[error("repository URL is empty")]
    Empty,

    #[error("unsupported host in {0:?}: only github.com is accepted")]
    UnsupportedHost(String),

    #[error("expected owner/repo in {0:?}")]
    MalformedPath(String),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Extract `(owner, repo)` from the accepted GitHub URL forms.
fn parse_github_url(input: &str) -> Result<(String, String), UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let had_scheme = without_scheme.len() != trimmed.len();
    let without_www = without_scheme.strip_prefix("www.").unwrap_or(without_scheme);

    let path = match without_www.split_once('/') {
        Some((host, rest)) if host.eq_ignore_ascii_case("github.com") => rest,
        Some((host, _)) if had_scheme || host.contains('.') || host.contains(':') => {
            return Err(UrlError::UnsupportedHost(trimmed.to_string()));
        }
        _ if had_scheme => return Err(UrlError::UnsupportedHost(trimmed.to_string())),
        _ => without_www,
    };

    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);

    let mut segments = path.split('/');
    let (Some(owner), Some(repo), None) = (segments.next(), segments.next(), segments.next()) else {
        return Err(UrlError::MalformedPath(trimmed.to_string()));
    };
    if owner.is_empty() || repo.is_empty() {
        return Err(UrlError::MalformedPath(trimmed.to_string()));
    }

    AnalyzeRequest::new(owner, repo).validate()?;
    Ok((owner.to_string(), repo.to_string()))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    telemetry::init_tracing(LogFormat::Text);

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.redis.trim().is_empty() {
        return Err("Redis URL is required (use --redis or set REDIS_URL)".into());
    }

    let (owner, repo) = parse_github_url(&cli.github_url)?;
    let payload = serde_json::to_vec(&AnalyzePayload {
        owner: owner.clone(),
        repo: repo.clone(),
        user_id: cli.user_id,
    })?;

    let client = QueueClient::connect(&cli.redis, &cli.queue).await?;
    let task = client
        .enqueue(TYPE_ANALYZE, &payload)
        .await
        .map_err(|e| format!("failed to enqueue task: {}", e))?;

    info!(id = %task.id, queue = %task.queue, owner = %owner, repo = %repo, "Task enqueued");
    Ok(())
}

//! Collector worker - main entry point.
//!
//! Consumes analysis tasks from the Redis queue until SIGINT/SIGTERM.

use std::sync::Arc;

use tracing::{error, info};

use collector_lib::config::{WorkerConfig, mask_url};
use collector_lib::db::DbPool;
use collector_lib::handlers::{AnalyzeHandler, TYPE_ANALYZE};
use collector_lib::queue::{QueueServer, ServeMux, ServerOptions};
use collector_lib::services::token_lookup::TokenLookup;
use collector_lib::services::{
    Analyzer, AnalyzerOptions, CommandParser, GitVcs, OAuthTokenStore, TokenCipher,
};
use collector_lib::{shutdown, telemetry};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match WorkerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            telemetry::init_tracing(Default::default());
            error!("Failed to load configuration: {}", e);
            error!("Required: DATABASE_URL, REDIS_URL, ENCRYPTION_KEY");
            std::process::exit(1);
        }
    };
    telemetry::init_tracing(config.log_format);

    if let Err(e) = run(config).await {
        error!("Worker failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: WorkerConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("========================================");
    info!("  Test Inventory Collector worker v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!(
        database_url = %mask_url(&config.database.url),
        redis_url = %mask_url(&config.redis_url),
        queue = %config.queue_name,
        "Configuration loaded"
    );

    let pool = DbPool::new(&config.database).await?;
    info!("Database connection established");
    pool.run_migrations().await?;
    info!("Database migrations complete");

    let cipher = TokenCipher::from_base64(&config.encryption_key)?;
    let tokens: Arc<dyn TokenLookup> = Arc::new(OAuthTokenStore::new(pool.clone(), cipher));
    let parser = CommandParser::new(&config.parser_command)?;
    info!(scanner = %parser.program(), "Scanner configured");

    let analyzer = Arc::new(Analyzer::new(
        Arc::new(pool.clone()),
        Arc::new(GitVcs::new()),
        Arc::new(parser),
        Some(tokens),
        AnalyzerOptions {
            analysis_timeout: config.analysis_timeout,
            max_concurrent_clones: config.max_concurrent_clones,
        },
    ));

    let mut mux = ServeMux::new();
    mux.handle(TYPE_ANALYZE, Arc::new(AnalyzeHandler::new(analyzer)));

    let server = QueueServer::connect(
        &config.redis_url,
        &config.queue_name,
        ServerOptions {
            concurrency: config.concurrency,
            shutdown_timeout: config.shutdown_timeout,
            ..ServerOptions::default()
        },
    )
    .await?;

    let stop = shutdown::signal_token();
    server.run(Arc::new(mux), stop).await?;

    info!("Worker shutdown complete");
    Ok(())
}

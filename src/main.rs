use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kiro_pool_gateway::config::{self, Command, Config, ImportSource};
use kiro_pool_gateway::orchestrator::Orchestrator;
use kiro_pool_gateway::selector::{Account, AccountSelector};
use kiro_pool_gateway::{api, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = config::parse_args()?;
    let config = Config::load(args.config_path.as_deref())?;

    init_tracing(&config);

    if let Command::ImportAccount { source, region, profile_arn } = args.command {
        return import_account(&config, source, region, profile_arn).await;
    }

    for (key, env_var) in config.env_overrides.all() {
        info!(key, env_var, "config overridden from environment");
    }

    let redis_client = redis::Client::open(config.redis.url.as_str())?;
    let redis_conn = redis_client.get_connection_manager().await?;

    let token_storage = Arc::new(
        kiro_gateway::storage::RedisTokenStorage::connect(
            &config.redis.url,
            config.redis_key_prefix(),
        )
        .await?,
    );

    let selector = Arc::new(AccountSelector::new(
        redis_conn.clone(),
        config.redis_key_prefix(),
        config.account_cache_ttl(),
    ));

    let shared_http = reqwest::Client::builder()
        .pool_max_idle_per_host(config.transport.max_idle_conns_per_host)
        .pool_idle_timeout(config.idle_conn_timeout())
        .timeout(config.kiro_api_timeout())
        .build()?;

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&selector),
        token_storage,
        shared_http,
        config.orchestrator.max_retries,
    ));

    let shutdown = CancellationToken::new();

    let state = AppState {
        config: Arc::new(config.clone()),
        selector,
        orchestrator,
        redis: redis_conn,
        shutdown: shutdown.clone(),
    };

    let app = api::build_app(state);

    let addr = config.listen_addr();
    info!(%addr, "starting gateway");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let graceful_timeout = config.graceful_timeout();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown, graceful_timeout))
        .await?;

    info!("gateway stopped");
    Ok(())
}

/// Operator-facing provisioning path: load a token from a file, SQLite
/// database, or the environment, save it to Redis, and register a new
/// healthy `Account` in the pool. The Redis surface this gateway serves
/// from has no route that creates accounts - they come from here, or from
/// another tool writing the same two keys directly.
async fn import_account(
    config: &Config,
    source: ImportSource,
    region_override: Option<String>,
    profile_arn_override: Option<String>,
) -> anyhow::Result<()> {
    use kiro_gateway::auth::credentials;
    use kiro_gateway::storage::{RedisTokenStorage, TokenStorage};

    let token = match source {
        ImportSource::JsonFile(path) => credentials::load_from_json_file(&path)?,
        ImportSource::Sqlite(path) => credentials::load_from_sqlite(&path)?,
        ImportSource::Env => credentials::load_from_env()
            .ok_or_else(|| anyhow::anyhow!("no refresh token found in the environment"))?,
    };

    let id = uuid::Uuid::new_v4();
    let region = region_override.unwrap_or_else(|| token.region.clone());
    let profile_arn = profile_arn_override.or_else(|| token.profile_arn.clone());

    let token_storage = RedisTokenStorage::connect(&config.redis.url, config.redis_key_prefix()).await?;
    token_storage.save(&id.to_string(), &token).await?;

    let redis_client = redis::Client::open(config.redis.url.as_str())?;
    let redis_conn = redis_client.get_connection_manager().await?;
    let selector = AccountSelector::new(redis_conn, config.redis_key_prefix(), config.account_cache_ttl());
    let account = Account::new(id, region, profile_arn);
    selector
        .register(&account)
        .await
        .map_err(|e| anyhow::anyhow!("registering account: {e}"))?;

    info!(account = %id, "account imported and registered in pool");
    println!("Imported account {id}");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "kiro_pool_gateway={level},kiro_gateway={level},tower_http={level},warn",
            level = config.logging.level
        ))
    });

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Waits for Ctrl-C or SIGTERM, cancels `shutdown` so in-flight streams can
/// flush a clean termination, then gives them `graceful_timeout` to finish
/// before axum forcibly drops remaining connections.
async fn shutdown_signal(shutdown: CancellationToken, graceful_timeout: Duration) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    warn!("shutdown signal received, cancelling in-flight streams");
    shutdown.cancel();
    tokio::time::sleep(graceful_timeout).await;
}

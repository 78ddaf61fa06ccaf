use std::time::Duration;

use anyhow::{Context, bail};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use clap::{Parser, Subcommand};
use rand::RngCore;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use storefront::config::Config;
use storefront::crypto::MasterKey;
use storefront::db::{AppState, DbPool, create_pool, init_db, queries};
use storefront::handlers;
use storefront::jwt::SessionKeys;
use storefront::payments::{bootstrap_gateways, processing};

#[derive(Parser)]
#[command(name = "storefront", version, about = "Storefront API with crypto and PayPal checkout")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run migrations, bootstrap gateways and serve the API (default)
    Serve,
    /// Create or update the database schema and exit
    Migrate,
    /// Expire every payment whose window has closed and exit
    SweepExpired,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let pool = create_pool(&config.database_path).context("Failed to open database")?;
    {
        let conn = pool.get().context("Failed to get database connection")?;
        init_db(&conn).context("Failed to initialize schema")?;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            tracing::info!("Schema at {} is up to date", config.database_path);
            Ok(())
        }
        Command::SweepExpired => {
            let mut conn = pool.get()?;
            let expired = processing::expire_stale_payments(&mut conn, queries::now())?;
            println!("Expired {} payments", expired);
            Ok(())
        }
        Command::Serve => serve(config, pool).await,
    }
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

fn load_master_key(config: &Config) -> anyhow::Result<MasterKey> {
    match &config.master_key {
        Some(encoded) => Ok(MasterKey::from_base64(encoded)?),
        None if config.dev_mode => {
            let key = MasterKey::generate();
            tracing::warn!(
                "MASTER_KEY not set; generated an ephemeral key. Stored gateway credentials will be unreadable after restart."
            );
            Ok(key)
        }
        None => bail!("MASTER_KEY must be set (base64 of 32 random bytes)"),
    }
}

fn load_session_keys(config: &Config) -> anyhow::Result<SessionKeys> {
    let secret = match &config.jwt_secret {
        Some(s) if s.len() >= 32 => s.clone(),
        Some(_) => bail!("JWT_SECRET must be at least 32 characters"),
        None if config.dev_mode => {
            tracing::warn!("JWT_SECRET not set; sessions will not survive a restart");
            random_secret()
        }
        None => bail!("JWT_SECRET must be set"),
    };
    Ok(SessionKeys::new(secret.as_bytes(), config.jwt_ttl_hours))
}

fn spawn_sweeper(state: AppState, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match state.db.get() {
                Ok(mut conn) => {
                    if let Err(e) = processing::expire_stale_payments(&mut conn, queries::now()) {
                        tracing::error!("Expiry sweep failed: {}", e);
                    }
                }
                Err(e) => tracing::error!("Expiry sweep could not get a connection: {}", e),
            }
            state.rate_limiter.prune();
        }
    });
}

async fn serve(config: Config, pool: DbPool) -> anyhow::Result<()> {
    let master_key = load_master_key(&config)?;
    let sessions = load_session_keys(&config)?;

    {
        let conn = pool.get()?;
        let configured = bootstrap_gateways(&conn, &master_key, &config.bootstrap)?;
        tracing::info!("{} gateways configured from environment", configured);
    }

    let state = AppState::new(&config, pool, master_key, sessions)?;

    if config.expiry_sweep_secs > 0 {
        spawn_sweeper(state.clone(), Duration::from_secs(config.expiry_sweep_secs));
    }

    let app = handlers::app(state);
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Storefront listening on http://{}", addr);
    if config.dev_mode {
        tracing::warn!("Running in development mode");
    }

    axum::serve(listener, app).await?;
    Ok(())
}

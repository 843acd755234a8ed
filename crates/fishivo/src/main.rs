//! Fishivo like engine driver.
//!
//! Subcommands:
//! - `watch`: Keep an engine in sync with Supabase and log every change
//! - `toggle`: Toggle one like and print the settled state
//! - `refresh`: Re-read one entity's authoritative state

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use fishivo_likes::{EngineConfig, EntityKey, LikeEngine, LikeState};
use fishivo_supabase::{SupabaseClient, SupabaseConfig};
use miette::{IntoDiagnostic, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod watch;

/// Parse a boolean flag from the environment.
/// Accepts "1", "true", "yes", "on" and "0", "false", "no", "off", "" (case-insensitive).
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

fn parse_key(s: &str) -> Result<EntityKey, String> {
    s.parse()
        .map_err(|e| format!("invalid entity key '{}': {}", s, e))
}

#[derive(Parser)]
#[command(name = "fishivo")]
#[command(about = "Optimistic like sync for Fishivo", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Connection {
    /// Supabase project URL
    #[arg(long, env = "FISHIVO_SUPABASE_URL")]
    supabase_url: String,

    /// Supabase anon API key
    #[arg(long, env = "FISHIVO_ANON_KEY")]
    anon_key: String,

    /// Account email; without it the engine runs signed out
    #[arg(long, env = "FISHIVO_EMAIL")]
    email: Option<String>,

    /// Account password
    #[arg(long, env = "FISHIVO_PASSWORD", requires = "email")]
    password: Option<String>,

    /// Seconds allowed to establish an HTTP connection
    #[arg(long, env = "FISHIVO_CONNECT_TIMEOUT_SECS", default_value = "10")]
    connect_timeout_secs: u64,

    /// Seconds allowed for a whole HTTP request
    #[arg(long, env = "FISHIVO_REQUEST_TIMEOUT_SECS", default_value = "30")]
    request_timeout_secs: u64,

    /// Seconds between realtime heartbeats
    #[arg(long, env = "FISHIVO_HEARTBEAT_SECS", default_value = "30")]
    heartbeat_secs: u64,
}

impl Connection {
    fn supabase_config(&self) -> SupabaseConfig {
        SupabaseConfig::new(&self.supabase_url, &self.anon_key)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_heartbeat_interval(Duration::from_secs(self.heartbeat_secs))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the realtime listener and background sweep until interrupted
    Watch {
        #[command(flatten)]
        connection: Connection,

        /// Entities to load before syncing (e.g. post:42, comment:5)
        #[arg(long = "track", value_parser = parse_key)]
        tracked: Vec<EntityKey>,

        /// Entries older than this many seconds are re-checked by the sweep
        #[arg(long, env = "FISHIVO_STALENESS_SECS", default_value = "300")]
        staleness_secs: u64,

        /// Seconds between background sweeps
        #[arg(long, env = "FISHIVO_SYNC_INTERVAL_SECS", default_value = "1800")]
        sync_interval_secs: u64,

        /// Do not consume the realtime feed
        #[arg(long, env = "FISHIVO_NO_REALTIME", value_parser = parse_bool_env, default_value = "false")]
        no_realtime: bool,

        /// Do not schedule background sweeps
        #[arg(long, env = "FISHIVO_NO_BACKGROUND_SYNC", value_parser = parse_bool_env, default_value = "false")]
        no_background_sync: bool,
    },

    /// Toggle the signed-in user's like on an entity
    Toggle {
        #[command(flatten)]
        connection: Connection,

        /// Entity key (e.g. post:42)
        #[arg(value_parser = parse_key)]
        key: EntityKey,

        /// Like count to assume if the entity has not been loaded
        #[arg(long)]
        hint: Option<u64>,
    },

    /// Fetch an entity's authoritative like state
    Refresh {
        #[command(flatten)]
        connection: Connection,

        /// Entity key (e.g. comment:5)
        #[arg(value_parser = parse_key)]
        key: EntityKey,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "fishivo=info,fishivo_likes=info,fishivo_supabase=info".to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            connection,
            tracked,
            staleness_secs,
            sync_interval_secs,
            no_realtime,
            no_background_sync,
        } => {
            let config = EngineConfig::default()
                .with_staleness_threshold(Duration::from_secs(staleness_secs))
                .with_background_sync_interval(Duration::from_secs(sync_interval_secs))
                .with_realtime(!no_realtime)
                .with_background_sync(!no_background_sync);
            let client = connect(&connection).await?;
            watch::run(client, config, tracked).await
        }

        Commands::Toggle {
            connection,
            key,
            hint,
        } => {
            let client = connect(&connection).await?;
            if client.user_id().await.is_none() {
                return Err(miette::miette!("toggle needs --email and --password"));
            }
            let engine = build_engine(client, EngineConfig::default());

            let confirmed = engine.toggle(&key, hint).await;
            info!(key = %key, confirmed, "toggle finished");
            print_state(&key, engine.state(&key))
        }

        Commands::Refresh { connection, key } => {
            let client = connect(&connection).await?;
            let engine = build_engine(client, EngineConfig::default());

            engine.on_realtime_event(&key.id, key.kind, fishivo_likes::LikeAction::Liked).await;
            print_state(&key, engine.state(&key))
        }
    }
}

/// Create the Supabase client and sign in when credentials were given.
async fn connect(connection: &Connection) -> Result<Arc<SupabaseClient>> {
    let client = SupabaseClient::new(connection.supabase_config()).map_err(|e| miette::miette!("{}", e))?;

    if let (Some(email), Some(password)) = (&connection.email, &connection.password) {
        client
            .sign_in_with_password(email, password)
            .await
            .map_err(|e| miette::miette!("{}", e))?;
    }

    Ok(Arc::new(client))
}

fn build_engine(client: Arc<SupabaseClient>, config: EngineConfig) -> LikeEngine {
    LikeEngine::builder(client.clone(), client).config(config).build()
}

fn print_state(key: &EntityKey, state: Option<LikeState>) -> Result<()> {
    let output = serde_json::json!({
        "key": key.to_string(),
        "state": state,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&output).into_diagnostic()?
    );
    Ok(())
}

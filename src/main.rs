use std::sync::Arc;
use teloxide::Bot;
use tracing::info;

mod compat;
mod engine;
mod error;
mod interface;
mod profile;
mod queue;
mod registry;
mod relay;
mod session;
mod store;
mod transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        // It's not fatal if .env doesn't exist, but good to know
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Anonchat daemon starting...");

    // Profile store lives at ~/.anonchat/anonchat.db unless overridden.
    let db_path = match std::env::var("ANONCHAT_DB") {
        Ok(path) => std::path::PathBuf::from(path),
        Err(_) => {
            let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            std::path::Path::new(&home_dir)
                .join(".anonchat")
                .join("anonchat.db")
        }
    };

    info!("Initializing store at {}", db_path.display());
    let store = Arc::new(store::Store::new(&db_path).await?);
    store.init().await?;

    let registry = Arc::new(registry::ProfileRegistry::load(store).await?);

    let token = std::env::var("TELOXIDE_TOKEN")
        .or_else(|_| std::env::var("TELEGRAM_BOT_TOKEN"))
        .map_err(|_| anyhow::anyhow!("TELOXIDE_TOKEN or TELEGRAM_BOT_TOKEN not set"))?;

    // Explicit timeouts so a slow Telegram API call can never wedge a relay.
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()?;
    let bot = Bot::with_client(token, client);

    let transport: Arc<dyn transport::Transport> =
        Arc::new(interface::telegram::TelegramTransport::new(bot.clone()));

    let engine = Arc::new(engine::Engine::new(registry, transport.clone()));
    let relay = Arc::new(relay::RelayForwarder::new(engine.clone(), transport));

    let telegram = interface::telegram::TelegramInterface::new(engine, relay);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = telegram.run(bot) => {
            if let Err(e) = res {
                tracing::error!("Telegram dispatcher stopped with error: {}", e);
            }
        }
    }

    Ok(())
}

//! Snag Bot - pulls media out of web pages and sends it back as albums
//!
//! Send it a URL: media comes back as albums, HTML pages are scraped for
//! links with the extensions you ask for.

mod config;
mod handlers;
mod telegram;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, Settings};
use handlers::Command;
use snag_core::{
    BatchDownloader, ChromeRenderer, Fetcher, PageRenderer, RequestHandler, SessionStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "snag-bot")]
#[command(author, version, about = "A Telegram bot that downloads media from links", long_about = None)]
struct Cli {
    /// File holding BOT_TOKEN and TELEGRAM_API_SERVER
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// TOML config file (defaults to the per-user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = Settings::load(&cli.env_file).context("Failed to load credentials")?;
    let config = Config::load(cli.config.as_deref())?;

    let fetcher = Arc::new(Fetcher::with_config(config.fetch_config())?);
    let sessions = Arc::new(SessionStore::new());
    let downloader = Arc::new(BatchDownloader::new(
        fetcher,
        sessions,
        config.batch_config(),
    ));
    let renderer: Arc<dyn PageRenderer> = Arc::new(ChromeRenderer::new(
        config.chrome_config()?,
        config.page_ready(),
    ));
    let handler = Arc::new(RequestHandler::new(downloader, renderer));

    let mut bot = Bot::new(settings.bot_token.clone());
    if let Some(url) = settings.api_url.clone() {
        info!("Using Bot API server at {}", url);
        bot = bot.set_api_url(url);
    }

    info!("Bot is running...");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![handler])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn schema() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handlers::handle_command),
        )
        .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handlers::handle_text))
}

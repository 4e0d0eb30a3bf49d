use dotenvy::dotenv;
use regex::Regex;
use sadpanda::bot::{handlers, Layout};
use sadpanda::config::Settings;
use sadpanda::gallery::EhApiClient;
use sadpanda::limits::SystemClock;
use sadpanda::pipeline::Pipeline;
use std::io::{self, Write};
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting the bot token from log output
struct RedactionPatterns {
    token1: Regex,
    token2: Regex,
    token3: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token1: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token2: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token3: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let output = self.token1.replace_all(input, "$1[TELEGRAM_TOKEN]$3");
        let output = self.token2.replace_all(&output, "[TELEGRAM_TOKEN]");
        self.token3
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .into_owned()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length, the redacted text may differ in size.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
            patterns: self.patterns.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting gallery link bot...");

    let settings = init_settings();

    let api = match EhApiClient::new(settings.api.endpoint.clone(), settings.api_timeout()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to initialize gallery API client: {}", e);
            std::process::exit(1);
        }
    };
    info!("Gallery API client initialized ({}).", settings.api.endpoint);

    let bot = Bot::new(settings.telegram_token.clone());

    // Never react to our own messages
    let own_id = match bot.get_me().await {
        Ok(me) => Some(me.id.0.to_string()),
        Err(e) => {
            warn!("Failed to fetch bot identity: {}", e);
            None
        }
    };

    let pipeline = Arc::new(
        Pipeline::from_settings(&settings, api, Arc::new(SystemClock))
            .with_ignored_senders(own_id),
    );
    info!(
        "Admission control ready with {} limits.",
        pipeline.admission().len()
    );

    let layout = settings.layout();

    info!("Bot is running...");

    Dispatcher::builder(bot, setup_handler())
        .dependencies(dptree::deps![pipeline, layout])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
        patterns,
    };
    let debug_mode = std::env::var("DEBUG_MODE").is_ok_and(|v| v == "1" || v == "true");
    let default_level = if debug_mode { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Settings {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            s
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_edited_message().endpoint(handle_edited_message))
}

async fn handle_message(
    bot: Bot,
    msg: Message,
    pipeline: Arc<Pipeline>,
    layout: Layout,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_message(bot, msg, pipeline, layout).await {
        error!("Message handler error: {}", e);
    }
    respond(())
}

async fn handle_edited_message(
    bot: Bot,
    msg: Message,
    pipeline: Arc<Pipeline>,
    layout: Layout,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_edited_message(bot, msg, pipeline, layout).await {
        error!("Edited message handler error: {}", e);
    }
    respond(())
}

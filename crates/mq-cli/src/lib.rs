//! # MQ CLI
//!
//! Command-line interface for consuming from and publishing to RocketMQ
//! HTTP topics.
//!
//! Configuration is layered: built-in defaults, then an optional file
//! (`--config`, TOML/YAML/JSON by extension), then `MQ_` environment
//! variables using `__` as the nesting separator, e.g.
//! `MQ_CLIENT__SECRET_KEY`. Command-line arguments override all of them.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use mq_runtime::{
    AckMode, ClientConfig, Consumer, ConsumerBuilder, Message, ProducerBuilder, Property,
    PublishRequest, QueueError, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "MQ";

/// MQ command-line interface
#[derive(Parser, Debug)]
#[command(
    name = "mq",
    version = env!("CARGO_PKG_VERSION"),
    about = "Consume from and publish to RocketMQ HTTP topics"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print messages from a topic until interrupted
    Consume {
        #[arg(long)]
        topic: String,

        /// Consumer group id
        #[arg(long)]
        group: String,

        /// Only consume messages with this tag; repeat for several tags
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Messages per poll (1-16)
        #[arg(long)]
        batch_size: Option<u32>,

        /// Long-poll wait in seconds (0-30)
        #[arg(long)]
        wait_seconds: Option<u64>,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Publish one message and print its id
    Send {
        #[arg(long)]
        topic: String,

        #[arg(long)]
        tag: Option<String>,

        /// Message key
        #[arg(long)]
        key: Option<String>,

        /// User property as key=value; repeat for several properties
        #[arg(long = "property", value_parser = parse_property)]
        properties: Vec<Property>,

        /// Deliver after this many milliseconds
        #[arg(long, conflicts_with = "deliver_at")]
        delay_ms: Option<u64>,

        /// Deliver at this RFC 3339 time
        #[arg(long, value_parser = parse_deliver_at)]
        deliver_at: Option<DateTime<Utc>>,

        /// Message body
        body: String,
    },

    /// Load and validate configuration
    Config {
        /// Print the effective configuration with secrets masked
        #[arg(long)]
        show: bool,
    },
}

/// How consumed messages are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

fn parse_property(raw: &str) -> Result<Property, String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok(Property::new(key, value)),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn parse_deliver_at(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 time: {}", e))
}

// ============================================================================
// Errors
// ============================================================================

/// CLI errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid argument '{arg}': {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(QueueError::Configuration(_)) => 1,
            Self::Queue(_) => 2,
            Self::InvalidArgument { .. } => 3,
            Self::Io(_) => 4,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error(transparent)]
    Invalid(#[from] mq_runtime::ConfigurationError),
}

// ============================================================================
// Configuration
// ============================================================================

/// Effective CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub client: ClientConfig,
    pub consumer: ConsumerDefaults,
    pub logging: LoggingConfig,
}

impl CliConfig {
    /// Copy with credentials masked, for display
    pub fn redacted(&self) -> Self {
        Self {
            client: self.client.redacted(),
            ..self.clone()
        }
    }
}

/// Consumer settings used when the command line does not give them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerDefaults {
    pub batch_size: u32,
    pub wait_seconds: u64,
    pub ack_mode: AckMode,
    pub max_in_flight: Option<usize>,
}

impl Default for ConsumerDefaults {
    fn default() -> Self {
        Self {
            batch_size: 1,
            wait_seconds: 5,
            ack_mode: AckMode::default(),
            max_in_flight: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "json")]
    Json,
}

/// Load configuration from defaults, an optional file and the environment
///
/// # Errors
///
/// Fails when an explicitly named file does not exist or any source cannot
/// be parsed into [`CliConfig`].
pub fn load_configuration(path: Option<&Path>) -> Result<CliConfig, CliError> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .map_err(ConfigError::from)?;

    let config: CliConfig = settings.try_deserialize().map_err(ConfigError::from)?;
    Ok(config)
}

/// Install the global tracing subscriber; logs go to stderr
pub fn initialize_logging(level: &str, json: bool) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    // A subscriber installed earlier in the process stays in place.
    if let Err(e) = installed {
        debug!(error = %e, "Tracing subscriber already installed");
    }
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

/// Parse the process arguments and run the selected command
pub async fn run_cli() -> Result<(), CliError> {
    run(Cli::parse()).await
}

/// Run an already parsed command line
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_configuration(cli.config.as_deref())?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    initialize_logging(level, cli.json_logs || config.logging.format == LogFormat::Json)?;

    match cli.command {
        Commands::Consume {
            topic,
            group,
            tags,
            batch_size,
            wait_seconds,
            format,
        } => {
            let options = ConsumeOptions {
                topic,
                group,
                tags,
                batch_size: batch_size.unwrap_or(config.consumer.batch_size),
                wait_seconds: wait_seconds.unwrap_or(config.consumer.wait_seconds),
                format,
            };
            consume(&config, options).await
        }
        Commands::Send {
            topic,
            tag,
            key,
            properties,
            delay_ms,
            deliver_at,
            body,
        } => {
            let mut request = PublishRequest::new(body).with_properties(&properties);
            if let Some(tag) = tag {
                request = request.with_tag(tag);
            }
            if let Some(key) = key {
                request = request.with_message_key(key);
            }
            if let Some(at) = deliver_time(Utc::now(), delay_ms, deliver_at)? {
                request = request.with_start_deliver_time(at);
            }
            send(&config, &topic, request).await
        }
        Commands::Config { show } => check_config(&config, show),
    }
}

struct ConsumeOptions {
    topic: String,
    group: String,
    tags: Vec<String>,
    batch_size: u32,
    wait_seconds: u64,
    format: OutputFormat,
}

async fn consume(config: &CliConfig, options: ConsumeOptions) -> Result<(), CliError> {
    let mut builder = ConsumerBuilder::new()
        .with_client_config(config.client.clone())
        .with_topic(options.topic.as_str())
        .with_group_id(options.group.as_str())
        .with_batch_size(options.batch_size)
        .with_wait_seconds(options.wait_seconds)
        .with_ack_mode(config.consumer.ack_mode)
        .on_error(|e| error!(error = %e, transient = e.is_transient(), "Consumer error"));
    if let Some(limit) = config.consumer.max_in_flight {
        builder = builder.with_max_in_flight(limit);
    }

    let print = printer(options.format);
    if options.tags.is_empty() {
        builder = builder.handle_all(print);
    } else {
        for tag in &options.tags {
            builder = builder.handle(tag, print.clone());
        }
    }

    let consumer = builder.build()?;
    let shutdown = CancellationToken::new();
    consumer.start(&shutdown);
    info!(topic = %options.topic, group = %options.group, "Consuming; press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, stopping consumer");
    shutdown.cancel();
    consumer.stop();
    Ok(())
}

async fn send(config: &CliConfig, topic: &str, request: PublishRequest) -> Result<(), CliError> {
    let producer = ProducerBuilder::new()
        .with_client_config(config.client.clone())
        .with_topic(topic)
        .build()?;

    let message_id = producer.send(request).await?;
    writeln!(std::io::stdout().lock(), "{}", message_id)?;
    Ok(())
}

fn check_config(config: &CliConfig, show: bool) -> Result<(), CliError> {
    config.client.validate().map_err(ConfigError::from)?;

    let mut out = std::io::stdout().lock();
    if show {
        let rendered = serde_json::to_string_pretty(&config.redacted()).map_err(|e| {
            CliError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        writeln!(out, "{}", rendered)?;
    } else {
        writeln!(out, "Configuration is valid")?;
    }
    Ok(())
}

/// Scheduled delivery time from either a relative delay or an absolute time
///
/// Zero delays and times not in the future deliver immediately.
fn deliver_time(
    now: DateTime<Utc>,
    delay_ms: Option<u64>,
    deliver_at: Option<DateTime<Utc>>,
) -> Result<Option<Timestamp>, CliError> {
    if let Some(delay_ms) = delay_ms.filter(|ms| *ms > 0) {
        let at = i64::try_from(delay_ms)
            .ok()
            .and_then(|ms| now.checked_add_signed(chrono::Duration::milliseconds(ms)))
            .ok_or_else(|| CliError::InvalidArgument {
                arg: "delay-ms".to_string(),
                message: format!("{} is out of range", delay_ms),
            })?;
        return Ok(Some(Timestamp::from_datetime(at)));
    }

    Ok(deliver_at
        .filter(|at| *at > now)
        .map(Timestamp::from_datetime))
}

// ============================================================================
// Output
// ============================================================================

#[derive(Serialize)]
struct MessageView<'a> {
    message_id: &'a str,
    tag: Option<&'a str>,
    message_key: Option<&'a str>,
    body: &'a str,
    properties: &'a HashMap<String, String>,
    publish_time: Option<DateTime<Utc>>,
    consumed_times: u32,
}

fn render_message(message: &Message, format: OutputFormat) -> anyhow::Result<String> {
    let entry = message.entry();
    let line = match format {
        OutputFormat::Text => format!(
            "[{}] tag={} consumed={}: {}",
            entry.message_id,
            entry.tag.as_deref().unwrap_or("-"),
            entry.consumed_times,
            entry.body
        ),
        OutputFormat::Json => serde_json::to_string(&MessageView {
            message_id: entry.message_id.as_str(),
            tag: entry.tag.as_deref(),
            message_key: entry.message_key.as_deref(),
            body: &entry.body,
            properties: &entry.properties,
            publish_time: entry.publish_time.map(|t| t.as_datetime()),
            consumed_times: entry.consumed_times,
        })?,
    };
    Ok(line)
}

/// Handler printing each message to stdout
fn printer(
    format: OutputFormat,
) -> impl Fn(Message) -> std::future::Ready<anyhow::Result<()>> + Clone + Send + Sync + 'static {
    move |message: Message| {
        let printed = render_message(&message, format).and_then(|line| {
            writeln!(std::io::stdout().lock(), "{}", line)?;
            Ok(())
        });
        std::future::ready(printed)
    }
}

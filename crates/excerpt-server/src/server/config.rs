use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use core::time::Duration;
use excerpt_core::{ServiceConfig, publish::TopicRouter};
use std::path::PathBuf;

/// Output style of the console log layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Multi-line, human-readable output.
    #[default]
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

/// Runtime configuration for the `excerpt-server` binary.
///
/// Every option can be given on the command line or through the environment
/// variable named in its description. A `.env` file in the working directory
/// is loaded before parsing.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "excerpt-server",
    version,
    about = "An HTTP service for requesting, tracking and downloading excerpts"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Require verified digital signatures on generation requests.
    ///
    /// When enabled, both signature headers must be present, the staged blob
    /// must verify against the request, and `VERIFIER_URL` must be set.
    ///
    /// Environment variable: `SIGNATURE_ENABLED`
    #[arg(long, env = "SIGNATURE_ENABLED", default_value_t = false, action = clap::ArgAction::Set)]
    pub signature_enabled: bool,

    /// Endpoint of the signature verification service.
    ///
    /// Environment variable: `VERIFIER_URL`
    #[arg(long, env = "VERIFIER_URL")]
    pub verifier_url: Option<String>,

    /// Upper bound on a single verification call, in milliseconds.
    ///
    /// Environment variable: `VERIFIER_TIMEOUT_MS`
    #[arg(long, env = "VERIFIER_TIMEOUT_MS", default_value_t = 5_000)]
    pub verifier_timeout_ms: u64,

    /// Directory holding one sub-directory per storage bucket.
    ///
    /// Every configured bucket must already exist below this root. A missing
    /// bucket is reported as a deployment error, not as an absent object.
    ///
    /// Environment variable: `STORAGE_ROOT`
    #[arg(long, env = "STORAGE_ROOT", default_value = "./data")]
    pub storage_root: PathBuf,

    /// Bucket callers upload signature blobs to.
    ///
    /// Environment variable: `STAGING_BUCKET`
    #[arg(long, env = "STAGING_BUCKET", default_value_t = String::from("lowcode-form-data"))]
    pub staging_bucket: String,

    /// Bucket verified signature blobs are moved to.
    ///
    /// Environment variable: `SIGNATURE_BUCKET`
    #[arg(long, env = "SIGNATURE_BUCKET", default_value_t = String::from("excerpt-signatures"))]
    pub signature_bucket: String,

    /// Bucket the rendering worker writes finished excerpts to.
    ///
    /// Environment variable: `EXCERPT_BUCKET`
    #[arg(long, env = "EXCERPT_BUCKET", default_value_t = String::from("excerpts"))]
    pub excerpt_bucket: String,

    /// Upper bound on a single object storage or record store call, in
    /// milliseconds.
    ///
    /// Environment variable: `STORAGE_TIMEOUT_MS`
    #[arg(long, env = "STORAGE_TIMEOUT_MS", default_value_t = 5_000)]
    pub storage_timeout_ms: u64,

    /// `SQLite` database file holding generation records.
    ///
    /// Created on first start. Records survive restarts, so a request
    /// accepted before a restart can still be tracked and downloaded after it.
    ///
    /// Environment variable: `DATABASE_PATH`
    #[arg(long, env = "DATABASE_PATH", default_value = "./excerpts.db")]
    pub database_path: PathBuf,

    /// JSON file listing the available templates.
    ///
    /// The file holds an array of `{"name", "content", "declaredType"}`
    /// objects and is read once at startup.
    ///
    /// Environment variable: `TEMPLATES_PATH`
    #[arg(long, env = "TEMPLATES_PATH", default_value = "./templates.json")]
    pub templates_path: PathBuf,

    /// Base URL of the message bus REST proxy generation events are posted
    /// to.
    ///
    /// Environment variable: `PUBLISHER_URL`
    #[arg(long, env = "PUBLISHER_URL", default_value_t = String::from("http://localhost:8082"))]
    pub publisher_url: String,

    /// Routing table from output type to topic, as comma-separated
    /// `type=topic` pairs.
    ///
    /// Environment variable: `TOPICS`
    #[arg(
        long,
        env = "TOPICS",
        value_delimiter = ',',
        default_value = "pdf=generate-excerpt-pdf,docx=generate-excerpt-docx,csv=generate-excerpt-csv"
    )]
    pub topics: Vec<String>,

    /// Output types that may never be signed, comma-separated.
    ///
    /// Environment variable: `UNSIGNED_TYPES`
    #[arg(long, env = "UNSIGNED_TYPES", value_delimiter = ',', default_value = "docx,csv")]
    pub unsigned_types: Vec<String>,

    /// Upper bound on a single publish attempt, in milliseconds.
    ///
    /// A publish that does not finish in time marks its record as failed.
    ///
    /// Environment variable: `PUBLISH_TIMEOUT_MS`
    #[arg(long, env = "PUBLISH_TIMEOUT_MS", default_value_t = 10_000)]
    pub publish_timeout_ms: u64,

    /// Number of background tasks publishing generation events.
    ///
    /// Environment variable: `NUM_PUBLISH_WORKERS`
    #[arg(long, env = "NUM_PUBLISH_WORKERS", default_value_t = 2)]
    pub num_publish_workers: usize,

    /// Capacity of each publish worker's queue.
    ///
    /// A full queue makes the generation request wait for space rather than
    /// drop the event.
    ///
    /// Environment variable: `PUBLISH_QUEUE_SIZE`
    #[arg(long, env = "PUBLISH_QUEUE_SIZE", default_value_t = 256)]
    pub publish_queue_size: usize,

    /// Seconds to wait for each publish worker to drain on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Console log format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub verifier_url: Option<reqwest::Url>,
    pub verifier_timeout: Duration,
    pub storage_root: PathBuf,
    pub database_path: PathBuf,
    pub templates_path: PathBuf,
    pub publisher_url: String,
    pub log_format: LogFormat,
    pub service: ServiceConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_publish_workers == 0 {
            bail!("NUM_PUBLISH_WORKERS must be greater than 0");
        }
        if args.publish_queue_size == 0 {
            bail!("PUBLISH_QUEUE_SIZE must be greater than 0");
        }

        let verifier_url = args
            .verifier_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| {
                reqwest::Url::parse(url).with_context(|| format!("invalid VERIFIER_URL `{url}`"))
            })
            .transpose()?;
        if args.signature_enabled && verifier_url.is_none() {
            bail!("SIGNATURE_ENABLED requires VERIFIER_URL to be set");
        }

        let topics = parse_topics(&args.topics)?;
        if topics.is_empty() {
            bail!("TOPICS must route at least one excerpt type");
        }

        let unsigned_types = args
            .unsigned_types
            .iter()
            .map(|ty| ty.trim())
            .filter(|ty| !ty.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            server_addr: args.server_addr,
            verifier_url,
            verifier_timeout: Duration::from_millis(args.verifier_timeout_ms),
            storage_root: args.storage_root,
            database_path: args.database_path,
            templates_path: args.templates_path,
            publisher_url: args.publisher_url,
            log_format: args.log_format,
            service: ServiceConfig {
                signature_enabled: args.signature_enabled,
                staging_bucket: args.staging_bucket,
                signature_bucket: args.signature_bucket,
                excerpt_bucket: args.excerpt_bucket,
                unsigned_types,
                topics,
                storage_timeout: Duration::from_millis(args.storage_timeout_ms),
                publish_timeout: Duration::from_millis(args.publish_timeout_ms),
                num_publish_workers: args.num_publish_workers,
                publish_queue_size: args.publish_queue_size,
                shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            },
        })
    }
}

fn parse_topics(entries: &[String]) -> anyhow::Result<TopicRouter> {
    let mut routes = Vec::with_capacity(entries.len());
    for entry in entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
        let Some((ty, topic)) = entry.split_once('=') else {
            bail!("TOPICS entry `{entry}` is not of the form type=topic");
        };
        let (ty, topic) = (ty.trim(), topic.trim());
        if ty.is_empty() || topic.is_empty() {
            bail!("TOPICS entry `{entry}` is not of the form type=topic");
        }
        routes.push((ty.to_string(), topic.to_string()));
    }
    Ok(TopicRouter::new(routes))
}

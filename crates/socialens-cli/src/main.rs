//! socialens CLI: ingest social-media exports, follow their enrichment and
//! read analytics back out.
//!
//! Usage:
//!   socialens ingest <file> [--mime type] [--wait]
//!   socialens status <upload-id>
//!   socialens aggregate [--from date] [--to date] [--utc-offset +02:00]
//!   socialens export --format csv|json [filters] [--out path]

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use socialens::model::{Platform, PostId, Sentiment, UploadId};
use socialens::{
    default_pipeline, load_config, AggregateQuery, Aggregator, BroadcastProgress, Config,
    Database, Dispatcher, ExportFormat, Exporter, FsBlobStore, Ingestor, ResultWriter,
};

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Config file looked up when `--config` is not given.
const CONFIG_FILE_NAME: &str = "socialens.json";

#[derive(Parser)]
#[command(
    name = "socialens",
    version,
    about = "Batch ingestion and enrichment of social-media exports"
)]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a JSON, CSV or ZIP export
    Ingest {
        file: PathBuf,
        /// Declared content type; detected from the extension if omitted
        #[arg(long)]
        mime: Option<String>,
        /// Wait for enrichment to finish before exiting
        #[arg(long)]
        wait: bool,
        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 600)]
        timeout: u64,
    },
    /// Show the status of an upload
    Status { upload_id: String },
    /// Cancel an unfinished upload
    Cancel { upload_id: String },
    /// Enrich uploads a previous run left unfinished
    Recover {
        #[arg(long, default_value_t = 600)]
        timeout: u64,
    },
    /// Clear and redo the enrichment of specific posts
    Reenrich {
        #[arg(required = true)]
        post_ids: Vec<String>,
        #[arg(long, default_value_t = 600)]
        timeout: u64,
    },
    /// Summarize persisted posts
    Aggregate {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Per-day sentiment counts
    Trends {
        /// Days back from today; ignored when --from or --to is given
        #[arg(long, default_value_t = 30)]
        days: u32,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Posts with media and the most common entities and tags
    Popular {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Write matching posts as CSV or JSON
    Export {
        #[arg(long, default_value = "csv")]
        format: String,
        /// Comma-separated field names
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
        /// Output file; stdout if omitted
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[derive(Args)]
struct FilterArgs {
    /// First day, YYYY-MM-DD (inclusive)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last day, YYYY-MM-DD (inclusive)
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Offset the days are counted in, e.g. +02:00
    #[arg(long, default_value = "+00:00", allow_hyphen_values = true)]
    utc_offset: String,
    #[arg(long)]
    platform: Option<String>,
    #[arg(long)]
    sentiment: Option<String>,
    #[arg(long)]
    language: Option<String>,
    #[arg(long)]
    upload: Option<String>,
    /// Substring to look for in post text
    #[arg(long)]
    search: Option<String>,
}

impl FilterArgs {
    fn to_query(&self) -> CliResult<AggregateQuery> {
        let utc_offset: FixedOffset = self
            .utc_offset
            .parse()
            .map_err(|_| format!("invalid UTC offset '{}'", self.utc_offset))?;
        let platform = match &self.platform {
            Some(name) => {
                Some(Platform::parse(name).ok_or_else(|| format!("unknown platform '{}'", name))?)
            }
            None => None,
        };
        let sentiment = match &self.sentiment {
            Some(name) => {
                Some(Sentiment::parse(name).ok_or_else(|| format!("unknown sentiment '{}'", name))?)
            }
            None => None,
        };

        Ok(AggregateQuery {
            platform,
            sentiment,
            language: self.language.clone(),
            upload_id: self.upload.clone().map(UploadId::from_string),
            search_text: self.search.clone(),
            ..AggregateQuery::between(self.from, self.to).with_offset(utc_offset)
        })
    }
}

fn init_logging(json: bool) {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
    } else {
        tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("socialens").join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}

fn resolve_config(path: Option<&Path>) -> CliResult<Config> {
    match path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => {
            info!("Loading config from {}", path.display());
            Ok(load_config(&path)?)
        }
        None => {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

/// Everything a command may need, opened once.
struct App {
    config: Config,
    db: Arc<Database>,
    blobs: Arc<FsBlobStore>,
}

impl App {
    fn open(config: Config) -> CliResult<Self> {
        let db = Arc::new(Database::open(Path::new(&config.database_path))?);
        let blobs = Arc::new(FsBlobStore::new(config.blob_directory.clone()));
        Ok(Self { config, db, blobs })
    }

    fn start_ingestor(&self) -> CliResult<(Ingestor, Arc<Dispatcher>)> {
        let writer = Arc::new(ResultWriter::new(self.db.clone()));
        let pipeline = Arc::new(default_pipeline(&self.config.enrichment, self.blobs.clone()));
        let dispatcher = Arc::new(Dispatcher::start(
            self.config.dispatcher.clone(),
            self.db.clone(),
            self.db.clone(),
            writer.clone(),
            pipeline,
            Arc::new(BroadcastProgress::default()),
        )?);
        let ingestor = Ingestor::new(
            self.db.clone(),
            self.db.clone(),
            self.blobs.clone(),
            writer,
            dispatcher.clone(),
            self.config.max_upload_bytes,
        );
        Ok((ingestor, dispatcher))
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Drops the ingestor and joins the workers.
fn stop(ingestor: Ingestor, dispatcher: Arc<Dispatcher>) {
    drop(ingestor);
    match Arc::try_unwrap(dispatcher) {
        Ok(dispatcher) => dispatcher.wait(),
        Err(dispatcher) => dispatcher.shutdown(),
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let config = resolve_config(cli.config.as_deref())?;
    let app = App::open(config)?;

    match cli.command {
        Commands::Ingest {
            file,
            mime,
            wait,
            timeout,
        } => {
            let bytes = std::fs::read(&file)
                .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
            let filename = file.to_string_lossy().to_string();
            let (ingestor, dispatcher) = app.start_ingestor()?;

            let receipt = ingestor.ingest(&filename, mime.as_deref(), bytes);
            let result = match receipt {
                Ok(receipt) if wait => ingestor
                    .wait_for_upload(&receipt.upload_id, Duration::from_secs(timeout))
                    .map_err(Into::into)
                    .and_then(|report| print_json(&report)),
                Ok(receipt) => {
                    if !receipt.status.is_finished() {
                        warn!(
                            "Enrichment continues only while a process runs; use `socialens recover` to resume it"
                        );
                    }
                    print_json(&receipt)
                }
                Err(e) => Err(e.into()),
            };
            stop(ingestor, dispatcher);
            result
        }
        Commands::Status { upload_id } => {
            let (ingestor, dispatcher) = app.start_ingestor()?;
            let result = ingestor
                .status(&UploadId::from_string(upload_id))
                .map_err(Into::into)
                .and_then(|report| print_json(&report));
            stop(ingestor, dispatcher);
            result
        }
        Commands::Cancel { upload_id } => {
            let (ingestor, dispatcher) = app.start_ingestor()?;
            let result = ingestor
                .cancel(&UploadId::from_string(upload_id))
                .map_err(Into::into)
                .and_then(|report| print_json(&report));
            stop(ingestor, dispatcher);
            result
        }
        Commands::Recover { timeout } => {
            let (ingestor, dispatcher) = app.start_ingestor()?;
            let result = recover(&ingestor, Duration::from_secs(timeout));
            stop(ingestor, dispatcher);
            result
        }
        Commands::Reenrich { post_ids, timeout } => {
            let (ingestor, dispatcher) = app.start_ingestor()?;
            let ids: Vec<PostId> = post_ids.into_iter().map(PostId::from_string).collect();
            let result = ingestor.reenrich(&ids).map_err(Into::into).and_then(|summary| {
                print_json(&summary)?;
                wait_for_all(&ingestor, &summary.uploads, Duration::from_secs(timeout));
                Ok(())
            });
            stop(ingestor, dispatcher);
            result
        }
        Commands::Aggregate { filter } => {
            let aggregator = Aggregator::new(app.db.clone(), app.config.aggregator.clone());
            let summary = aggregator.aggregate(&filter.to_query()?)?;
            print_json(&summary)
        }
        Commands::Trends { days, filter } => {
            let aggregator = Aggregator::new(app.db.clone(), app.config.aggregator.clone());
            let mut query = filter.to_query()?;
            if filter.from.is_none() && filter.to.is_none() {
                query = query.last_days(days, Utc::now());
            }
            let trends = aggregator.sentiment_trends(&query)?;
            print_json(&trends)
        }
        Commands::Popular { limit, filter } => {
            let aggregator = Aggregator::new(app.db.clone(), app.config.aggregator.clone());
            let content = aggregator.popular_content(&filter.to_query()?, limit)?;
            print_json(&content)
        }
        Commands::Export {
            format,
            fields,
            out,
            filter,
        } => {
            let format: ExportFormat = format.parse()?;
            let exporter = Exporter::new(app.db.clone());
            let fields = (!fields.is_empty()).then_some(fields.as_slice());
            let bytes = exporter.export(&filter.to_query()?, format, fields)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &bytes)
                        .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
                    info!("Wrote {} bytes to {}", bytes.len(), path.display());
                }
                None => println!("{}", String::from_utf8_lossy(&bytes)),
            }
            Ok(())
        }
    }
}

fn recover(ingestor: &Ingestor, timeout: Duration) -> CliResult<()> {
    let summary = ingestor.recover()?;
    print_json(&summary)?;
    wait_for_all(ingestor, &summary.uploads, timeout);
    Ok(())
}

fn wait_for_all(ingestor: &Ingestor, upload_ids: &[UploadId], timeout: Duration) {
    for upload_id in upload_ids {
        match ingestor.wait_for_upload(upload_id, timeout) {
            Ok(report) => info!("Upload {} is {}", upload_id, report.status),
            Err(e) => warn!("Waiting for upload {} failed: {}", upload_id, e),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

//! The `rbh` command-line driver (spec §1 scope: a thin wrapper around the
//! library, not a predicate-language parser). Grounded on the teacher's
//! `tvix-store` binary for the overall shape (a `clap::Parser`/`Subcommand`
//! tree, `#[tokio::main]`, a tracing subscriber set up before anything else
//! runs) but scaled down to the three operations this crate exposes:
//! `sync` (drive a YAML fsevent file through the enrich pipeline into
//! Mongo), `find` (an exact-path lookup), and `undelete`.

use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use robinhood_core::backend::{Backend, InfoFlags};
use robinhood_core::error::{Error, Result};
use robinhood_core::filter::{Cmp, Field, Filter, FilterOptions, FilterOutput, Projection};
use robinhood_core::fsentry::{FsEntryMask, StatxMask};
use robinhood_core::id::BackendTag;
use robinhood_core::value::{Value, ValueMap};
use robinhood_core::walk::lustre::{LustreEnricher, UnsupportedLustreOps};
use robinhood_core::walk::retention::RetentionEnricher;
use robinhood_core::walk::sys::LinuxPosixOps;
use robinhood_core::walk::Enricher;
use robinhood_store::config::Config;
use robinhood_store::enrich_pipeline::EnrichPipeline;
use robinhood_store::mongo::MongoBackend;
use robinhood_store::source::yaml::YamlSource;
use robinhood_store::undelete::{Undelete, UnsupportedUndeleteOps};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, Level};

#[derive(Parser)]
#[command(author, version, about = "RobinHood filesystem metadata indexer", long_about = None)]
struct Cli {
    /// A global log level to use when printing logs. `RUST_LOG` always
    /// takes priority.
    #[arg(long)]
    log_level: Option<Level>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replays a YAML fsevent file through the enrich pipeline and applies
    /// it against the configured Mongo sink.
    Sync {
        /// The sync config file (mount, mongo, extensions).
        #[arg(long, env = "RBH_CONFIG")]
        config: PathBuf,

        /// The fsevent YAML file to replay.
        #[arg(long)]
        events: PathBuf,

        /// Overrides the config's `mongo.address`.
        #[arg(long, env = "RBH_MONGO_URI")]
        mongo_uri: Option<String>,

        /// Drop events whose referenced inode went stale or missing
        /// instead of aborting the batch.
        #[arg(long)]
        skip_error: bool,
    },
    /// Looks up the single entry linked at an exact path.
    Find {
        #[arg(long, env = "RBH_CONFIG")]
        config: PathBuf,

        #[arg(long, env = "RBH_MONGO_URI")]
        mongo_uri: Option<String>,

        /// The exact namespace path to look up.
        path: String,
    },
    /// Restores or lists entries tombstoned by an HSM-aware unlink.
    Undelete {
        #[arg(long, env = "RBH_CONFIG")]
        config: PathBuf,

        #[arg(long, env = "RBH_MONGO_URI")]
        mongo_uri: Option<String>,

        #[command(subcommand)]
        action: UndeleteAction,
    },
}

#[derive(Subcommand)]
enum UndeleteAction {
    /// Restores the entry tombstoned at `path`.
    Restore { path: String },
    /// Lists tombstoned entries whose path matches `regex`.
    List { regex: String },
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    robinhood_tracing::TracingBuilder::default()
        .level(cli.log_level.unwrap_or(Level::INFO))
        .build()?;

    match cli.command {
        Commands::Sync {
            config,
            events,
            mongo_uri,
            skip_error,
        } => run_sync(config, events, mongo_uri, skip_error).await?,
        Commands::Find {
            config,
            mongo_uri,
            path,
        } => run_find(config, mongo_uri, path).await?,
        Commands::Undelete {
            config,
            mongo_uri,
            action,
        } => run_undelete(config, mongo_uri, action).await?,
    }
    Ok(())
}

async fn load_config(path: &PathBuf) -> Result<Config> {
    let raw = tokio::fs::read_to_string(path).await?;
    Config::from_yaml_str(&raw).map_err(|e| Error::Invalid(e.to_string()))
}

async fn connect(config: &Config, mongo_uri: Option<&str>) -> Result<MongoBackend> {
    MongoBackend::connect(
        mongo_uri,
        &config.mongo,
        BackendTag::Posix,
        config.mount.path.display().to_string(),
        config.extensions.clone(),
    )
    .await
}

fn build_enrichers(extensions: &[String], sys: &Arc<LinuxPosixOps>) -> Vec<Box<dyn Enricher>> {
    let mut enrichers: Vec<Box<dyn Enricher>> = Vec::new();
    if extensions.iter().any(|e| e == "lustre") {
        enrichers.push(Box::new(LustreEnricher::new(UnsupportedLustreOps)));
    }
    if extensions.iter().any(|e| e == "retention") {
        enrichers.push(Box::new(RetentionEnricher::new(sys.clone())));
    }
    enrichers
}

async fn run_sync(
    config_path: PathBuf,
    events_path: PathBuf,
    mongo_uri: Option<String>,
    skip_error: bool,
) -> Result<()> {
    let config = load_config(&config_path).await?;
    let backend = connect(&config, mongo_uri.as_deref()).await?;

    let events_yaml = tokio::fs::read_to_string(&events_path).await?;
    let source = YamlSource::from_str(&events_yaml)?;
    let sys = Arc::new(LinuxPosixOps::new(config.mount.path.clone()));
    let enrichers = build_enrichers(&config.extensions, &sys);
    let mut pipeline = EnrichPipeline::new(source, sys, enrichers, skip_error);

    let started_at = now_secs();
    let mut applied_total = 0u64;
    while let Some((batch_id, fsevents)) = pipeline.next_batch().await? {
        let batch_len = fsevents.len();
        let applied = backend
            .update(stream::iter(fsevents).boxed())
            .await?;
        applied_total += applied;
        pipeline.ack_batch(batch_id).await?;
        info!(batch_id, batch_len, applied, "synced batch");
    }

    let mut log_row = ValueMap::new();
    log_row.insert("start".to_string(), Value::Int64(started_at));
    log_row.insert("events".to_string(), Value::Uint64(applied_total));
    backend.set_info(log_row, InfoFlags::empty()).await?;

    info!(applied_total, "sync complete");
    Ok(())
}

async fn run_find(config_path: PathBuf, mongo_uri: Option<String>, path: String) -> Result<()> {
    let config = load_config(&config_path).await?;
    let backend = connect(&config, mongo_uri.as_deref()).await?;

    let filter = Filter::Compare(Field::NsXattr("path".to_string()), Cmp::Eq, Value::String(path.clone()));
    let projection = Projection {
        fsentry_mask: FsEntryMask::ID
            | FsEntryMask::PARENT_ID
            | FsEntryMask::NAME
            | FsEntryMask::STATX
            | FsEntryMask::NS_XATTRS
            | FsEntryMask::INODE_XATTRS
            | FsEntryMask::SYMLINK,
        statx_mask: StatxMask::ALL,
        ..Projection::default()
    };
    let mut options = FilterOptions::default();
    options.one = true;
    let mut stream = backend
        .filter(filter, options, FilterOutput::Projection(projection))
        .await?;

    match stream.next().await {
        Some(entry) => {
            println!("{:#?}", entry?);
            Ok(())
        }
        None => Err(Error::NotFound(path)),
    }
}

async fn run_undelete(config_path: PathBuf, mongo_uri: Option<String>, action: UndeleteAction) -> Result<()> {
    let config = load_config(&config_path).await?;
    let backend: Arc<dyn Backend> = Arc::new(connect(&config, mongo_uri.as_deref()).await?);
    let undelete = Undelete::new(backend, UnsupportedUndeleteOps);

    match action {
        UndeleteAction::Restore { path } => {
            undelete.restore(&path).await?;
            info!(path, "restored");
        }
        UndeleteAction::List { regex } => {
            for entry in undelete.list(&regex).await? {
                println!("{}", entry.path().unwrap_or_default());
            }
        }
    }
    Ok(())
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

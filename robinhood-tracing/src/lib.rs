//! Tracing setup shared by the `rbh` binary and the sync pipeline.
//!
//! Walks and changelog replays are long-running and mostly silent between
//! log lines, so this wires up a spinner/progress layer alongside the
//! regular stderr formatter: any span tagged with `indicatif.pb_show` gets
//! a progress line, everything else is a plain log line.

use indicatif::ProgressStyle;
use lazy_static::lazy_static;
use tracing::Level;
use tracing_indicatif::{filter::IndicatifFilter, IndicatifLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

lazy_static! {
    pub static ref PB_PROGRESS_STYLE: ProgressStyle = ProgressStyle::with_template(
        "{span_child_prefix}{bar:30} {wide_msg} [{elapsed_precise}]  {pos:>7}/{len:7}"
    )
    .expect("invalid progress template");
    pub static ref PB_SPINNER_STYLE: ProgressStyle = ProgressStyle::with_template(
        "{span_child_prefix}{spinner} {wide_msg} [{elapsed_precise}]  {pos:>7}/{len:7}"
    )
    .expect("invalid progress template");
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Handle returned by [TracingBuilder::build]. Kept around for the
/// lifetime of the process; dropping it does not tear down tracing, it
/// merely exists as a symmetrical counterpart so callers have somewhere
/// to later hang a flush/shutdown operation.
#[derive(Clone)]
pub struct TracingHandle;

pub struct TracingBuilder {
    level: Level,
}

impl Default for TracingBuilder {
    fn default() -> Self {
        TracingBuilder { level: Level::INFO }
    }
}

impl TracingBuilder {
    /// Sets the log level for the stderr layer. `RUST_LOG` still takes
    /// priority over this value.
    pub fn level(mut self, level: Level) -> TracingBuilder {
        self.level = level;
        self
    }

    /// Sets up a stderr writer layer and an [EnvFilter] seeded from the
    /// configured level (`RUST_LOG` overrides it), plus a progress-bar
    /// layer for spans that opt in via `indicatif.pb_show`.
    pub fn build(self) -> Result<TracingHandle, Error> {
        let indicatif_layer = IndicatifLayer::new().with_progress_style(PB_SPINNER_STYLE.clone());
        let subscriber = tracing_subscriber::registry()
            .with(
                EnvFilter::builder()
                    .with_default_directive(self.level.into())
                    .from_env()
                    .expect("invalid RUST_LOG"),
            )
            .with(
                tracing_subscriber::fmt::Layer::new()
                    .with_writer(indicatif_layer.get_stderr_writer())
                    .compact(),
            )
            .with(indicatif_layer.with_filter(IndicatifFilter::new(false)));

        subscriber.try_init()?;
        Ok(TracingHandle)
    }
}

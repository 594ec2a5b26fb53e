//! Fsevent sources: the YAML file source (§4.10) and the Lustre
//! changelog source (§4.9), both driving the same [Source] contract so
//! `enrich_pipeline` and the top-level sync driver don't special-case
//! either.

pub mod changelog;
pub mod yaml;

use robinhood_core::error::Result;
use robinhood_core::fsevent::PendingEvent;
use tonic::async_trait;

/// A batch identifier handed back by [Source::next_batch] and later
/// passed to [Source::ack_batch] once every event in it has been applied.
pub type BatchId = u64;

/// A lazy, single-producer source of fsevents, batched for ack purposes
/// (spec §5: "single-threaded cooperative per source/sink pair").
#[async_trait]
pub trait Source: Send {
    /// Pulls the next batch of events. Returns `Ok(None)` at end of
    /// stream (the YAML source's "no more data" sentinel, spec §4.10).
    async fn next_batch(&mut self) -> Result<Option<(BatchId, Vec<PendingEvent>)>>;

    /// Acknowledges that every event in `batch` was durably applied.
    /// Sources without durable state (e.g. the YAML source) no-op.
    async fn ack_batch(&mut self, batch: BatchId) -> Result<()>;
}

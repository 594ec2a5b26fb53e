//! Wraps a [crate::source::Source] and resolves every
//! [robinhood_core::fsevent::EnrichHints] it carries before handing
//! events downstream (spec §4.8): open the referenced inode by id
//! against the mount, statx it if requested, run the lustre/retention
//! enrichers, and emit a fully materialized event.

use robinhood_core::error::{Error, Result};
use robinhood_core::fsentry::Statx;
use robinhood_core::fsevent::{FsEvent, PendingEvent};
use robinhood_core::sstack::Sstack;
use robinhood_core::walk::sys::PosixOps;
use robinhood_core::walk::Enricher;
use std::sync::Arc;

use crate::source::{BatchId, Source};

/// `skip_error` mirrors [robinhood_core::filter::FilterOptions::skip_error]:
/// when set, `ENOENT`/`ESTALE` on the referenced inode is swallowed and
/// the event dropped rather than surfaced (spec §4.8).
pub struct EnrichPipeline<So: Source, S: PosixOps> {
    source: So,
    sys: Arc<S>,
    enrichers: Vec<Box<dyn Enricher>>,
    skip_error: bool,
    scratch: Sstack,
}

impl<So: Source, S: PosixOps> EnrichPipeline<So, S> {
    pub fn new(
        source: So,
        sys: Arc<S>,
        enrichers: Vec<Box<dyn Enricher>>,
        skip_error: bool,
    ) -> Self {
        EnrichPipeline {
            source,
            sys,
            enrichers,
            skip_error,
            scratch: Sstack::default(),
        }
    }

    pub async fn next_batch(&mut self) -> Result<Option<(BatchId, Vec<FsEvent>)>> {
        let Some((batch_id, events)) = self.source.next_batch().await? else {
            return Ok(None);
        };
        let mut out = Vec::with_capacity(events.len());
        for mut pending in events {
            match self.resolve(&mut pending).await {
                Ok(()) => out.push(pending.event),
                Err(e) if self.skip_error && is_stale_or_missing(&e) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Some((batch_id, out)))
    }

    pub async fn ack_batch(&mut self, batch: BatchId) -> Result<()> {
        self.source.ack_batch(batch).await
    }

    async fn resolve(&mut self, pending: &mut PendingEvent) -> Result<()> {
        if !pending.needs_enrichment() {
            return Ok(());
        }

        if let Some(mask) = pending.hints.statx_mask {
            let path = self.sys.resolve_path(pending.event.id())?;
            let fresh = self.sys.statx(&path, mask)?;
            merge_statx_into(&mut pending.event, fresh);
        }

        if pending.hints.symlink {
            let path = self.sys.resolve_path(pending.event.id())?;
            if let Ok(target) = std::fs::read_link(&path) {
                if let FsEvent::Upsert { symlink, .. } = &mut pending.event {
                    *symlink = Some(target.to_string_lossy().into_owned());
                }
            }
            pending.hints.symlink = false;
        }

        for enricher in &self.enrichers {
            if pending.hints.extensions.iter().any(|e| e == enricher.name()) {
                enricher.enrich(pending, &mut self.scratch).await?;
            }
        }

        Ok(())
    }
}

fn merge_statx_into(event: &mut FsEvent, fresh: Statx) {
    if let FsEvent::Upsert { statx, .. } = event {
        match statx {
            Some(existing) => existing.merge(fresh),
            None => *statx = Some(fresh),
        }
    }
}

fn is_stale_or_missing(e: &Error) -> bool {
    matches!(e, Error::NotFound(_) | Error::Stale(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::yaml::YamlSource;
    use robinhood_core::walk::sys::FakePosixOps;

    #[tokio::test]
    async fn plain_events_pass_through_untouched() {
        let yaml = "type: delete\nid:\n  tag: posix\n  handle: \"\"\n";
        let source = YamlSource::from_str(yaml).unwrap();
        let sys = Arc::new(FakePosixOps::default());
        let mut pipeline = EnrichPipeline::new(source, sys, vec![], false);
        let (_id, events) = pipeline.next_batch().await.unwrap().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], FsEvent::Delete { .. }));
    }
}

//! The enricher contract (spec §4.5): a pluggable step that fills in
//! extra statx bits, symlink targets, or inode xattrs a plain walk or a
//! changelog record didn't carry, before a [crate::fsevent::PendingEvent]
//! is handed to a sink.
//!
//! Every enricher writes scratch data through a [crate::sstack::Sstack]
//! rather than allocating per-call, and must not contribute more than
//! `max_pairs` xattr entries per call — the pipeline (`robinhood-store`)
//! enforces this bound across the whole chain, not any single enricher.

use crate::error::Result;
use crate::fsevent::PendingEvent;
use crate::sstack::Sstack;
use tonic::async_trait;

/// One step of the enricher chain. Implementations mutate `pending` in
/// place, clearing whichever [crate::fsevent::EnrichHints] they resolved.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Short, stable name used in `EnrichHints::extensions` to address
    /// this enricher specifically (spec §4.7).
    fn name(&self) -> &'static str;

    /// Upper bound on how many inode-xattr key/value pairs this enricher
    /// will add in one call. Callers use this to preallocate `scratch`.
    fn max_pairs(&self) -> usize;

    async fn enrich(&self, pending: &mut PendingEvent, scratch: &mut Sstack) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsevent::FsEvent;
    use crate::id::{BackendTag, Id};

    struct NoopEnricher;

    #[async_trait]
    impl Enricher for NoopEnricher {
        fn name(&self) -> &'static str {
            "noop"
        }

        fn max_pairs(&self) -> usize {
            0
        }

        async fn enrich(&self, pending: &mut PendingEvent, _scratch: &mut Sstack) -> Result<()> {
            pending.hints.extensions.retain(|e| e != self.name());
            Ok(())
        }
    }

    #[tokio::test]
    async fn enricher_clears_its_own_hint() {
        let id = Id::new(BackendTag::Posix, b"x".to_vec());
        let mut pending = PendingEvent::plain(FsEvent::Delete { id });
        pending.hints.extensions.push("noop".to_string());
        let mut scratch = Sstack::default();
        NoopEnricher.enrich(&mut pending, &mut scratch).await.unwrap();
        assert!(pending.hints.extensions.is_empty());
    }
}

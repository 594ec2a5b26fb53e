//! The retention enricher: reads the `user.expires` xattr (a Unix
//! timestamp string) through [PosixOps] and surfaces it as an
//! `expires` namespace xattr on the `Link` event that carries the path,
//! so filters like `expires < now` work without every sink
//! re-implementing the xattr-name convention.
//!
//! Runs only on `Link` events: that is the one event shape that carries
//! a resolvable on-disk path (via `ns_xattrs["path"]`), set by the
//! walker at ingest time.

use crate::error::Result;
use crate::fsevent::{FsEvent, PendingEvent};
use crate::sstack::Sstack;
use crate::value::Value;
use crate::walk::enrich::Enricher;
use crate::walk::sys::PosixOps;
use std::path::Path;
use std::sync::Arc;
use tonic::async_trait;

pub const NAME: &str = "retention";
const XATTR_NAME: &str = "user.expires";

pub struct RetentionEnricher<S: PosixOps> {
    sys: Arc<S>,
}

impl<S: PosixOps> RetentionEnricher<S> {
    pub fn new(sys: Arc<S>) -> Self {
        RetentionEnricher { sys }
    }
}

#[async_trait]
impl<S: PosixOps> Enricher for RetentionEnricher<S> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn max_pairs(&self) -> usize {
        1
    }

    async fn enrich(&self, pending: &mut PendingEvent, _scratch: &mut Sstack) -> Result<()> {
        if !pending.hints.extensions.iter().any(|e| e == NAME) {
            return Ok(());
        }

        if let FsEvent::Link { ns_xattrs, .. } = &mut pending.event {
            let path = ns_xattrs.get("path").and_then(|v| v.as_str()).map(Path::new);
            if let Some(path) = path {
                if let Some(raw) = self.sys.get_xattr(path, XATTR_NAME)? {
                    if let Ok(text) = String::from_utf8(raw) {
                        if let Ok(expires) = text.trim().parse::<i64>() {
                            ns_xattrs.insert("expires".to_string(), Value::Int64(expires));
                        }
                    }
                }
            }
        }

        pending.hints.extensions.retain(|e| e != NAME);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsevent::EnrichHints;
    use crate::id::{BackendTag, Id};
    use crate::value::ValueMap;
    use crate::walk::sys::{FakeEntry, FakePosixOps};
    use std::collections::HashMap;

    #[tokio::test]
    async fn reads_expires_xattr_into_ns_xattrs() {
        let mut entries = HashMap::new();
        entries.insert(
            std::path::PathBuf::from("a/b"),
            FakeEntry {
                xattrs: [(XATTR_NAME.to_string(), b"1700000000".to_vec())]
                    .into_iter()
                    .collect(),
                ..Default::default()
            },
        );
        let sys = Arc::new(FakePosixOps { entries });
        let enricher = RetentionEnricher::new(sys);

        let mut ns_xattrs = ValueMap::new();
        ns_xattrs.insert("path".to_string(), Value::String("a/b".to_string()));
        let mut pending = PendingEvent {
            event: FsEvent::Link {
                id: Id::new(BackendTag::Posix, b"h".to_vec()),
                parent_id: Id::root_parent(BackendTag::Posix),
                name: "b".to_string(),
                ns_xattrs,
            },
            hints: EnrichHints {
                extensions: vec![NAME.to_string()],
                ..Default::default()
            },
        };

        enricher
            .enrich(&mut pending, &mut Sstack::default())
            .await
            .unwrap();

        match &pending.event {
            FsEvent::Link { ns_xattrs, .. } => {
                assert_eq!(ns_xattrs.get("expires").unwrap().as_i64(), Some(1700000000));
            }
            _ => panic!("expected link event"),
        }
        assert!(pending.hints.extensions.is_empty());
    }

    #[tokio::test]
    async fn non_link_events_are_left_untouched_but_hint_clears() {
        let sys = Arc::new(FakePosixOps::default());
        let enricher = RetentionEnricher::new(sys);
        let mut pending = PendingEvent {
            event: FsEvent::Delete {
                id: Id::new(BackendTag::Posix, b"h".to_vec()),
            },
            hints: EnrichHints {
                extensions: vec![NAME.to_string()],
                ..Default::default()
            },
        };
        enricher
            .enrich(&mut pending, &mut Sstack::default())
            .await
            .unwrap();
        assert!(pending.hints.extensions.is_empty());
    }
}

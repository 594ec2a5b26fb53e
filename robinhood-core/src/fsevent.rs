//! The change-event algebra a [crate::fsentry::FsEntry] store mutates
//! through (spec §3.4, §4.7).

use crate::fsentry::Statx;
use crate::id::Id;
use crate::value::{Value, ValueMap};
use std::collections::BTreeMap;

/// A name-scoped xattr update, as carried by `XATTR { ns: Some(..) }`.
#[derive(Debug, Clone, PartialEq)]
pub struct NsXattrUpdate {
    pub parent_id: Id,
    pub name: String,
    pub xattrs: ValueMap,
}

/// The nested `{op: "set" | "inc", value}` envelope an `XATTR` value may
/// carry in place of a plain value, e.g. for `nb_children` adjustments.
#[derive(Debug, Clone, PartialEq)]
pub enum XattrOp {
    Set(Value),
    Inc(i64),
}

/// Inode-xattr updates carried by an [FsEvent::Xattr], keyed by xattr
/// name, each either a plain overwrite or an accumulating increment
/// (e.g. `nb_children`).
pub type XattrOps = BTreeMap<String, XattrOp>;

#[derive(Debug, Clone, PartialEq)]
pub enum FsEvent {
    /// Merge statx/symlink for an existing or new inode.
    Upsert {
        id: Id,
        statx: Option<Statx>,
        symlink: Option<String>,
    },
    /// Create a namespace edge.
    Link {
        id: Id,
        parent_id: Id,
        name: String,
        ns_xattrs: ValueMap,
    },
    /// Remove a namespace edge.
    Unlink {
        id: Id,
        parent_id: Id,
        name: String,
    },
    /// Merge xattrs, inode-level and/or name-scoped.
    Xattr {
        id: Id,
        inode_xattrs: Option<XattrOps>,
        ns: Option<NsXattrUpdate>,
    },
    /// Remove the inode document entirely.
    Delete { id: Id },
    /// Remove a namespace edge and stamp a tombstone (used when an HSM
    /// copy survives the unlink).
    PartialUnlink { id: Id, rm_time: i64 },
}

impl FsEvent {
    pub fn id(&self) -> &Id {
        match self {
            FsEvent::Upsert { id, .. }
            | FsEvent::Link { id, .. }
            | FsEvent::Unlink { id, .. }
            | FsEvent::Xattr { id, .. }
            | FsEvent::Delete { id }
            | FsEvent::PartialUnlink { id, .. } => id,
        }
    }
}

/// Top-level enrichment hints an event may carry (spec §4.7): "please
/// enrich before applying", keyed by extension name or a statx-bit mask.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnrichHints {
    pub extensions: Vec<String>,
    pub statx_mask: Option<crate::fsentry::StatxMask>,
    pub symlink: bool,
}

impl EnrichHints {
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty() && self.statx_mask.is_none() && !self.symlink
    }
}

/// An [FsEvent] plus the enrichment hints that must be resolved before a
/// sink may apply it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub event: FsEvent,
    pub hints: EnrichHints,
}

impl PendingEvent {
    pub fn plain(event: FsEvent) -> Self {
        PendingEvent {
            event,
            hints: EnrichHints::default(),
        }
    }

    pub fn needs_enrichment(&self) -> bool {
        !self.hints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::BackendTag;

    #[test]
    fn plain_event_needs_no_enrichment() {
        let id = Id::new(BackendTag::Lustre, b"x".to_vec());
        let ev = PendingEvent::plain(FsEvent::Delete { id });
        assert!(!ev.needs_enrichment());
    }

    #[test]
    fn hinted_event_needs_enrichment() {
        let id = Id::new(BackendTag::Lustre, b"x".to_vec());
        let mut ev = PendingEvent::plain(FsEvent::Delete { id });
        ev.hints.extensions.push("lustre".to_string());
        assert!(ev.needs_enrichment());
    }
}

//! The undelete tool (spec §4.13): given a target path, finds the
//! tombstoned fsentry the store kept around after an HSM-aware unlink,
//! restores it on the filesystem, and clears the tombstone.
//!
//! `UndeleteOps` is a small seam over the filesystem-specific restore
//! call, kept separate from [robinhood_core::walk::sys::PosixOps] the
//! same way [robinhood_core::walk::lustre::LustreOps] is kept separate
//! from it: a real deployment wires in Lustre's `hsm_import`, tests wire
//! in a fake.

use robinhood_core::backend::Backend;
use robinhood_core::error::{Error, Result};
use robinhood_core::filter::{Cmp, Field, Filter, FilterOptions, FilterOutput, Projection};
use robinhood_core::fsentry::{FsEntry, FsEntryMask, Statx};
use robinhood_core::id::Id;
use robinhood_core::value::Value;
use futures::StreamExt;
use std::sync::Arc;
use tonic::async_trait;

/// Abstracts the filesystem-specific "bring this file back" call. On
/// Lustre this wraps `llapi_hsm_import`, reconstructing the file from its
/// HSM copy using the original statx as a template.
#[async_trait]
pub trait UndeleteOps: Send + Sync {
    async fn undelete(&self, path: &str, archive_id: u32, template: &Statx) -> Result<()>;
}

/// Always reports not-supported; the default when no filesystem-specific
/// restore is configured.
pub struct UnsupportedUndeleteOps;

#[async_trait]
impl UndeleteOps for UnsupportedUndeleteOps {
    async fn undelete(&self, _path: &str, _archive_id: u32, _template: &Statx) -> Result<()> {
        Err(Error::NotSupported("undelete".to_string()))
    }
}

pub struct Undelete<O: UndeleteOps> {
    backend: Arc<dyn Backend>,
    ops: O,
}

impl<O: UndeleteOps> Undelete<O> {
    pub fn new(backend: Arc<dyn Backend>, ops: O) -> Self {
        Undelete { backend, ops }
    }

    /// Restores the entry tombstoned at `path` (spec §4.13): looks it up
    /// requiring an absent `parent_id`/`name` (the archived-then-deleted
    /// invariant a `PARTIAL_UNLINK` leaves behind), requires
    /// `hsm_archive_id` in its inode xattrs, calls the filesystem's
    /// restore with the old statx as a template, then issues `DELETE`
    /// against the store so the tombstone is removed.
    pub async fn restore(&self, path: &str) -> Result<()> {
        let entry = self.find_tombstone(path).await?;
        let archive_id = entry
            .inode_xattrs
            .get("hsm_archive_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                Error::Invalid(format!("{path}: no hsm_archive_id, not HSM-archived"))
            })? as u32;

        self.ops.undelete(path, archive_id, &entry.statx).await?;
        self.backend.delete_entry(&entry).await
    }

    /// Lists every tombstoned entry under `prefix` (a path regex), for
    /// `rbh undelete --list` (spec §4.13): entries whose `path` ns xattr
    /// matches and which carry an `rm_time`.
    pub async fn list(&self, prefix_regex: &str) -> Result<Vec<FsEntry>> {
        let filter = Filter::Compare(
            Field::NsXattr("path".to_string()),
            Cmp::Eq,
            Value::Regex(prefix_regex.to_string(), String::new()),
        )
        .and(Filter::Compare(
            Field::NsXattr("rm_time".to_string()),
            Cmp::Gte,
            Value::Int64(0),
        ));
        let projection = Projection {
            fsentry_mask: FsEntryMask::ID | FsEntryMask::STATX | FsEntryMask::NS_XATTRS | FsEntryMask::INODE_XATTRS,
            ..Projection::default()
        };
        let mut stream = self
            .backend
            .filter(filter, FilterOptions::default(), FilterOutput::Projection(projection))
            .await?;
        let mut out = Vec::new();
        while let Some(entry) = stream.next().await {
            out.push(entry?);
        }
        Ok(out)
    }

    async fn find_tombstone(&self, path: &str) -> Result<FsEntry> {
        let filter = Filter::Compare(
            Field::NsXattr("path".to_string()),
            Cmp::Eq,
            Value::String(path.to_string()),
        );
        let mut options = FilterOptions::default();
        options.one = true;
        let projection = Projection {
            fsentry_mask: FsEntryMask::ID
                | FsEntryMask::PARENT_ID
                | FsEntryMask::NAME
                | FsEntryMask::STATX
                | FsEntryMask::NS_XATTRS
                | FsEntryMask::INODE_XATTRS,
            ..Projection::default()
        };
        let mut stream = self
            .backend
            .filter(filter, options, FilterOutput::Projection(projection))
            .await?;
        let entry = stream
            .next()
            .await
            .ok_or_else(|| Error::NotFound(path.to_string()))??;
        if !entry.parent_id.is_root_parent() || !entry.name.is_empty() {
            return Err(Error::Invalid(format!(
                "{path}: still linked, nothing to undelete"
            )));
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, BoxStream};
    use robinhood_core::backend::branch::Branch;
    use robinhood_core::backend::{Capabilities, InfoFlags, Plugin};
    use robinhood_core::fsentry::Statx;
    use robinhood_core::fsevent::FsEvent;
    use robinhood_core::id::BackendTag;
    use robinhood_core::value::ValueMap;
    use std::sync::Mutex;

    struct FakeBackend {
        entry: FsEntry,
        deleted: Mutex<Vec<Id>>,
    }

    #[async_trait]
    impl Backend for FakeBackend {
        fn plugin(&self) -> Plugin {
            Plugin {
                name: "fake",
                version: (0, 1),
                capabilities: Capabilities::empty(),
            }
        }
        async fn get_option(&self, _key: &str) -> Result<Value> {
            Err(Error::NotSupported("".into()))
        }
        async fn set_option(&self, _key: &str, _value: Value) -> Result<()> {
            Err(Error::NotSupported("".into()))
        }
        async fn branch(&self, _id: Option<Id>, _path: Option<String>) -> Result<Branch> {
            Err(Error::NotSupported("".into()))
        }
        async fn root(&self, _projection: Projection) -> Result<FsEntry> {
            Err(Error::NotSupported("".into()))
        }
        async fn filter(
            &self,
            _filter: Filter,
            _options: FilterOptions,
            _output: FilterOutput,
        ) -> Result<BoxStream<'static, Result<FsEntry>>> {
            Ok(stream::iter(vec![Ok(self.entry.clone())]).boxed())
        }
        async fn update(&self, _events: BoxStream<'static, FsEvent>) -> Result<u64> {
            Ok(0)
        }
        async fn report(
            &self,
            _filter: Filter,
            _group_by: Vec<String>,
            _options: FilterOptions,
            _output: FilterOutput,
        ) -> Result<BoxStream<'static, Result<ValueMap>>> {
            Err(Error::NotSupported("".into()))
        }
        async fn get_info(&self, _flags: InfoFlags) -> Result<ValueMap> {
            Ok(ValueMap::new())
        }
        async fn set_info(&self, _info: ValueMap, _flags: InfoFlags) -> Result<()> {
            Ok(())
        }
        async fn get_attribute(&self, _id: &Id, _keys: &[String]) -> Result<ValueMap> {
            Ok(ValueMap::new())
        }
        async fn delete_entry(&self, entry: &FsEntry) -> Result<()> {
            self.deleted.lock().unwrap().push(entry.id.clone());
            Ok(())
        }
    }

    struct FakeUndeleteOps;

    #[async_trait]
    impl UndeleteOps for FakeUndeleteOps {
        async fn undelete(&self, _path: &str, archive_id: u32, _template: &Statx) -> Result<()> {
            assert_eq!(archive_id, 3);
            Ok(())
        }
    }

    fn tombstoned_entry() -> FsEntry {
        let id = Id::new(BackendTag::Posix, b"i".to_vec());
        let mut ns_xattrs = ValueMap::new();
        ns_xattrs.insert("path".to_string(), Value::String("/f".to_string()));
        ns_xattrs.insert("rm_time".to_string(), Value::Int64(1_700_000_000));
        let mut inode_xattrs = ValueMap::new();
        inode_xattrs.insert("hsm_archive_id".to_string(), Value::Int64(3));
        FsEntry {
            mask: FsEntryMask::ID | FsEntryMask::PARENT_ID | FsEntryMask::NAME,
            id,
            parent_id: Id::root_parent(BackendTag::Posix),
            name: String::new(),
            statx: Statx::default(),
            ns_xattrs,
            inode_xattrs,
            symlink: None,
        }
    }

    #[tokio::test]
    async fn restore_deletes_the_tombstone_after_filesystem_import() {
        let backend = Arc::new(FakeBackend {
            entry: tombstoned_entry(),
            deleted: Mutex::new(Vec::new()),
        });
        let undelete = Undelete::new(backend.clone(), FakeUndeleteOps);
        undelete.restore("/f").await.unwrap();
        assert_eq!(backend.deleted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn restore_rejects_an_entry_that_is_still_linked() {
        let mut entry = tombstoned_entry();
        entry.name = "f".to_string();
        entry.parent_id = Id::new(BackendTag::Posix, b"p".to_vec());
        let backend = Arc::new(FakeBackend {
            entry,
            deleted: Mutex::new(Vec::new()),
        });
        let undelete = Undelete::new(backend, FakeUndeleteOps);
        let err = undelete.restore("/f").await.unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }
}

//! A single-pass YAML fsevent source (spec §4.10): each YAML document is
//! one fsevent, tagged by `type`. There is no ack-worthy durable state,
//! so `ack_batch` is a no-op and every event is its own batch of one.

use crate::source::{BatchId, Source};
use robinhood_core::error::{Error, Result};
use robinhood_core::fsentry::{FileType, Statx, StatxMask};
use robinhood_core::fsevent::{FsEvent, NsXattrUpdate, PendingEvent, XattrOp};
use robinhood_core::id::Id;
use robinhood_core::value::ValueMap;
use serde::Deserialize;
use tonic::async_trait;

/// Plain mirror of [Statx] with all-optional fields, since [Statx] itself
/// carries no serde impls (it is built from real `statx(2)` results, not
/// meant as a wire format) — the mask is derived from which fields are
/// present rather than read from YAML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct YamlStatx {
    mode: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
    atime: Option<i64>,
    mtime: Option<i64>,
    ctime: Option<i64>,
    btime: Option<i64>,
    size: Option<u64>,
    file_type: Option<String>,
}

impl From<YamlStatx> for Statx {
    fn from(y: YamlStatx) -> Self {
        let mut mask = StatxMask::empty();
        macro_rules! bit {
            ($field:ident, $flag:ident) => {
                if y.$field.is_some() {
                    mask.insert(StatxMask::$flag);
                }
            };
        }
        bit!(mode, MODE);
        bit!(uid, UID);
        bit!(gid, GID);
        bit!(atime, ATIME);
        bit!(mtime, MTIME);
        bit!(ctime, CTIME);
        bit!(btime, BTIME);
        bit!(size, SIZE);

        let file_type = y.file_type.as_deref().map(|s| match s {
            "directory" => FileType::Directory,
            "symlink" => FileType::Symlink,
            "block" => FileType::BlockDevice,
            "char" => FileType::CharDevice,
            "fifo" => FileType::Fifo,
            "socket" => FileType::Socket,
            _ => FileType::Regular,
        });
        if file_type.is_some() {
            mask.insert(StatxMask::TYPE);
        }

        Statx {
            mask,
            mode: y.mode,
            uid: y.uid,
            gid: y.gid,
            atime: y.atime,
            mtime: y.mtime,
            ctime: y.ctime,
            btime: y.btime,
            size: y.size,
            blocks: None,
            nlink: None,
            dev: None,
            rdev: None,
            ino: None,
            file_type,
            mount_id: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum YamlEvent {
    Upsert {
        id: Id,
        #[serde(default)]
        statx: Option<YamlStatx>,
        #[serde(default)]
        symlink: Option<String>,
    },
    Link {
        id: Id,
        parent_id: Id,
        name: String,
        #[serde(default)]
        ns_xattrs: ValueMap,
    },
    Unlink {
        id: Id,
        parent_id: Id,
        name: String,
    },
    Xattr {
        id: Id,
        #[serde(default)]
        inode_xattrs: Option<ValueMap>,
        #[serde(default)]
        ns: Option<YamlNsXattrUpdate>,
    },
    Delete {
        id: Id,
    },
    PartialUnlink {
        id: Id,
        rm_time: i64,
    },
}

#[derive(Debug, Deserialize)]
struct YamlNsXattrUpdate {
    parent_id: Id,
    name: String,
    xattrs: ValueMap,
}

impl From<YamlEvent> for FsEvent {
    fn from(e: YamlEvent) -> Self {
        match e {
            YamlEvent::Upsert { id, statx, symlink } => FsEvent::Upsert {
                id,
                statx: statx.map(Into::into),
                symlink,
            },
            YamlEvent::Link {
                id,
                parent_id,
                name,
                ns_xattrs,
            } => FsEvent::Link {
                id,
                parent_id,
                name,
                ns_xattrs,
            },
            YamlEvent::Unlink {
                id,
                parent_id,
                name,
            } => FsEvent::Unlink {
                id,
                parent_id,
                name,
            },
            YamlEvent::Xattr {
                id,
                inode_xattrs,
                ns,
            } => FsEvent::Xattr {
                id,
                inode_xattrs: inode_xattrs
                    .map(|m| m.into_iter().map(|(k, v)| (k, XattrOp::Set(v))).collect()),
                ns: ns.map(|n| NsXattrUpdate {
                    parent_id: n.parent_id,
                    name: n.name,
                    xattrs: n.xattrs,
                }),
            },
            YamlEvent::Delete { id } => FsEvent::Delete { id },
            YamlEvent::PartialUnlink { id, rm_time } => FsEvent::PartialUnlink { id, rm_time },
        }
    }
}

/// Parses a full YAML stream up front into a queue of events. Large
/// enough changelogs should prefer the Lustre source; this one targets
/// test fixtures and small one-off imports (spec §4.10).
pub struct YamlSource {
    pending: std::collections::VecDeque<FsEvent>,
    next_batch_id: BatchId,
}

impl YamlSource {
    pub fn from_str(content: &str) -> Result<Self> {
        let mut pending = std::collections::VecDeque::new();
        for doc in serde_yaml::Deserializer::from_str(content) {
            let event: YamlEvent = Deserialize::deserialize(doc)
                .map_err(|e| Error::Invalid(format!("invalid fsevent document: {e}")))?;
            pending.push_back(event.into());
        }
        Ok(YamlSource {
            pending,
            next_batch_id: 0,
        })
    }
}

#[async_trait]
impl Source for YamlSource {
    async fn next_batch(&mut self) -> Result<Option<(BatchId, Vec<PendingEvent>)>> {
        let Some(event) = self.pending.pop_front() else {
            return Ok(None);
        };
        let id = self.next_batch_id;
        self.next_batch_id += 1;
        Ok(Some((id, vec![PendingEvent::plain(event)])))
    }

    async fn ack_batch(&mut self, _batch: BatchId) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_link_and_delete_documents() {
        let yaml = r#"
type: link
id:
  tag: posix
  handle: aGVsbG8=
parent_id:
  tag: posix
  handle: ""
name: hello.txt
---
type: delete
id:
  tag: posix
  handle: aGVsbG8=
"#;
        let mut source = YamlSource::from_str(yaml).unwrap();
        let (_id, batch1) = source.next_batch().await.unwrap().unwrap();
        assert!(matches!(batch1[0].event, FsEvent::Link { .. }));
        let (_id, batch2) = source.next_batch().await.unwrap().unwrap();
        assert!(matches!(batch2[0].event, FsEvent::Delete { .. }));
        assert!(source.next_batch().await.unwrap().is_none());
    }
}

//! The Lustre MDT changelog source (spec §4.9): reads changelog records,
//! expands each into a batch of fsevents per the record-type table, and
//! tracks a FIFO of in-flight batches so changelog clearing only advances
//! once every fsevent derived from a record has been acked by the sink.

use crate::source::{BatchId, Source};
use robinhood_core::error::Result;
use robinhood_core::fsentry::{Statx, StatxMask};
use robinhood_core::fsevent::{EnrichHints, FsEvent, PendingEvent, XattrOp, XattrOps};
use robinhood_core::id::Id;
use robinhood_core::value::{Value, ValueMap};
use std::collections::VecDeque;
use tonic::async_trait;

/// The subset of changelog record types this source understands,
/// mirroring `llapi_changelog` record type codes (spec §4.9's table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Create,
    Mkdir,
    Setattr,
    Close,
    Mtime,
    Ctime,
    Atime,
    Setxattr,
    Softlink,
    Hardlink,
    Mknod,
    Unlink,
    Rmdir,
    Rename,
    Hsm,
    Trunc,
    Layout,
    Flrw,
    Resync,
    Migrate,
    /// MARK, EXT, OPEN, deprecated XATTR, GETXATTR, DN_OPEN: skipped.
    Skipped,
}

/// One raw changelog record, as `llapi_changelog_recv` would hand it
/// back. Times are seconds since epoch; `overwritten_target` is only
/// meaningful for `RENAME`.
#[derive(Debug, Clone)]
pub struct ChangelogRecord {
    pub index: u64,
    pub record_type: RecordType,
    pub id: Id,
    pub parent_id: Id,
    pub name: String,
    pub time: i64,
    pub is_last_link: bool,
    pub hsm_archived: bool,
    pub symlink_target: Option<String>,
    pub xattr_name: Option<String>,
    pub rename_source: Option<(Id, String)>,
    pub overwritten_target: Option<Id>,
    pub mdt_index: Option<String>,
}

/// Abstracts `llapi_changelog_start`/`_recv`/`_clear`, so the batching
/// and ack logic below is unit-testable without a Lustre MDT.
pub trait ChangelogReader: Send {
    fn recv(&mut self) -> Result<Option<ChangelogRecord>>;
    fn clear(&mut self, mdt: &str, user: &str, up_to_index: u64) -> Result<()>;
}

/// An in-memory [ChangelogReader] backed by a fixed record list, used by
/// tests and by the dump-file dev mode's reverse direction.
pub struct FakeChangelogReader {
    records: VecDeque<ChangelogRecord>,
    pub cleared_up_to: Option<u64>,
}

impl FakeChangelogReader {
    pub fn new(records: Vec<ChangelogRecord>) -> Self {
        FakeChangelogReader {
            records: records.into(),
            cleared_up_to: None,
        }
    }
}

impl ChangelogReader for FakeChangelogReader {
    fn recv(&mut self) -> Result<Option<ChangelogRecord>> {
        Ok(self.records.pop_front())
    }

    fn clear(&mut self, _mdt: &str, _user: &str, up_to_index: u64) -> Result<()> {
        self.cleared_up_to = Some(up_to_index);
        Ok(())
    }
}

/// One in-flight batch tracked by the FIFO ack protocol (spec §4.9).
struct PendingBatch {
    id: BatchId,
    last_changelog_index: u64,
    ack_required: u32,
}

pub struct ChangelogSource<R: ChangelogReader> {
    reader: R,
    mdt: String,
    user: String,
    dedup: bool,
    fifo: std::sync::Mutex<VecDeque<PendingBatch>>,
    next_batch_id: BatchId,
    dump: Option<Box<dyn std::io::Write + Send>>,
}

impl<R: ChangelogReader> ChangelogSource<R> {
    pub fn new(reader: R, mdt: String, user: String, dedup: bool) -> Self {
        ChangelogSource {
            reader,
            mdt,
            user,
            dedup,
            fifo: std::sync::Mutex::new(VecDeque::new()),
            next_batch_id: 0,
            dump: None,
        }
    }

    pub fn with_dump(mut self, dump: Box<dyn std::io::Write + Send>) -> Self {
        self.dump = Some(dump);
        self
    }

    fn save_batch(&mut self, last_changelog_index: u64, ack_required: u32) -> BatchId {
        let ack_required = if self.dedup {
            ack_required
        } else {
            // Each changelog record becomes its own batch: bump the
            // counter so the final event's ack still triggers the clear.
            ack_required.max(1)
        };
        let id = self.next_batch_id;
        self.next_batch_id += 1;
        self.fifo.lock().unwrap().push_back(PendingBatch {
            id,
            last_changelog_index,
            ack_required,
        });
        id
    }
}

#[async_trait]
impl<R: ChangelogReader> Source for ChangelogSource<R> {
    async fn next_batch(&mut self) -> Result<Option<(BatchId, Vec<PendingEvent>)>> {
        let Some(record) = self.reader.recv()? else {
            return Ok(None);
        };
        if let Some(dump) = self.dump.as_mut() {
            let _ = writeln!(dump, "{record:?}");
        }
        let events = expand_record(&record);
        let ack_required = events.len() as u32;
        let batch_id = self.save_batch(record.index, ack_required.max(1));
        Ok(Some((batch_id, events)))
    }

    async fn ack_batch(&mut self, batch: BatchId) -> Result<()> {
        let mut fifo = self.fifo.lock().unwrap();
        if let Some(entry) = fifo.iter_mut().find(|b| b.id == batch) {
            entry.ack_required = entry.ack_required.saturating_sub(1);
        }
        let mut clear_up_to = None;
        while let Some(front) = fifo.front() {
            if front.ack_required == 0 {
                clear_up_to = Some(front.last_changelog_index);
                fifo.pop_front();
            } else {
                break;
            }
        }
        drop(fifo);
        if let Some(index) = clear_up_to {
            self.reader.clear(&self.mdt, &self.user, index)?;
        }
        Ok(())
    }
}

fn upsert_statx(id: &Id, mask: StatxMask, fields: Statx) -> PendingEvent {
    PendingEvent {
        event: FsEvent::Upsert {
            id: id.clone(),
            statx: Some(fields),
            symlink: None,
        },
        hints: EnrichHints {
            statx_mask: Some(mask),
            ..Default::default()
        },
    }
}

fn lustre_xattr_hint(id: &Id) -> PendingEvent {
    PendingEvent {
        event: FsEvent::Xattr {
            id: id.clone(),
            inode_xattrs: None,
            ns: None,
        },
        hints: EnrichHints {
            extensions: vec!["lustre".to_string()],
            ..Default::default()
        },
    }
}

fn nb_children_inc(parent_id: &Id, delta: i64) -> PendingEvent {
    let mut xattrs = XattrOps::new();
    xattrs.insert("nb_children".to_string(), XattrOp::Inc(delta));
    PendingEvent::plain(FsEvent::Xattr {
        id: parent_id.clone(),
        inode_xattrs: Some(xattrs),
        ns: None,
    })
}

fn parent_time_update(parent_id: &Id, time: i64, mask: StatxMask) -> PendingEvent {
    let mut statx = Statx {
        mask,
        ..Default::default()
    };
    if mask.contains(StatxMask::ATIME) {
        statx.atime = Some(time);
    }
    if mask.contains(StatxMask::CTIME) {
        statx.ctime = Some(time);
    }
    if mask.contains(StatxMask::MTIME) {
        statx.mtime = Some(time);
    }
    upsert_statx(parent_id, mask, statx)
}

/// Expands one changelog record into the fsevent batch described by the
/// record-type table (spec §4.9). Batches are emitted in dependency
/// order (the edge before the data it's attached to) so a sink applying
/// them in order never references a namespace edge that doesn't exist
/// yet.
fn expand_record(r: &ChangelogRecord) -> Vec<PendingEvent> {
    match r.record_type {
        RecordType::Create | RecordType::Mkdir => vec![
            PendingEvent::plain(FsEvent::Link {
                id: r.id.clone(),
                parent_id: r.parent_id.clone(),
                name: r.name.clone(),
                ns_xattrs: ValueMap::new(),
            }),
            lustre_xattr_hint(&r.id),
            upsert_statx(&r.id, StatxMask::ALL - StatxMask::UID - StatxMask::GID, Statx::default()),
            parent_time_update(
                &r.parent_id,
                r.time,
                StatxMask::ATIME | StatxMask::CTIME | StatxMask::MTIME,
            ),
            nb_children_inc(&r.parent_id, 1),
        ],
        RecordType::Setattr => vec![
            upsert_statx(&r.id, StatxMask::ALL, Statx::default()),
            lustre_xattr_hint(&r.id),
        ],
        RecordType::Close | RecordType::Mtime => vec![upsert_statx(
            &r.id,
            StatxMask::MTIME | StatxMask::SIZE | StatxMask::BLOCKS,
            Statx::default(),
        )],
        RecordType::Ctime => vec![upsert_statx(&r.id, StatxMask::CTIME, Statx::default())],
        RecordType::Atime => vec![upsert_statx(&r.id, StatxMask::ATIME, Statx::default())],
        RecordType::Setxattr => {
            let mut xattrs = XattrOps::new();
            if let Some(name) = &r.xattr_name {
                xattrs.insert(name.clone(), XattrOp::Set(Value::Boolean(true)));
            }
            vec![
                upsert_statx(&r.id, StatxMask::CTIME, Statx::default()),
                PendingEvent::plain(FsEvent::Xattr {
                    id: r.id.clone(),
                    inode_xattrs: Some(xattrs),
                    ns: None,
                }),
                lustre_xattr_hint(&r.id),
            ]
        }
        RecordType::Softlink => {
            let mut ev = vec![PendingEvent::plain(FsEvent::Link {
                id: r.id.clone(),
                parent_id: r.parent_id.clone(),
                name: r.name.clone(),
                ns_xattrs: ValueMap::new(),
            })];
            ev.push(PendingEvent {
                event: FsEvent::Upsert {
                    id: r.id.clone(),
                    statx: None,
                    symlink: r.symlink_target.clone(),
                },
                hints: EnrichHints {
                    symlink: true,
                    ..Default::default()
                },
            });
            ev
        }
        RecordType::Hardlink | RecordType::Mknod => {
            let mut ev = vec![PendingEvent::plain(FsEvent::Link {
                id: r.id.clone(),
                parent_id: r.parent_id.clone(),
                name: r.name.clone(),
                ns_xattrs: ValueMap::new(),
            })];
            if r.record_type == RecordType::Mknod {
                let mut xattrs = XattrOps::new();
                if let Some(mdt) = &r.mdt_index {
                    xattrs.insert("mdt_index".to_string(), XattrOp::Set(Value::String(mdt.clone())));
                }
                ev.push(PendingEvent::plain(FsEvent::Xattr {
                    id: r.id.clone(),
                    inode_xattrs: Some(xattrs),
                    ns: None,
                }));
            }
            ev.push(upsert_statx(&r.id, StatxMask::ALL, Statx::default()));
            ev.push(parent_time_update(
                &r.parent_id,
                r.time,
                StatxMask::CTIME | StatxMask::MTIME,
            ));
            ev
        }
        RecordType::Unlink | RecordType::Rmdir => {
            let mut ev = vec![PendingEvent::plain(FsEvent::Unlink {
                id: r.id.clone(),
                parent_id: r.parent_id.clone(),
                name: r.name.clone(),
            })];
            if r.is_last_link {
                if r.hsm_archived {
                    ev.push(PendingEvent::plain(FsEvent::PartialUnlink {
                        id: r.id.clone(),
                        rm_time: r.time,
                    }));
                } else {
                    ev.push(PendingEvent::plain(FsEvent::Delete { id: r.id.clone() }));
                }
            }
            ev.push(parent_time_update(
                &r.parent_id,
                r.time,
                StatxMask::CTIME | StatxMask::MTIME,
            ));
            ev.push(nb_children_inc(&r.parent_id, -1));
            ev
        }
        RecordType::Rename => {
            let mut ev = Vec::new();
            if let Some(target) = &r.overwritten_target {
                ev.push(PendingEvent::plain(FsEvent::Unlink {
                    id: target.clone(),
                    parent_id: r.parent_id.clone(),
                    name: r.name.clone(),
                }));
            }
            ev.push(PendingEvent::plain(FsEvent::Link {
                id: r.id.clone(),
                parent_id: r.parent_id.clone(),
                name: r.name.clone(),
                ns_xattrs: ValueMap::new(),
            }));
            ev.push(upsert_statx(&r.id, StatxMask::ALL, Statx::default()));
            ev.push(parent_time_update(
                &r.parent_id,
                r.time,
                StatxMask::CTIME | StatxMask::MTIME,
            ));
            if let Some((source_parent, source_name)) = &r.rename_source {
                ev.push(PendingEvent::plain(FsEvent::Unlink {
                    id: r.id.clone(),
                    parent_id: source_parent.clone(),
                    name: source_name.clone(),
                }));
                ev.push(parent_time_update(
                    source_parent,
                    r.time,
                    StatxMask::CTIME | StatxMask::MTIME,
                ));
            }
            if r.overwritten_target.is_none() {
                ev.push(nb_children_inc(&r.parent_id, 1));
            }
            ev
        }
        RecordType::Hsm => vec![
            upsert_statx(&r.id, StatxMask::BLOCKS, Statx::default()),
            lustre_xattr_hint(&r.id),
            PendingEvent::plain(FsEvent::Xattr {
                id: r.id.clone(),
                inode_xattrs: Some(XattrOps::new()),
                ns: None,
            }),
        ],
        RecordType::Trunc => vec![upsert_statx(
            &r.id,
            StatxMask::CTIME | StatxMask::MTIME | StatxMask::SIZE,
            Statx::default(),
        )],
        RecordType::Layout => vec![
            upsert_statx(&r.id, StatxMask::CTIME, Statx::default()),
            lustre_xattr_hint(&r.id),
        ],
        RecordType::Flrw => vec![
            upsert_statx(
                &r.id,
                StatxMask::CTIME | StatxMask::MTIME | StatxMask::BLOCKS | StatxMask::SIZE,
                Statx::default(),
            ),
            lustre_xattr_hint(&r.id),
        ],
        RecordType::Resync => vec![
            upsert_statx(&r.id, StatxMask::CTIME | StatxMask::BLOCKS, Statx::default()),
            lustre_xattr_hint(&r.id),
        ],
        RecordType::Migrate => {
            let mut ev = vec![PendingEvent::plain(FsEvent::Link {
                id: r.id.clone(),
                parent_id: r.parent_id.clone(),
                name: r.name.clone(),
                ns_xattrs: ValueMap::new(),
            })];
            ev.push(upsert_statx(&r.id, StatxMask::ALL, Statx::default()));
            ev.push(parent_time_update(
                &r.parent_id,
                r.time,
                StatxMask::CTIME | StatxMask::MTIME,
            ));
            if let Some((source_parent, _)) = &r.rename_source {
                ev.push(PendingEvent::plain(FsEvent::Delete {
                    id: r.id.clone(),
                }));
                ev.push(parent_time_update(
                    source_parent,
                    r.time,
                    StatxMask::CTIME | StatxMask::MTIME,
                ));
            }
            ev.push(lustre_xattr_hint(&r.id));
            ev
        }
        RecordType::Skipped => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robinhood_core::id::BackendTag;

    fn id(b: &[u8]) -> Id {
        Id::new(BackendTag::Lustre, b.to_vec())
    }

    fn base_record(t: RecordType) -> ChangelogRecord {
        ChangelogRecord {
            index: 1,
            record_type: t,
            id: id(b"child"),
            parent_id: id(b"parent"),
            name: "f".to_string(),
            time: 1000,
            is_last_link: true,
            hsm_archived: false,
            symlink_target: None,
            xattr_name: None,
            rename_source: None,
            overwritten_target: None,
            mdt_index: None,
        }
    }

    #[test]
    fn create_expands_to_link_plus_statx_plus_parent_update() {
        let events = expand_record(&base_record(RecordType::Create));
        assert!(matches!(events[0].event, FsEvent::Link { .. }));
        assert!(events.iter().any(|e| matches!(e.event, FsEvent::Upsert { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(&e.event, FsEvent::Xattr { id, .. } if *id == base_record(RecordType::Create).parent_id)));
    }

    #[test]
    fn unlink_of_last_link_with_hsm_copy_emits_partial_unlink() {
        let mut record = base_record(RecordType::Unlink);
        record.hsm_archived = true;
        let events = expand_record(&record);
        assert!(events
            .iter()
            .any(|e| matches!(e.event, FsEvent::PartialUnlink { .. })));
        assert!(!events.iter().any(|e| matches!(e.event, FsEvent::Delete { .. })));
    }

    #[test]
    fn unlink_of_last_link_without_hsm_copy_emits_delete() {
        let record = base_record(RecordType::Unlink);
        let events = expand_record(&record);
        assert!(events.iter().any(|e| matches!(e.event, FsEvent::Delete { .. })));
    }

    #[test]
    fn nb_children_accumulates_across_create_and_unlink() {
        let create = expand_record(&base_record(RecordType::Create));
        let create_inc = create.iter().find_map(|e| match &e.event {
            FsEvent::Xattr {
                id,
                inode_xattrs: Some(xattrs),
                ..
            } if *id == base_record(RecordType::Create).parent_id => xattrs.get("nb_children"),
            _ => None,
        });
        assert_eq!(create_inc, Some(&XattrOp::Inc(1)));

        let unlink = expand_record(&base_record(RecordType::Unlink));
        let unlink_inc = unlink.iter().find_map(|e| match &e.event {
            FsEvent::Xattr {
                id,
                inode_xattrs: Some(xattrs),
                ..
            } if *id == base_record(RecordType::Unlink).parent_id => xattrs.get("nb_children"),
            _ => None,
        });
        assert_eq!(unlink_inc, Some(&XattrOp::Inc(-1)));
    }

    #[test]
    fn skipped_record_types_produce_no_events() {
        assert!(expand_record(&base_record(RecordType::Skipped)).is_empty());
    }

    #[tokio::test]
    async fn fifo_clears_in_order_only_once_all_acked() {
        let records = vec![base_record(RecordType::Ctime), {
            let mut r = base_record(RecordType::Ctime);
            r.index = 2;
            r
        }];
        let reader = FakeChangelogReader::new(records);
        let mut source = ChangelogSource::new(reader, "mdt0".to_string(), "rbh".to_string(), true);

        let (batch1, events1) = source.next_batch().await.unwrap().unwrap();
        let (batch2, events2) = source.next_batch().await.unwrap().unwrap();
        assert_eq!(events1.len(), 1);
        assert_eq!(events2.len(), 1);

        // Ack the second batch first: nothing should clear yet, since the
        // first (older) batch is still pending.
        source.ack_batch(batch2).await.unwrap();
        assert!(source.reader.cleared_up_to.is_none());

        source.ack_batch(batch1).await.unwrap();
        assert_eq!(source.reader.cleared_up_to, Some(2));
    }
}

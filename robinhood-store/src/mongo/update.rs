//! Translates one [FsEvent] into the Mongo write(s) it requires (spec
//! §4.11 "Update translation"). [MongoBackend::update][super::MongoBackend::update]
//! issues every write produced across one batch as a single unordered
//! bulk operation.

use crate::mongo::document::{id_to_bson, namespace_entry_document, statx_to_document};
use crate::mongo::filter_translate::id_filter;
use crate::mongo::value_bson::value_to_bson;
use bson::{doc, Document};
use robinhood_core::fsevent::{FsEvent, XattrOp};

/// One write the sink must issue. `update`/`array_filters` only apply to
/// [Write::Update]; `Delete` drops the whole document.
pub enum Write {
    Update {
        filter: Document,
        update: Document,
        upsert: bool,
        array_filters: Option<Vec<Document>>,
    },
    /// A pipelined update (an aggregation expression rather than a plain
    /// `$set`/`$pull` document), needed for `PARTIAL_UNLINK`'s
    /// derive-then-clear semantics.
    Pipeline { filter: Document, pipeline: Vec<Document> },
    Delete { filter: Document },
}

/// Expands `event` into the writes needed to apply it (spec §4.11).
/// `LINK` always produces two: a de-duplicating pull followed by the
/// `$addToSet`.
pub fn translate_event(event: &FsEvent) -> Vec<Write> {
    match event {
        FsEvent::Upsert { id, statx, symlink } => {
            let mut set = Document::new();
            if let Some(statx) = statx {
                set.insert("statx", statx_to_document(statx));
            }
            if let Some(symlink) = symlink {
                set.insert("symlink", symlink.clone());
            }
            if set.is_empty() {
                return Vec::new();
            }
            vec![Write::Update {
                filter: id_filter(id),
                update: doc! { "$set": set },
                upsert: true,
                array_filters: None,
            }]
        }
        FsEvent::Link {
            id,
            parent_id,
            name,
            ns_xattrs,
        } => {
            let base = id_filter(id);
            let pull = doc! {
                "$pull": { "namespace": { "parent_id": id_to_bson(parent_id), "name": name.clone() } },
            };
            let add = doc! {
                "$addToSet": {
                    "namespace": namespace_entry_document(parent_id, name, ns_xattrs),
                },
            };
            vec![
                Write::Update {
                    filter: base.clone(),
                    update: pull,
                    upsert: false,
                    array_filters: None,
                },
                Write::Update {
                    filter: base,
                    update: add,
                    upsert: true,
                    array_filters: None,
                },
            ]
        }
        FsEvent::Unlink {
            id,
            parent_id,
            name,
        } => vec![Write::Update {
            filter: id_filter(id),
            update: doc! {
                "$pull": { "namespace": { "parent_id": id_to_bson(parent_id), "name": name.clone() } },
            },
            upsert: false,
            array_filters: None,
        }],
        FsEvent::Xattr { id, inode_xattrs, ns } => {
            let mut writes = Vec::new();
            if let Some(inode_xattrs) = inode_xattrs {
                let mut set = Document::new();
                let mut inc = Document::new();
                for (k, op) in inode_xattrs {
                    match op {
                        XattrOp::Set(v) => {
                            set.insert(format!("inode_xattrs.{k}"), value_to_bson(v));
                        }
                        XattrOp::Inc(delta) => {
                            inc.insert(format!("inode_xattrs.{k}"), *delta);
                        }
                    }
                }
                let mut update = Document::new();
                if !set.is_empty() {
                    update.insert("$set", set);
                }
                if !inc.is_empty() {
                    update.insert("$inc", inc);
                }
                if !update.is_empty() {
                    writes.push(Write::Update {
                        filter: id_filter(id),
                        update,
                        upsert: true,
                        array_filters: None,
                    });
                }
            }
            if let Some(ns) = ns {
                let mut set = Document::new();
                for (k, v) in &ns.xattrs {
                    set.insert(format!("namespace.$[elem].xattrs.{k}"), value_to_bson(v));
                }
                writes.push(Write::Update {
                    filter: id_filter(id),
                    update: doc! { "$set": set },
                    upsert: false,
                    array_filters: Some(vec![doc! {
                        "elem.parent_id": id_to_bson(&ns.parent_id),
                        "elem.name": ns.name.clone(),
                    }]),
                });
            }
            writes
        }
        FsEvent::Delete { id } => vec![Write::Delete {
            filter: id_filter(id),
        }],
        FsEvent::PartialUnlink { id, rm_time } => {
            // Derive `tombstone` from whatever namespace entry survives
            // (there should be exactly one left) before clearing the
            // array, so the `path`/other ns xattrs aren't lost (spec
            // §4.11, "keep the surviving path").
            let pipeline = vec![
                doc! {
                    "$set": {
                        "tombstone": {
                            "$mergeObjects": [
                                { "$ifNull": [{ "$arrayElemAt": ["$namespace.xattrs", 0] }, {}] },
                                { "rm_time": *rm_time },
                            ]
                        }
                    }
                },
                doc! { "$set": { "namespace": [] } },
            ];
            vec![Write::Pipeline {
                filter: id_filter(id),
                pipeline,
            }]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robinhood_core::id::{BackendTag, Id};
    use robinhood_core::value::ValueMap;

    fn id(n: &str) -> Id {
        Id::new(BackendTag::Posix, n.as_bytes().to_vec())
    }

    #[test]
    fn link_produces_pull_then_add_to_set() {
        let event = FsEvent::Link {
            id: id("i"),
            parent_id: id("p"),
            name: "a".to_string(),
            ns_xattrs: ValueMap::new(),
        };
        let writes = translate_event(&event);
        assert_eq!(writes.len(), 2);
        assert!(matches!(writes[0], Write::Update { upsert: false, .. }));
        assert!(matches!(writes[1], Write::Update { upsert: true, .. }));
    }

    #[test]
    fn xattr_inc_produces_an_inc_update() {
        let mut xattrs = robinhood_core::fsevent::XattrOps::new();
        xattrs.insert("nb_children".to_string(), XattrOp::Inc(1));
        let event = FsEvent::Xattr {
            id: id("i"),
            inode_xattrs: Some(xattrs),
            ns: None,
        };
        let writes = translate_event(&event);
        assert_eq!(writes.len(), 1);
        match &writes[0] {
            Write::Update { update, .. } => {
                let inc = update.get_document("$inc").unwrap();
                assert_eq!(inc.get_i64("inode_xattrs.nb_children").unwrap(), 1);
                assert!(!update.contains_key("$set"));
            }
            _ => panic!("expected an update write"),
        }
    }

    #[test]
    fn delete_produces_one_delete_write() {
        let writes = translate_event(&FsEvent::Delete { id: id("i") });
        assert_eq!(writes.len(), 1);
        assert!(matches!(writes[0], Write::Delete { .. }));
    }

    #[test]
    fn partial_unlink_uses_a_pipelined_update() {
        let writes = translate_event(&FsEvent::PartialUnlink {
            id: id("i"),
            rm_time: 123,
        });
        assert_eq!(writes.len(), 1);
        assert!(matches!(writes[0], Write::Pipeline { .. }));
    }
}

//! Assembles the `filter()`/`report()` aggregation pipeline (spec §4.11
//! "Pipeline assembly"): unwind, match, optional group/sort, project,
//! optional skip/limit.
//!
//! The unwind preserves documents whose `namespace` array is empty or
//! missing (`PARTIAL_UNLINK` leaves exactly that shape behind) and
//! synthesizes a `namespace` object from `tombstone` for them, so a
//! tombstoned entry's surviving `rm_time`/path xattrs still match
//! `namespace.xattrs.*` filters and project through like any other row.

use crate::mongo::filter_translate;
use bson::{doc, Document};
use robinhood_core::filter::{Filter, FilterOptions, FilterOutput, Projection};
use robinhood_core::fsentry::{FsEntryMask, StatxMask};
use robinhood_core::id::BackendTag;

/// `gc` selects the recursive-GC view (spec §4.11 "Recursive GC mode"):
/// no unwind, matches documents whose `namespace` array is empty, and
/// strips `parent_id`/`name`/`ns_xattrs` from the final projection.
pub fn build_filter_pipeline(
    filter: &Filter,
    options: &FilterOptions,
    output: &FilterOutput,
    gc: bool,
    tag: BackendTag,
) -> Vec<Document> {
    let mut stages = Vec::new();

    if gc {
        stages.push(doc! { "$match": { "namespace": { "$size": 0 } } });
    } else {
        stages.push(doc! {
            "$unwind": { "path": "$namespace", "preserveNullAndEmptyArrays": true }
        });
        stages.push(doc! {
            "$addFields": {
                "namespace": {
                    "$ifNull": [
                        "$namespace",
                        { "xattrs": { "$ifNull": ["$tombstone", {}] } },
                    ]
                }
            }
        });
    }

    let user_match = filter_translate::translate(filter, tag);
    if !user_match.is_empty() {
        stages.push(doc! { "$match": user_match });
    }

    match output {
        FilterOutput::Aggregation { group_by } => {
            let mut group_id = Document::new();
            for key in group_by {
                group_id.insert(key.clone(), format!("${key}"));
            }
            stages.push(doc! {
                "$group": {
                    "_id": group_id,
                    "count": { "$sum": 1 },
                }
            });
        }
        FilterOutput::Projection(projection) => {
            for sort in &options.sort {
                let dir: i32 = if sort.descending { -1 } else { 1 };
                let mut spec = Document::new();
                spec.insert(sort.field.clone(), dir);
                let mut stage = Document::new();
                stage.insert("$sort", spec);
                stages.push(stage);
            }
            stages.push(doc! { "$project": project_stage(projection, gc) });
        }
    }

    if !matches!(output, FilterOutput::Aggregation { .. }) {
        if let Some(skip) = options.skip {
            stages.push(doc! { "$skip": skip as i64 });
        }
        if let Some(limit) = options.limit {
            stages.push(doc! { "$limit": limit as i64 });
        }
    }

    stages
}

fn project_stage(projection: &Projection, gc: bool) -> Document {
    let mut project = doc! { "_id": 1 };

    if !gc {
        if projection.fsentry_mask.contains(FsEntryMask::PARENT_ID) {
            project.insert("parent_id", "$namespace.parent_id");
        }
        if projection.fsentry_mask.contains(FsEntryMask::NAME) {
            project.insert("name", "$namespace.name");
        }
        if projection.fsentry_mask.contains(FsEntryMask::NS_XATTRS) {
            project.insert("ns_xattrs", "$namespace.xattrs");
        }
    }

    if projection.fsentry_mask.contains(FsEntryMask::STATX)
        && !projection.statx_mask.is_empty()
    {
        let mut statx_fields = Document::new();
        for (name, bit) in [
            ("mode", StatxMask::MODE),
            ("uid", StatxMask::UID),
            ("gid", StatxMask::GID),
            ("atime", StatxMask::ATIME),
            ("mtime", StatxMask::MTIME),
            ("ctime", StatxMask::CTIME),
            ("btime", StatxMask::BTIME),
            ("size", StatxMask::SIZE),
            ("blocks", StatxMask::BLOCKS),
            ("nlink", StatxMask::NLINK),
            ("dev", StatxMask::DEV),
            ("rdev", StatxMask::RDEV),
            ("ino", StatxMask::INO),
            ("file_type", StatxMask::TYPE),
            ("mount_id", StatxMask::MNT_ID),
        ] {
            if projection.statx_mask.contains(bit) {
                statx_fields.insert(name, format!("$statx.{name}"));
            }
        }
        project.insert("statx", statx_fields);
    }

    if projection.fsentry_mask.contains(FsEntryMask::INODE_XATTRS) {
        match &projection.inode_xattrs {
            Some(keys) => {
                let mut doc = Document::new();
                for key in keys {
                    doc.insert(key.clone(), format!("$inode_xattrs.{key}"));
                }
                project.insert("inode_xattrs", doc);
            }
            None => {
                project.insert("inode_xattrs", 1);
            }
        }
    }

    if projection.fsentry_mask.contains(FsEntryMask::SYMLINK) {
        project.insert("symlink", 1);
    }

    project
}

#[cfg(test)]
mod tests {
    use super::*;
    use robinhood_core::filter::Field;
    use robinhood_core::value::Value;

    #[test]
    fn non_gc_pipeline_starts_with_unwind() {
        let filter = Filter::Compare(Field::Name, robinhood_core::filter::Cmp::Eq, Value::from("a"));
        let stages = build_filter_pipeline(
            &filter,
            &FilterOptions::default(),
            &FilterOutput::default(),
            false,
            BackendTag::Posix,
        );
        assert!(stages[0].contains_key("$unwind"));
    }

    #[test]
    fn non_gc_pipeline_preserves_tombstoned_documents() {
        let filter = Filter::Compare(Field::Name, robinhood_core::filter::Cmp::Eq, Value::from("a"));
        let stages = build_filter_pipeline(
            &filter,
            &FilterOptions::default(),
            &FilterOutput::default(),
            false,
            BackendTag::Posix,
        );
        let unwind = stages[0].get_document("$unwind").unwrap();
        assert_eq!(unwind.get_bool("preserveNullAndEmptyArrays").unwrap(), true);
        assert!(stages[1].contains_key("$addFields"));
    }

    #[test]
    fn gc_pipeline_matches_empty_namespace_instead_of_unwinding() {
        let filter = Filter::Compare(Field::Name, robinhood_core::filter::Cmp::Eq, Value::from("a"));
        let stages = build_filter_pipeline(
            &filter,
            &FilterOptions::default(),
            &FilterOutput::default(),
            true,
            BackendTag::Posix,
        );
        assert!(!stages[0].contains_key("$unwind"));
        assert!(stages[0].contains_key("$match"));
    }

    #[test]
    fn skip_and_limit_are_appended_for_projection_output() {
        let filter = Filter::is_dir();
        let options = FilterOptions {
            skip: Some(5),
            limit: Some(10),
            ..FilterOptions::default()
        };
        let stages =
            build_filter_pipeline(&filter, &options, &FilterOutput::default(), false, BackendTag::Posix);
        assert!(stages.iter().any(|s| s.contains_key("$skip")));
        assert!(stages.iter().any(|s| s.contains_key("$limit")));
    }
}

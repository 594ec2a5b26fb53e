//! Maps between [FsEntry]/[FsEvent] and the on-wire Mongo document shape
//! (spec §4.11): one document per inode, `_id` the raw id bytes, a
//! `namespace` array of `{parent_id, name, xattrs}` per hardlink, and a
//! `tombstone` field surviving after the last namespace edge is removed
//! by a `PARTIAL_UNLINK`.

use crate::mongo::value_bson::{document_to_value_map, value_map_to_document};
use bson::{doc, Bson, Document};
use robinhood_core::error::{Error, Result};
use robinhood_core::fsentry::{FileType, FsEntry, FsEntryMask, Statx, StatxMask};
use robinhood_core::id::{BackendTag, Id};
use robinhood_core::value::ValueMap;

/// `_id` is stored as a tagged binary: one byte selecting [BackendTag]
/// followed by the id's raw handle bytes, so ids from different backends
/// never collide in the same collection.
pub fn id_to_bson(id: &Id) -> Bson {
    let mut bytes = Vec::with_capacity(1 + id.as_bytes().len());
    bytes.push(tag_byte(id.tag()));
    bytes.extend_from_slice(id.as_bytes());
    Bson::Binary(bson::Binary {
        subtype: bson::spec::BinarySubtype::Generic,
        bytes,
    })
}

pub fn bson_to_id(b: &Bson) -> Result<Id> {
    let Bson::Binary(bin) = b else {
        return Err(Error::Invalid("_id is not binary".to_string()));
    };
    let (tag_byte, handle) = bin
        .bytes
        .split_first()
        .ok_or_else(|| Error::Invalid("empty _id".to_string()))?;
    Ok(Id::new(byte_tag(*tag_byte)?, handle.to_vec()))
}

fn tag_byte(tag: BackendTag) -> u8 {
    match tag {
        BackendTag::Posix => 0,
        BackendTag::Lustre => 1,
        BackendTag::Mongo => 2,
    }
}

fn byte_tag(b: u8) -> Result<BackendTag> {
    match b {
        0 => Ok(BackendTag::Posix),
        1 => Ok(BackendTag::Lustre),
        2 => Ok(BackendTag::Mongo),
        other => Err(Error::Invalid(format!("unknown backend tag byte {other}"))),
    }
}

pub fn statx_to_document(statx: &Statx) -> Document {
    let mut doc = Document::new();
    macro_rules! put {
        ($field:ident) => {
            if let Some(v) = statx.$field {
                doc.insert(stringify!($field), v as i64);
            }
        };
    }
    put!(mode);
    put!(uid);
    put!(gid);
    put!(atime);
    put!(mtime);
    put!(ctime);
    put!(btime);
    put!(size);
    put!(blocks);
    put!(nlink);
    put!(dev);
    put!(rdev);
    put!(ino);
    put!(mount_id);
    if let Some(ft) = statx.file_type {
        doc.insert("file_type", file_type_str(ft));
    }
    doc
}

pub fn document_to_statx(doc: &Document, requested: StatxMask) -> Statx {
    let mut statx = Statx {
        mask: requested,
        ..Statx::default()
    };
    macro_rules! take {
        ($field:ident, $ty:ty) => {
            if let Ok(v) = doc.get_i64(stringify!($field)) {
                statx.$field = Some(v as $ty);
            }
        };
    }
    take!(mode, u32);
    take!(uid, u32);
    take!(gid, u32);
    take!(atime, i64);
    take!(mtime, i64);
    take!(ctime, i64);
    take!(btime, i64);
    take!(size, u64);
    take!(blocks, u64);
    take!(nlink, u32);
    take!(dev, u64);
    take!(rdev, u64);
    take!(ino, u64);
    take!(mount_id, u64);
    if let Ok(s) = doc.get_str("file_type") {
        statx.file_type = str_file_type(s);
    }
    statx
}

fn file_type_str(ft: FileType) -> &'static str {
    match ft {
        FileType::Regular => "regular",
        FileType::Directory => "directory",
        FileType::Symlink => "symlink",
        FileType::BlockDevice => "block",
        FileType::CharDevice => "char",
        FileType::Fifo => "fifo",
        FileType::Socket => "socket",
    }
}

fn str_file_type(s: &str) -> Option<FileType> {
    Some(match s {
        "regular" => FileType::Regular,
        "directory" => FileType::Directory,
        "symlink" => FileType::Symlink,
        "block" => FileType::BlockDevice,
        "char" => FileType::CharDevice,
        "fifo" => FileType::Fifo,
        "socket" => FileType::Socket,
        _ => return None,
    })
}

/// One `namespace[]` element.
pub fn namespace_entry_document(parent_id: &Id, name: &str, xattrs: &ValueMap) -> Document {
    doc! {
        "parent_id": id_to_bson(parent_id),
        "name": name,
        "xattrs": value_map_to_document(xattrs),
    }
}

/// Parses the shape produced by the aggregation pipeline's final
/// `$project` (spec §4.11): `_id`, optionally `parent_id`/`name`/
/// `ns_xattrs` (absent in GC mode), `statx`, `inode_xattrs`, `symlink`.
pub fn document_to_entry(doc: &Document, requested_statx: StatxMask) -> Result<FsEntry> {
    let id = bson_to_id(
        doc.get("_id")
            .ok_or_else(|| Error::Invalid("document missing _id".to_string()))?,
    )?;

    let mut mask = FsEntryMask::ID;
    let parent_id = match doc.get("parent_id") {
        Some(b) => {
            mask.insert(FsEntryMask::PARENT_ID);
            bson_to_id(b)?
        }
        None => Id::root_parent(id.tag()),
    };
    let name = match doc.get_str("name") {
        Ok(s) => {
            mask.insert(FsEntryMask::NAME);
            s.to_string()
        }
        Err(_) => String::new(),
    };
    let ns_xattrs = match doc.get_document("ns_xattrs") {
        Ok(d) => {
            mask.insert(FsEntryMask::NS_XATTRS);
            document_to_value_map(d)
        }
        Err(_) => ValueMap::new(),
    };
    let statx = match doc.get_document("statx") {
        Ok(d) => {
            mask.insert(FsEntryMask::STATX);
            document_to_statx(d, requested_statx)
        }
        Err(_) => Statx::default(),
    };
    let inode_xattrs = match doc.get_document("inode_xattrs") {
        Ok(d) => {
            mask.insert(FsEntryMask::INODE_XATTRS);
            document_to_value_map(d)
        }
        Err(_) => ValueMap::new(),
    };
    let symlink = match doc.get_str("symlink") {
        Ok(s) => {
            mask.insert(FsEntryMask::SYMLINK);
            Some(s.to_string())
        }
        Err(_) => None,
    };

    Ok(FsEntry {
        mask,
        id,
        parent_id,
        name,
        statx,
        ns_xattrs,
        inode_xattrs,
        symlink,
    })
}

/// Flattens a `$group` stage's output (`{_id: {k: v, ...}, count: N}`)
/// into one [ValueMap], used by `report()` (spec §4.11).
pub fn document_to_report_map(doc: &Document) -> ValueMap {
    let mut map = match doc.get_document("_id") {
        Ok(group_key) => document_to_value_map(group_key),
        Err(_) => ValueMap::new(),
    };
    if let Ok(count) = doc.get_i64("count") {
        map.insert("count".to_string(), robinhood_core::value::Value::Int64(count));
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_bson_roundtrip_preserves_tag_and_bytes() {
        let id = Id::new(BackendTag::Lustre, b"abc".to_vec());
        let bson = id_to_bson(&id);
        let back = bson_to_id(&bson).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn statx_document_roundtrip_keeps_requested_fields() {
        let statx = Statx {
            mask: StatxMask::SIZE | StatxMask::TYPE,
            size: Some(42),
            file_type: Some(FileType::Regular),
            ..Statx::default()
        };
        let doc = statx_to_document(&statx);
        let back = document_to_statx(&doc, StatxMask::SIZE | StatxMask::TYPE);
        assert_eq!(back.size, Some(42));
        assert_eq!(back.file_type, Some(FileType::Regular));
    }

    #[test]
    fn document_to_entry_defaults_missing_namespace_fields_for_gc_mode() {
        let id = Id::new(BackendTag::Posix, b"x".to_vec());
        let doc = doc! { "_id": id_to_bson(&id) };
        let entry = document_to_entry(&doc, StatxMask::empty()).unwrap();
        assert!(entry.parent_id.is_root_parent());
        assert_eq!(entry.name, "");
    }
}

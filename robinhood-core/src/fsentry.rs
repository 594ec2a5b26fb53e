//! The canonical per-inode document (spec §3.3).

use crate::id::Id;
use crate::value::ValueMap;
use bitflags::bitflags;

bitflags! {
    /// Tracks which of [FsEntry]'s optional fields are present, mirroring
    /// the C struct's field mask so a partially-populated entry (e.g. one
    /// built by the enricher, which only knows a handful of fields) can
    /// be told apart from one that genuinely has those fields empty.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct FsEntryMask: u32 {
        const ID            = 1 << 0;
        const PARENT_ID     = 1 << 1;
        const NAME          = 1 << 2;
        const STATX         = 1 << 3;
        const NS_XATTRS     = 1 << 4;
        const INODE_XATTRS  = 1 << 5;
        const SYMLINK       = 1 << 6;
    }

    /// Subset of Linux `statx` fields the walker populates, with its own
    /// mask so callers can request only a few (e.g. `ctime` only).
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct StatxMask: u32 {
        const MODE   = 1 << 0;
        const UID    = 1 << 1;
        const GID    = 1 << 2;
        const ATIME  = 1 << 3;
        const MTIME  = 1 << 4;
        const CTIME  = 1 << 5;
        const BTIME  = 1 << 6;
        const SIZE   = 1 << 7;
        const BLOCKS = 1 << 8;
        const NLINK  = 1 << 9;
        const DEV    = 1 << 10;
        const RDEV   = 1 << 11;
        const INO    = 1 << 12;
        const TYPE   = 1 << 13;
        const MNT_ID = 1 << 14;
        const ALL = Self::MODE.bits() | Self::UID.bits() | Self::GID.bits()
            | Self::ATIME.bits() | Self::MTIME.bits() | Self::CTIME.bits()
            | Self::BTIME.bits() | Self::SIZE.bits() | Self::BLOCKS.bits()
            | Self::NLINK.bits() | Self::DEV.bits() | Self::RDEV.bits()
            | Self::INO.bits() | Self::TYPE.bits() | Self::MNT_ID.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

/// The subset of Linux `statx` fields this crate models (spec §3.3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statx {
    pub mask: StatxMaskOpt,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub atime: Option<i64>,
    pub mtime: Option<i64>,
    pub ctime: Option<i64>,
    pub btime: Option<i64>,
    pub size: Option<u64>,
    pub blocks: Option<u64>,
    pub nlink: Option<u32>,
    pub dev: Option<u64>,
    pub rdev: Option<u64>,
    pub ino: Option<u64>,
    pub file_type: Option<FileType>,
    pub mount_id: Option<u64>,
}

/// Newtype so `Statx::default()`'s mask reads as "nothing set" without
/// requiring callers to import [StatxMask] just to zero it.
pub type StatxMaskOpt = StatxMask;

impl Statx {
    pub fn merge(&mut self, other: Statx) {
        macro_rules! take {
            ($field:ident, $bit:ident) => {
                if other.mask.contains(StatxMask::$bit) {
                    self.$field = other.$field;
                    self.mask.insert(StatxMask::$bit);
                }
            };
        }
        take!(mode, MODE);
        take!(uid, UID);
        take!(gid, GID);
        take!(atime, ATIME);
        take!(mtime, MTIME);
        take!(ctime, CTIME);
        take!(btime, BTIME);
        take!(size, SIZE);
        take!(blocks, BLOCKS);
        take!(nlink, NLINK);
        take!(dev, DEV);
        take!(rdev, RDEV);
        take!(ino, INO);
        take!(file_type, TYPE);
        take!(mount_id, MNT_ID);
    }
}

/// One document per inode.
#[derive(Debug, Clone, PartialEq)]
pub struct FsEntry {
    pub mask: FsEntryMask,
    pub id: Id,
    pub parent_id: Id,
    pub name: String,
    pub statx: Statx,
    pub ns_xattrs: ValueMap,
    pub inode_xattrs: ValueMap,
    pub symlink: Option<String>,
}

impl FsEntry {
    /// Builds the root entry of a walk: empty `parent_id`, empty `name`,
    /// regardless of what the underlying walker would otherwise report
    /// (spec §4.4 edge case).
    pub fn new_root(id: Id) -> Self {
        let parent_id = Id::root_parent(id.tag());
        FsEntry {
            mask: FsEntryMask::ID | FsEntryMask::PARENT_ID | FsEntryMask::NAME,
            id,
            parent_id,
            name: String::new(),
            statx: Statx::default(),
            ns_xattrs: ValueMap::new(),
            inode_xattrs: ValueMap::new(),
            symlink: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_root_parent() && self.name.is_empty()
    }

    pub fn path(&self) -> Option<&str> {
        self.ns_xattrs.get("path").and_then(|v| v.as_str())
    }

    pub fn nb_children(&self) -> i64 {
        self.inode_xattrs
            .get("nb_children")
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::BackendTag;

    #[test]
    fn root_entry_has_empty_parent_and_name() {
        let entry = FsEntry::new_root(Id::new(BackendTag::Posix, b"root-handle".to_vec()));
        assert!(entry.is_root());
        assert_eq!(entry.name, "");
        assert!(entry.parent_id.is_root_parent());
    }

    #[test]
    fn statx_merge_only_overwrites_masked_fields() {
        let mut a = Statx {
            mask: StatxMask::MODE,
            mode: Some(0o755),
            ..Default::default()
        };
        let b = Statx {
            mask: StatxMask::SIZE,
            size: Some(42),
            ..Default::default()
        };
        a.merge(b);
        assert_eq!(a.mode, Some(0o755));
        assert_eq!(a.size, Some(42));
        assert!(a.mask.contains(StatxMask::MODE | StatxMask::SIZE));
    }
}

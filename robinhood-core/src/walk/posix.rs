//! A lazy, depth-first directory walk producing [FsEntry] documents
//! (spec §4.4), built over `walkdir` the way the teacher's
//! `import::fs::ingest_path` walks a tree for content-addressing.
//!
//! Unlike the teacher's walk (which needs children before their parent,
//! to roll up directory digests), this walker has no such ordering
//! requirement: each entry is self-contained, so we walk top-down and
//! stream entries out as soon as they're stat'd.

use crate::error::{Error, Result};
use crate::fsentry::{FileType, FsEntry, FsEntryMask, StatxMask};
use crate::id::{BackendTag, Id};
use crate::value::{Value, ValueMap};
use crate::walk::sys::PosixOps;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;
use walkdir::WalkDir;

/// Walks `root`, yielding one [FsEntry] per visited path. Does not follow
/// symlinks, including at the root (spec §4.4: a symlinked root is
/// ingested as the symlink itself, never traversed through).
pub struct PosixWalker<S: PosixOps> {
    sys: Arc<S>,
    statx_mask: StatxMask,
}

impl<S: PosixOps + 'static> PosixWalker<S> {
    pub fn new(sys: Arc<S>, statx_mask: StatxMask) -> Self {
        PosixWalker { sys, statx_mask }
    }

    #[instrument(skip(self), fields(root = %root.display()))]
    pub fn walk(&self, root: &Path) -> BoxStream<'static, Result<FsEntry>> {
        let sys = self.sys.clone();
        let mask = self.statx_mask;
        let root = root.to_path_buf();
        let iter = WalkDir::new(&root).follow_links(false).into_iter();

        Box::pin(futures::stream::iter(iter).map(move |entry| {
            stat_entry(sys.as_ref(), mask, &root, entry)
        }))
    }
}

fn stat_entry<S: PosixOps>(
    sys: &S,
    mask: StatxMask,
    root: &Path,
    entry: walkdir::Result<walkdir::DirEntry>,
) -> Result<FsEntry> {
    let entry = entry.map_err(|e| {
        Error::Backend(format!("walk error: {e}"))
    })?;
    let path = entry.path();

    let id = sys.file_handle(path)?;
    let statx = sys.statx(path, mask)?;
    let symlink = if entry.file_type().is_symlink() {
        Some(
            std::fs::read_link(path)
                .map_err(Error::from)?
                .to_string_lossy()
                .into_owned(),
        )
    } else {
        None
    };

    let is_root = path == root;
    let parent_id = if is_root {
        Id::root_parent(BackendTag::Posix)
    } else {
        sys.file_handle(parent_dir(path, root))?
    };
    let name = if is_root {
        String::new()
    } else {
        entry.file_name().to_string_lossy().into_owned()
    };

    let ns_xattrs = build_ns_xattrs(path, root, is_root);
    let mut inode_xattrs = read_inode_xattrs(sys, path)?;
    if statx.file_type == Some(FileType::Directory) {
        inode_xattrs.insert("nb_children".to_string(), Value::Int64(0));
    }

    Ok(FsEntry {
        mask: FsEntryMask::ID
            | FsEntryMask::PARENT_ID
            | FsEntryMask::NAME
            | FsEntryMask::STATX
            | FsEntryMask::NS_XATTRS
            | FsEntryMask::INODE_XATTRS
            | FsEntryMask::SYMLINK,
        id,
        parent_id,
        name,
        statx,
        ns_xattrs,
        inode_xattrs,
        symlink,
    })
}

fn parent_dir<'a>(path: &'a Path, root: &'a Path) -> &'a Path {
    path.parent().filter(|p| p.starts_with(root)).unwrap_or(root)
}

fn build_ns_xattrs(path: &Path, root: &Path, is_root: bool) -> ValueMap {
    let mut m = ValueMap::new();
    if is_root {
        m.insert("path".to_string(), Value::String("/".to_string()));
    } else if let Ok(rel) = path.strip_prefix(root) {
        m.insert(
            "path".to_string(),
            Value::String(format!("/{}", rel.to_string_lossy())),
        );
    }
    m
}

fn read_inode_xattrs<S: PosixOps>(sys: &S, path: &Path) -> Result<ValueMap> {
    let mut m = ValueMap::new();
    for name in sys.list_xattrs(path)? {
        if let Some(bytes) = sys.get_xattr(path, &name)? {
            m.insert(name, Value::Binary(bytes));
        }
    }
    Ok(m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walk::sys::{FakeEntry, FakePosixOps};
    use futures::StreamExt;
    use std::collections::HashMap;

    fn fake(entries: &[(&str, &[u8])]) -> (FakePosixOps, PathBuf) {
        let mut map = HashMap::new();
        for (path, handle) in entries {
            map.insert(
                PathBuf::from(path),
                FakeEntry {
                    handle: handle.to_vec(),
                    ..Default::default()
                },
            );
        }
        (FakePosixOps { entries: map }, PathBuf::from("/root"))
    }

    #[test]
    fn parent_dir_falls_back_to_root_at_top_level() {
        let root = Path::new("/mnt/x");
        let child = Path::new("/mnt/x/a");
        assert_eq!(parent_dir(child, root), root);
    }

    #[tokio::test]
    async fn walk_over_real_tempdir_yields_root_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        let sys = Arc::new(FakePosixOps {
            entries: {
                let mut m = HashMap::new();
                m.insert(dir.path().to_path_buf(), FakeEntry::default());
                m.insert(dir.path().join("a"), FakeEntry::default());
                m
            },
        });
        let walker = PosixWalker::new(sys, StatxMask::ALL);
        let mut stream = walker.walk(dir.path());
        let mut seen = Vec::new();
        while let Some(entry) = stream.next().await {
            seen.push(entry.unwrap());
        }
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_root());
    }

    #[test]
    fn root_path_xattr_is_a_bare_slash() {
        let root = Path::new("/mnt/x");
        let m = build_ns_xattrs(root, root, true);
        assert_eq!(m.get("path").unwrap().as_str(), Some("/"));
    }

    #[test]
    fn child_path_xattr_has_a_leading_slash() {
        let root = Path::new("/mnt/x");
        let child = Path::new("/mnt/x/a/b");
        let m = build_ns_xattrs(child, root, false);
        assert_eq!(m.get("path").unwrap().as_str(), Some("/a/b"));
    }

    #[tokio::test]
    async fn directories_are_seeded_with_zero_nb_children() {
        use crate::fsentry::{FileType, Statx};

        let dir = tempfile::tempdir().unwrap();
        let sys = Arc::new(FakePosixOps {
            entries: {
                let mut m = HashMap::new();
                m.insert(
                    dir.path().to_path_buf(),
                    FakeEntry {
                        statx: Statx {
                            file_type: Some(FileType::Directory),
                            ..Default::default()
                        },
                        ..Default::default()
                    },
                );
                m
            },
        });
        let walker = PosixWalker::new(sys, StatxMask::ALL);
        let mut stream = walker.walk(dir.path());
        let entry = stream.next().await.unwrap().unwrap();
        assert_eq!(
            entry.inode_xattrs.get("nb_children"),
            Some(&Value::Int64(0))
        );
    }
}

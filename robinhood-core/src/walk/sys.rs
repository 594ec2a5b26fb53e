//! The syscall seam the walker and the Lustre/retention enrichers go
//! through, so the traversal logic can be unit-tested without a real
//! filesystem (spec §4.4: `statx`, `name_to_handle_at`, xattrs).

use crate::error::{Error, Result};
use crate::fsentry::{FileType, Statx, StatxMask};
use crate::id::{BackendTag, Id};
use std::path::{Path, PathBuf};

/// Abstracts the handful of Linux-specific syscalls the POSIX walker
/// needs. The `posix` feature provides [LinuxPosixOps]; anything built
/// without it (or running the test suite) uses a fake.
pub trait PosixOps: Send + Sync {
    fn statx(&self, path: &Path, mask: StatxMask) -> Result<Statx>;

    /// Returns a backend [Id] stable across renames of `path`, derived
    /// from `name_to_handle_at` on Linux.
    fn file_handle(&self, path: &Path) -> Result<Id>;

    fn list_xattrs(&self, path: &Path) -> Result<Vec<String>>;

    fn get_xattr(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>>;

    /// Resolves `id` back to a current path, via `open_by_handle_at` plus
    /// `/proc/self/fd/N` on Linux (spec §4.8 step 1). Used by the
    /// enricher pipeline to reopen an inode named only by id in an
    /// incoming fsevent.
    fn resolve_path(&self, id: &Id) -> Result<PathBuf>;
}

#[cfg(all(target_os = "linux", feature = "posix"))]
pub struct LinuxPosixOps {
    mount: PathBuf,
}

#[cfg(all(target_os = "linux", feature = "posix"))]
impl LinuxPosixOps {
    pub fn new(mount: PathBuf) -> Self {
        LinuxPosixOps { mount }
    }
}

#[cfg(all(target_os = "linux", feature = "posix"))]
impl PosixOps for LinuxPosixOps {
    fn statx(&self, path: &Path, mask: StatxMask) -> Result<Statx> {
        use std::os::unix::ffi::OsStrExt;

        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|e| Error::Invalid(e.to_string()))?;
        let mut raw: libc::statx = unsafe { std::mem::zeroed() };
        let wanted = libc::STATX_BASIC_STATS | libc::STATX_BTIME;
        let ret = unsafe {
            libc::statx(
                libc::AT_FDCWD,
                c_path.as_ptr(),
                libc::AT_SYMLINK_NOFOLLOW,
                wanted,
                &mut raw,
            )
        };
        if ret != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let file_type = match raw.stx_mode as u32 & libc::S_IFMT {
            libc::S_IFREG => FileType::Regular,
            libc::S_IFDIR => FileType::Directory,
            libc::S_IFLNK => FileType::Symlink,
            libc::S_IFBLK => FileType::BlockDevice,
            libc::S_IFCHR => FileType::CharDevice,
            libc::S_IFIFO => FileType::Fifo,
            libc::S_IFSOCK => FileType::Socket,
            _ => FileType::Regular,
        };

        Ok(Statx {
            mask,
            mode: Some((raw.stx_mode & 0o7777) as u32),
            uid: Some(raw.stx_uid),
            gid: Some(raw.stx_gid),
            atime: Some(raw.stx_atime.tv_sec),
            mtime: Some(raw.stx_mtime.tv_sec),
            ctime: Some(raw.stx_ctime.tv_sec),
            btime: Some(raw.stx_btime.tv_sec),
            size: Some(raw.stx_size),
            blocks: Some(raw.stx_blocks),
            nlink: Some(raw.stx_nlink),
            dev: Some(libc::makedev(raw.stx_dev_major, raw.stx_dev_minor) as u64),
            rdev: Some(libc::makedev(raw.stx_rdev_major, raw.stx_rdev_minor) as u64),
            ino: Some(raw.stx_ino),
            file_type: Some(file_type),
            mount_id: Some(raw.stx_mnt_id as u64),
        })
    }

    fn file_handle(&self, path: &Path) -> Result<Id> {
        use std::os::unix::ffi::OsStrExt;

        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|e| Error::Invalid(e.to_string()))?;

        const HANDLE_BUF: usize = 128;
        #[repr(C)]
        struct RawHandle {
            handle_bytes: libc::c_uint,
            handle_type: libc::c_int,
            f_handle: [u8; HANDLE_BUF],
        }
        let mut handle = RawHandle {
            handle_bytes: HANDLE_BUF as libc::c_uint,
            handle_type: 0,
            f_handle: [0; HANDLE_BUF],
        };
        let mut mount_id: libc::c_int = 0;
        let ret = unsafe {
            libc::name_to_handle_at(
                libc::AT_FDCWD,
                c_path.as_ptr(),
                &mut handle as *mut RawHandle as *mut libc::file_handle,
                &mut mount_id,
                libc::AT_SYMLINK_NOFOLLOW,
            )
        };
        if ret != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let n = handle.handle_bytes as usize;
        let mut bytes = Vec::with_capacity(4 + n);
        bytes.extend_from_slice(&handle.handle_type.to_le_bytes());
        bytes.extend_from_slice(&handle.f_handle[..n]);
        Ok(Id::new(BackendTag::Posix, bytes))
    }

    fn list_xattrs(&self, path: &Path) -> Result<Vec<String>> {
        let value = xattr::list(path).map_err(Error::from)?;
        Ok(value
            .filter_map(|name| name.into_string().ok())
            .collect())
    }

    fn get_xattr(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        xattr::get(path, name).map_err(Error::from)
    }

    fn resolve_path(&self, id: &Id) -> Result<PathBuf> {
        use std::os::unix::ffi::OsStrExt;

        let bytes = id.as_bytes();
        if bytes.len() < 4 {
            return Err(Error::Invalid("truncated file handle".to_string()));
        }
        let handle_type = i32::from_le_bytes(bytes[..4].try_into().unwrap());
        let f_handle = &bytes[4..];

        const HANDLE_BUF: usize = 128;
        if f_handle.len() > HANDLE_BUF {
            return Err(Error::Invalid("oversized file handle".to_string()));
        }
        #[repr(C)]
        struct RawHandle {
            handle_bytes: libc::c_uint,
            handle_type: libc::c_int,
            f_handle: [u8; HANDLE_BUF],
        }
        let mut handle = RawHandle {
            handle_bytes: f_handle.len() as libc::c_uint,
            handle_type,
            f_handle: [0; HANDLE_BUF],
        };
        handle.f_handle[..f_handle.len()].copy_from_slice(f_handle);

        let c_mount = std::ffi::CString::new(self.mount.as_os_str().as_bytes())
            .map_err(|e| Error::Invalid(e.to_string()))?;
        let mount_fd =
            unsafe { libc::open(c_mount.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY) };
        if mount_fd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let fd = unsafe {
            libc::open_by_handle_at(
                mount_fd,
                &mut handle as *mut RawHandle as *mut libc::file_handle,
                libc::O_PATH,
            )
        };
        let open_err = if fd < 0 {
            Some(std::io::Error::last_os_error())
        } else {
            None
        };
        unsafe {
            libc::close(mount_fd);
        }
        if let Some(err) = open_err {
            return Err(match err.raw_os_error() {
                Some(libc::ESTALE) => Error::Stale(self.mount.display().to_string()),
                _ => err.into(),
            });
        }

        let target = std::fs::read_link(format!("/proc/self/fd/{fd}"));
        unsafe {
            libc::close(fd);
        }
        Ok(target?)
    }
}

/// A fake used by unit tests and by `walk::posix` tests: backs `statx`
/// and xattr lookups with an in-memory table keyed by path.
#[derive(Default)]
pub struct FakePosixOps {
    pub entries: std::collections::HashMap<std::path::PathBuf, FakeEntry>,
}

#[derive(Default, Clone)]
pub struct FakeEntry {
    pub statx: Statx,
    pub handle: Vec<u8>,
    pub xattrs: std::collections::BTreeMap<String, Vec<u8>>,
}

impl PosixOps for FakePosixOps {
    fn statx(&self, path: &Path, _mask: StatxMask) -> Result<Statx> {
        self.entries
            .get(path)
            .map(|e| e.statx.clone())
            .ok_or_else(|| Error::NotFound(path.display().to_string()))
    }

    fn file_handle(&self, path: &Path) -> Result<Id> {
        self.entries
            .get(path)
            .map(|e| Id::new(BackendTag::Posix, e.handle.clone()))
            .ok_or_else(|| Error::NotFound(path.display().to_string()))
    }

    fn list_xattrs(&self, path: &Path) -> Result<Vec<String>> {
        Ok(self
            .entries
            .get(path)
            .map(|e| e.xattrs.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn get_xattr(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .get(path)
            .and_then(|e| e.xattrs.get(name).cloned()))
    }

    fn resolve_path(&self, id: &Id) -> Result<PathBuf> {
        self.entries
            .iter()
            .find(|(_, e)| e.handle == id.as_bytes())
            .map(|(path, _)| path.clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }
}

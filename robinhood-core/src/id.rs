//! Opaque per-inode identifiers.
//!
//! An [Id] is a byte string plus a small backend tag, modeled the same way
//! the teacher's `B3Digest` wraps a [bytes::Bytes]: value semantics, cheap
//! clones, and conversions at the edges rather than exposing the inner
//! buffer. For the POSIX/Lustre backend, the bytes are the kernel's
//! open-by-handle file handle (`struct file_handle`: a type tag plus
//! handle bytes), so the exact inode can later be reopened with
//! `open_by_handle_at` without holding a file descriptor across calls.

use bytes::Bytes;
use std::fmt;

/// Which backend minted an [Id]. Two ids from different backends are never
/// equal even if their bytes coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendTag {
    Posix,
    Lustre,
    Mongo,
}

/// An opaque, value-equal identifier for one inode.
///
/// The empty byte string is the sentinel "root parent id": every top-level
/// fsentry's `parent_id` is `Id::root_parent()`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Id {
    tag: BackendTag,
    handle: Bytes,
}

impl Id {
    pub fn new(tag: BackendTag, handle: impl Into<Bytes>) -> Self {
        Id {
            tag,
            handle: handle.into(),
        }
    }

    /// The sentinel empty id used as `parent_id` for root fsentries.
    pub fn root_parent(tag: BackendTag) -> Self {
        Id {
            tag,
            handle: Bytes::new(),
        }
    }

    pub fn is_root_parent(&self) -> bool {
        self.handle.is_empty()
    }

    pub fn tag(&self) -> BackendTag {
        self.tag
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.handle
    }

    pub fn into_bytes(self) -> Bytes {
        self.handle
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Id({:?}, {})",
            self.tag,
            data_encoding::HEXLOWER.encode(&self.handle)
        )
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", data_encoding::HEXLOWER.encode(&self.handle))
    }
}

/// Wire representation used by serde and by the YAML fsevent source: a
/// tag plus base64-encoded handle bytes, rather than exposing [Bytes]
/// directly (which serializes as a JSON array of integers by default).
#[derive(serde::Serialize, serde::Deserialize)]
struct IdWire {
    tag: BackendTag,
    handle: String,
}

impl serde::Serialize for BackendTag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            BackendTag::Posix => "posix",
            BackendTag::Lustre => "lustre",
            BackendTag::Mongo => "mongo",
        };
        serializer.serialize_str(s)
    }
}

impl<'de> serde::Deserialize<'de> for BackendTag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "posix" => Ok(BackendTag::Posix),
            "lustre" => Ok(BackendTag::Lustre),
            "mongo" => Ok(BackendTag::Mongo),
            other => Err(serde::de::Error::custom(format!(
                "unknown backend tag: {other}"
            ))),
        }
    }
}

impl serde::Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        IdWire {
            tag: self.tag,
            handle: data_encoding::BASE64.encode(&self.handle),
        }
        .serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = IdWire::deserialize(deserializer)?;
        let handle = data_encoding::BASE64
            .decode(wire.handle.as_bytes())
            .map_err(serde::de::Error::custom)?;
        Ok(Id {
            tag: wire.tag,
            handle: Bytes::from(handle),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_parent_is_empty() {
        let id = Id::root_parent(BackendTag::Posix);
        assert!(id.is_root_parent());
        assert_eq!(id.as_bytes(), b"");
    }

    #[test]
    fn equality_is_value_equality() {
        let a = Id::new(BackendTag::Posix, Bytes::from_static(b"abc"));
        let b = Id::new(BackendTag::Posix, Bytes::from_static(b"abc"));
        assert_eq!(a, b);

        let c = Id::new(BackendTag::Lustre, Bytes::from_static(b"abc"));
        assert_ne!(a, c, "same bytes, different backend tag must differ");
    }
}

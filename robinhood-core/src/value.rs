//! The typed-value tree (spec §3.1).
//!
//! Every xattr, statx field and filter literal that flows through this
//! crate is a [Value]. Equality is structural; sequences and maps own
//! their storage. Entries built while walking or enriching borrow their
//! storage from an [crate::sstack::Sstack] for the duration of one
//! `next()` call (see [crate::sstack]); values that escape a single call
//! (stored in an [crate::fsentry::FsEntry] yielded to the caller, or sent
//! over the wire) are cloned into owned [Value]s here.

use std::collections::BTreeMap;

/// A tagged union of scalars, binary data, and nested collections.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Binary(Vec<u8>),
    Uint32(u32),
    Uint64(u64),
    Int32(i32),
    Int64(i64),
    String(String),
    Boolean(bool),
    /// A regular expression pattern plus its flags (e.g. `"i"` for
    /// case-insensitive), used by filter literals and by `undelete --list`.
    Regex(String, String),
    Sequence(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            Value::Int32(v) => Some(*v as i64),
            Value::Uint32(v) => Some(*v as i64),
            Value::Uint64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// Merges `other` into `self` in place, as used by `XATTR` event
    /// application (spec §4.7): maps are merged key-by-key (recursively),
    /// every other variant is replaced outright.
    pub fn merge(&mut self, other: Value) {
        match (self, other) {
            (Value::Map(dst), Value::Map(src)) => {
                for (k, v) in src {
                    match dst.get_mut(&k) {
                        Some(existing) => existing.merge(v),
                        None => {
                            dst.insert(k, v);
                        }
                    }
                }
            }
            (dst, src) => *dst = src,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

/// A map of named [Value]s, used for `ns_xattrs`/`inode_xattrs`.
pub type ValueMap = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_replaces_scalars() {
        let mut a = Value::Int64(1);
        a.merge(Value::Int64(2));
        assert_eq!(a, Value::Int64(2));
    }

    #[test]
    fn merge_combines_maps_recursively() {
        let mut a = Value::Map(BTreeMap::from([
            ("x".to_string(), Value::Int64(1)),
            (
                "nested".to_string(),
                Value::Map(BTreeMap::from([("a".to_string(), Value::Int64(1))])),
            ),
        ]));
        let b = Value::Map(BTreeMap::from([
            ("y".to_string(), Value::Int64(2)),
            (
                "nested".to_string(),
                Value::Map(BTreeMap::from([("b".to_string(), Value::Int64(2))])),
            ),
        ]));
        a.merge(b);
        let Value::Map(m) = a else { panic!() };
        assert_eq!(m.get("x"), Some(&Value::Int64(1)));
        assert_eq!(m.get("y"), Some(&Value::Int64(2)));
        let Value::Map(nested) = m.get("nested").unwrap() else {
            panic!()
        };
        assert_eq!(nested.get("a"), Some(&Value::Int64(1)));
        assert_eq!(nested.get("b"), Some(&Value::Int64(2)));
    }
}

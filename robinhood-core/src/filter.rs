//! The query AST and options bag consumed by backends (spec §4, §6).
//!
//! Predicate-to-filter translation from a CLI's argv is explicitly out of
//! scope (spec §1); this module only defines the shapes a backend's
//! `filter()` accepts, plus the handful of comparisons needed to drive
//! the generic branch iterator's own internal queries.

use crate::fsentry::{FsEntryMask, StatxMask};
use crate::id::Id;
use crate::value::Value;

/// A field a [Filter] comparison is made against.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    ParentId,
    Id,
    Name,
    StatxType,
    StatxSize,
    InodeXattr(String),
    NsXattr(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// A filter AST node. Kept intentionally small: comparisons, boolean
/// combinators, and set-membership (used by `parent_id ∈ current_batch`
/// in the branch iterator, spec §4.12).
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare(Field, Cmp, Value),
    In(Field, Vec<Value>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn and(self, other: Filter) -> Filter {
        match self {
            Filter::And(mut v) => {
                v.push(other);
                Filter::And(v)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    pub fn parent_in(ids: Vec<Id>) -> Filter {
        Filter::In(Field::ParentId, ids.into_iter().map(id_to_value).collect())
    }

    pub fn is_dir() -> Filter {
        Filter::Compare(Field::StatxType, Cmp::Eq, Value::String("directory".into()))
    }
}

fn id_to_value(id: Id) -> Value {
    Value::Binary(id.into_bytes().to_vec())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

/// Options accompanying a `filter()` call (spec §6).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOptions {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub sort: Vec<SortKey>,
    pub one: bool,
    pub skip_error: bool,
    pub verbose: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub fsentry_mask: FsEntryMask,
    pub statx_mask: StatxMask,
    pub inode_xattrs: Option<Vec<String>>,
    pub ns_xattrs: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutput {
    Projection(Projection),
    Aggregation { group_by: Vec<String> },
}

impl Default for FilterOutput {
    fn default() -> Self {
        FilterOutput::Projection(Projection::default())
    }
}

/// Rejects `skip`/`limit`/`sort`, which the generic branch iterator does
/// not support (spec §4.12).
pub fn reject_unsupported_branch_options(opts: &FilterOptions) -> crate::error::Result<()> {
    if opts.skip.is_some() || opts.limit.is_some() || !opts.sort.is_empty() {
        return Err(crate::error::Error::NotSupported(
            "skip/limit/sort are not supported on branch filters".to_string(),
        ));
    }
    Ok(())
}

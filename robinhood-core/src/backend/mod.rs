//! The plugin/backend framework (spec §4.3).
//!
//! A [Backend] is the uniform interface every storage/walking backend
//! (POSIX, Lustre, Mongo, a Mongo branch, a Mongo GC view) implements;
//! any operation a backend does not support returns
//! [crate::error::Error::NotSupported]. [Backend] composition (a
//! `posix` backend plus registered extensions) and backend *selection*
//! by URI both live in [crate::registry], adapted from the teacher's
//! `composition.rs` tag-driven registry.

pub mod branch;

use crate::error::Result;
use crate::filter::{FilterOptions, FilterOutput, Projection};
use crate::fsentry::FsEntry;
use crate::fsevent::FsEvent;
use crate::id::Id;
use crate::value::{Value, ValueMap};
use bitflags::bitflags;
use futures::stream::BoxStream;
use tonic::async_trait;

bitflags! {
    /// Capability bits a [Plugin] advertises, used to decide at
    /// composition time whether an extension is even meaningful for a
    /// given base backend (spec §4.3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const SYNC_OPS   = 1 << 0;
        const BRANCH_OPS = 1 << 1;
        const REPORT_OPS = 1 << 2;
        const UPDATE_OPS = 1 << 3;
    }
}

bitflags! {
    /// Flags selecting which parts of `get_info` a caller wants composed
    /// together into one response (spec §4.11).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InfoFlags: u32 {
        const AVG_OBJ_SIZE      = 1 << 0;
        const BACKEND_SOURCE    = 1 << 1;
        const COUNT             = 1 << 2;
        const SIZE               = 1 << 3;
        const FSEVENTS_SOURCE   = 1 << 4;
        const FIRST_SYNC        = 1 << 5;
        const LAST_SYNC         = 1 << 6;
        const MOUNTPOINT        = 1 << 7;
    }
}

/// A named, versioned plugin descriptor (spec §4.3). Concrete backends
/// report one of these from `Backend::plugin()` so the registry/CLI can
/// print capability info without instantiating the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plugin {
    pub name: &'static str,
    pub version: (u16, u16),
    pub capabilities: Capabilities,
}

/// The uniform interface every backend implements. Any method may return
/// [crate::error::Error::NotSupported].
#[async_trait]
pub trait Backend: Send + Sync {
    fn plugin(&self) -> Plugin;

    async fn get_option(&self, key: &str) -> Result<Value>;
    async fn set_option(&self, key: &str, value: Value) -> Result<()>;

    /// Returns a view of this backend restricted to the subtree rooted
    /// at `id` (and/or resolvable via `path`).
    async fn branch(&self, id: Option<Id>, path: Option<String>) -> Result<branch::Branch>;

    async fn root(&self, projection: Projection) -> Result<FsEntry>;

    /// Lazily yields matching [FsEntry] documents.
    async fn filter(
        &self,
        filter: crate::filter::Filter,
        options: FilterOptions,
        output: FilterOutput,
    ) -> Result<BoxStream<'static, Result<FsEntry>>>;

    /// Applies a stream of [FsEvent]s, returning the number of events
    /// successfully applied.
    async fn update(&self, events: BoxStream<'static, FsEvent>) -> Result<u64>;

    async fn report(
        &self,
        filter: crate::filter::Filter,
        group_by: Vec<String>,
        options: FilterOptions,
        output: FilterOutput,
    ) -> Result<BoxStream<'static, Result<ValueMap>>>;

    async fn get_info(&self, flags: InfoFlags) -> Result<ValueMap>;
    async fn set_info(&self, info: ValueMap, flags: InfoFlags) -> Result<()>;

    async fn get_attribute(&self, id: &Id, keys: &[String]) -> Result<ValueMap>;

    async fn delete_entry(&self, entry: &FsEntry) -> Result<()>;

    /// Releases any resources held by this backend. Idempotent.
    async fn destroy(&self) -> Result<()> {
        Ok(())
    }
}

//! A view of a backend restricted to the subtree rooted at an id/path
//! (spec §4.6).

use crate::backend::{Backend, Capabilities, InfoFlags, Plugin};
use crate::branch_iter;
use crate::error::{Error, Result};
use crate::filter::{reject_unsupported_branch_options, Filter, FilterOptions, FilterOutput};
use crate::fsentry::FsEntry;
use crate::fsevent::FsEvent;
use crate::id::Id;
use crate::value::{Value, ValueMap};
use futures::stream::BoxStream;
use std::sync::Arc;
use tonic::async_trait;

/// `{underlying, id_copy, path_copy}` (spec §4.6). An empty `id` with a
/// present `path` means "path-only" branch; the concrete backend's own
/// `branch()` is responsible for resolving whichever of the two is
/// missing before constructing this.
pub struct Branch {
    underlying: Arc<dyn Backend>,
    id: Id,
    path: Option<String>,
}

impl Branch {
    pub fn new(underlying: Arc<dyn Backend>, id: Id, path: Option<String>) -> Self {
        Branch {
            underlying,
            id,
            path,
        }
    }

    pub fn root_id(&self) -> &Id {
        &self.id
    }

    pub fn root_path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

#[async_trait]
impl Backend for Branch {
    fn plugin(&self) -> Plugin {
        let mut p = self.underlying.plugin();
        p.capabilities.remove(Capabilities::REPORT_OPS);
        p
    }

    async fn get_option(&self, key: &str) -> Result<Value> {
        self.underlying.get_option(key).await
    }

    async fn set_option(&self, key: &str, value: Value) -> Result<()> {
        self.underlying.set_option(key, value).await
    }

    async fn branch(&self, id: Option<Id>, path: Option<String>) -> Result<Branch> {
        // Branching a branch just re-roots under the current one; the
        // underlying backend still does any id/path resolution.
        let resolved = self.underlying.branch(id, path).await?;
        Ok(resolved)
    }

    async fn root(&self, projection: crate::filter::Projection) -> Result<FsEntry> {
        let filter = Filter::Compare(
            crate::filter::Field::Id,
            crate::filter::Cmp::Eq,
            Value::Binary(self.id.as_bytes().to_vec()),
        );
        let mut options = FilterOptions::default();
        options.one = true;
        let mut stream = self
            .underlying
            .filter(filter, options, FilterOutput::Projection(projection))
            .await?;
        use futures::StreamExt;
        stream
            .next()
            .await
            .ok_or_else(|| Error::NotFound(self.id.to_string()))?
    }

    async fn filter(
        &self,
        filter: Filter,
        options: FilterOptions,
        output: FilterOutput,
    ) -> Result<BoxStream<'static, Result<FsEntry>>> {
        reject_unsupported_branch_options(&options)?;
        branch_iter::branch_filter(self.underlying.clone(), self.id.clone(), filter, output).await
    }

    async fn update(&self, events: BoxStream<'static, FsEvent>) -> Result<u64> {
        self.underlying.update(events).await
    }

    async fn report(
        &self,
        _filter: Filter,
        _group_by: Vec<String>,
        _options: FilterOptions,
        _output: FilterOutput,
    ) -> Result<BoxStream<'static, Result<ValueMap>>> {
        Err(Error::NotSupported("report on a branch".to_string()))
    }

    async fn get_info(&self, flags: InfoFlags) -> Result<ValueMap> {
        self.underlying.get_info(flags).await
    }

    async fn set_info(&self, info: ValueMap, flags: InfoFlags) -> Result<()> {
        self.underlying.set_info(info, flags).await
    }

    async fn get_attribute(&self, id: &Id, keys: &[String]) -> Result<ValueMap> {
        self.underlying.get_attribute(id, keys).await
    }

    async fn delete_entry(&self, entry: &FsEntry) -> Result<()> {
        self.underlying.delete_entry(entry).await
    }
}

//! The generic branch iterator (spec §4.12) — the hard part of branching.
//!
//! Implements `branch.filter(filter, opts, output)` as a depth-bounded
//! recursive traversal that does not grow unbounded with subtree width:
//! two [crate::ringr::Ring]s (one for raw [Id] bytes, one for matching
//! "value records") cap how many parent ids can be in flight at once,
//! regardless of how many children a directory has.
//!
//! Two readers share each ring: `dir_reader` drains ids by issuing a
//! child-directory-listing query (which feeds the `directories` queue one
//! level deeper), `emit_reader` drains ids by issuing the actual
//! user-filter match query (which feeds the output stream). Whichever
//! reader has the larger unread backlog when a push fails is serviced
//! first — that is the reader actually holding the ring's tail back —
//! which keeps both readers converging rather than one starving the
//! other.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::filter::{Field, Filter, FilterOptions, FilterOutput};
use crate::fsentry::FsEntry;
use crate::id::Id;
use crate::ringr::Ring;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;

/// Matches the spec's fixed ring capacity (spec §4.12).
const RING_CAPACITY: usize = 16 * 1024 * 1024;

/// Encodes one [Id] as a 4-byte big-endian length prefix plus its raw
/// bytes, so a reader can split the ring's contiguous byte stream back
/// into individual records.
fn encode_id(id: &Id) -> Vec<u8> {
    let bytes = id.as_bytes();
    let mut out = Vec::with_capacity(4 + bytes.len());
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

async fn query_children(
    backend: &Arc<dyn Backend>,
    parents: &[Id],
    dirs_only: bool,
    user_filter: Option<&Filter>,
) -> Result<Vec<FsEntry>> {
    let mut filter = Filter::parent_in(parents.to_vec());
    if dirs_only {
        filter = filter.and(Filter::is_dir());
    }
    if let Some(uf) = user_filter {
        filter = filter.and(uf.clone());
    }
    let mut stream = backend
        .filter(
            filter,
            FilterOptions::default(),
            FilterOutput::default(),
        )
        .await?;
    let mut out = Vec::new();
    while let Some(entry) = stream.next().await {
        out.push(entry?);
    }
    Ok(out)
}

/// Drives the traversal described above and returns a boxed stream of
/// every fsentry under `root_id` matching `user_filter`.
///
/// `output` is accepted for interface parity with [Backend::filter] but
/// this implementation only honors [crate::filter::Projection]-shaped
/// output; callers asking for an aggregation get [Error::NotSupported].
pub async fn branch_filter(
    backend: Arc<dyn Backend>,
    root_id: Id,
    user_filter: Filter,
    output: FilterOutput,
) -> Result<BoxStream<'static, Result<FsEntry>>> {
    if matches!(output, FilterOutput::Aggregation { .. }) {
        return Err(Error::NotSupported(
            "aggregation output on a branch filter".to_string(),
        ));
    }

    // Include the root itself: it may match the user filter even though
    // it is never listed as anyone's child.
    let root_entry = {
        let filter = Filter::Compare(
            Field::Id,
            crate::filter::Cmp::Eq,
            crate::value::Value::Binary(root_id.as_bytes().to_vec()),
        );
        let mut stream = backend
            .filter(filter, FilterOptions::default(), FilterOutput::default())
            .await?;
        stream.next().await.transpose()?
    };

    let stream = async_stream::stream! {
        let ids_ring = Ring::new(RING_CAPACITY).expect("16 MiB is a power of two");
        let values_ring = Ring::new(RING_CAPACITY).expect("16 MiB is a power of two");
        let dir_reader = ids_ring.dup_at_tail();
        let emit_reader = ids_ring.dup_at_tail();
        let dir_vreader = values_ring.dup_at_tail();
        let emit_vreader = values_ring.dup_at_tail();

        let mut pending_dirs: VecDeque<Id> = VecDeque::new();
        pending_dirs.push_back(root_id.clone());
        let mut pending_entries: VecDeque<Result<FsEntry>> = VecDeque::new();

        if let Some(root) = root_entry {
            pending_entries.push_back(Ok(root));
        }

        // ids currently committed to the ring but not yet drained by
        // both readers; kept alongside the ring purely so we know which
        // byte ranges correspond to which ids when issuing the
        // recursion/emit queries (the ring itself is the memory bound,
        // this is O(batch) which is itself bounded by RING_CAPACITY).
        let mut batch: VecDeque<Id> = VecDeque::new();
        let mut dir_unacked: usize = 0;
        let mut emit_unacked: usize = 0;

        'outer: loop {
            if let Some(entry) = pending_entries.pop_front() {
                yield entry;
                continue;
            }

            // Fill the batch from the directories queue until the rings
            // are full or the queue is exhausted.
            loop {
                let Some(dir_id) = pending_dirs.pop_front() else {
                    break;
                };
                let encoded = encode_id(&dir_id);
                match ids_ring.push(&encoded) {
                    Ok(()) => {
                        if let Err(e) = values_ring.push(&(encoded.len() as u32).to_be_bytes()) {
                            yield Err(e);
                            break 'outer;
                        }
                        batch.push_back(dir_id);
                        dir_unacked += 1;
                        emit_unacked += 1;
                    }
                    Err(Error::NoBufferSpace) => {
                        // put it back, we'll retry after draining a reader
                        pending_dirs.push_front(dir_id);
                        if dir_unacked >= emit_unacked {
                            // dir_reader has the larger backlog: service it.
                            let to_recurse: Vec<Id> = batch.iter().take(dir_unacked).cloned().collect();
                            match query_children(&backend, &to_recurse, true, None).await {
                                Ok(children) => {
                                    for child in children {
                                        pending_dirs.push_back(child.id.clone());
                                    }
                                }
                                Err(e) => {
                                    yield Err(e);
                                    break 'outer;
                                }
                            }
                            for id in &to_recurse {
                                dir_reader.ack(encode_id(id).len());
                                dir_vreader.ack(4);
                            }
                            dir_unacked = 0;
                        } else {
                            let to_emit: Vec<Id> = batch.iter().take(emit_unacked).cloned().collect();
                            match query_children(&backend, &to_emit, false, Some(&user_filter)).await {
                                Ok(matches) => {
                                    for m in matches {
                                        pending_entries.push_back(Ok(m));
                                    }
                                }
                                Err(e) => {
                                    yield Err(e);
                                    break 'outer;
                                }
                            }
                            for id in &to_emit {
                                emit_reader.ack(encode_id(id).len());
                                emit_vreader.ack(4);
                            }
                            emit_unacked = 0;
                        }
                        // Drop ids both readers have now acked from the
                        // front of `batch`; whichever of the two counts is
                        // still nonzero marks how many remain pending on
                        // the other side.
                        let acked_by_both = batch.len().saturating_sub(dir_unacked.max(emit_unacked));
                        for _ in 0..acked_by_both {
                            batch.pop_front();
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break 'outer;
                    }
                }
            }

            if batch.is_empty() {
                // Nothing left anywhere: done.
                if pending_entries.is_empty() {
                    break;
                } else {
                    continue;
                }
            }

            // Directories queue is exhausted: flush whatever remains in
            // the batch through both queries one final time.
            let remaining: Vec<Id> = batch.iter().cloned().collect();
            if dir_unacked > 0 {
                if let Err(e) = query_children(&backend, &remaining, true, None)
                    .await
                    .map(|children| {
                        for child in children {
                            pending_dirs.push_back(child.id.clone());
                        }
                    })
                {
                    yield Err(e);
                    break 'outer;
                }
                for id in &remaining {
                    dir_reader.ack(encode_id(id).len());
                    dir_vreader.ack(4);
                }
                dir_unacked = 0;
            }
            if emit_unacked > 0 {
                match query_children(&backend, &remaining, false, Some(&user_filter)).await {
                    Ok(matches) => {
                        for m in matches {
                            pending_entries.push_back(Ok(m));
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break 'outer;
                    }
                }
                for id in &remaining {
                    emit_reader.ack(encode_id(id).len());
                    emit_vreader.ack(4);
                }
                emit_unacked = 0;
            }
            batch.clear();

            if !pending_dirs.is_empty() {
                continue;
            }
            if pending_entries.is_empty() {
                break;
            }
        }
    };

    Ok(Box::pin(stream))
}

//! A single-producer, multi-reader byte ring (spec §4.2).
//!
//! Used by the generic branch iterator ([crate::branch_iter]) to hold (1)
//! raw [crate::id::Id] bytes and (2) value records pointing into (1),
//! bounded at a fixed capacity regardless of how wide the tree being
//! branched over is.
//!
//! Rather than the double-mapped circular buffer the spec describes (so a
//! C caller can treat a wrapped region as contiguous), this ring is
//! backed by a `bytes::BytesMut` byte buffer that never wraps: bytes are
//! appended at the tail and trimmed from the head once every reader has
//! acknowledged them. This gives the same "treat a `peek()` as one
//! contiguous slice" guarantee the spec asks for, using safe Rust, at the
//! cost of occasionally compacting the buffer instead of reusing wrapped
//! space in place — acceptable since `ack` happens every time a record is
//! produced, so the buffer never grows past roughly `capacity` for long.

use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::sync::{Arc, Mutex};

struct Inner {
    capacity: usize,
    /// Bytes committed by the producer that at least one reader has not
    /// yet acknowledged. `head_offset` is the logical stream position of
    /// `buf[0]`.
    buf: BytesMut,
    head_offset: u64,
    tail_offset: u64,
    /// Per-reader read cursor, as a logical stream offset.
    readers: Vec<u64>,
}

impl Inner {
    fn min_reader_offset(&self) -> u64 {
        self.readers.iter().copied().min().unwrap_or(self.tail_offset)
    }

    fn compact(&mut self) {
        let min = self.min_reader_offset();
        let drop_n = (min - self.head_offset) as usize;
        if drop_n > 0 {
            let _ = self.buf.split_to(drop_n);
            self.head_offset = min;
        }
    }
}

/// A reader handle into a [Ring]. Cheap to clone; cloning does **not**
/// create a new reader cursor (use [Ring::dup] for that).
#[derive(Clone)]
pub struct Ring {
    inner: Arc<Mutex<Inner>>,
}

/// A single reader's position within a [Ring].
pub struct Reader {
    ring: Arc<Mutex<Inner>>,
    index: usize,
}

impl Ring {
    /// Creates a new ring of the given capacity, which must be a
    /// positive power of two.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity & (capacity - 1) != 0 {
            return Err(Error::Invalid(format!(
                "ring capacity {capacity} must be a positive power of two"
            )));
        }
        Ok(Ring {
            inner: Arc::new(Mutex::new(Inner {
                capacity,
                buf: BytesMut::with_capacity(capacity),
                head_offset: 0,
                tail_offset: 0,
                readers: Vec::new(),
            })),
        })
    }

    /// Adds a reader positioned at the current head of the ring (i.e. it
    /// will see nothing already committed — only future pushes). This
    /// matches [dup](self)-ing a reader created before any data existed;
    /// use [Ring::dup_at_tail] to instead position it at the current tail
    /// so it sees everything already buffered.
    pub fn dup(&self) -> Reader {
        let mut inner = self.inner.lock().unwrap();
        let offset = inner.head_offset;
        inner.readers.push(offset);
        Reader {
            ring: self.inner.clone(),
            index: inner.readers.len() - 1,
        }
    }

    /// Adds a reader positioned at the current tail, seeing only bytes
    /// pushed after this call.
    pub fn dup_at_tail(&self) -> Reader {
        let mut inner = self.inner.lock().unwrap();
        let offset = inner.tail_offset;
        inner.readers.push(offset);
        Reader {
            ring: self.inner.clone(),
            index: inner.readers.len() - 1,
        }
    }

    /// Commits `data` to the ring. Fails with [Error::NoBufferSpace] when
    /// the slowest reader's unacknowledged region would be overwritten;
    /// no bytes are committed in that case.
    pub fn push(&self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let min_reader = inner.min_reader_offset();
        let used = (inner.tail_offset - min_reader) as usize;
        if used + data.len() > inner.capacity {
            return Err(Error::NoBufferSpace);
        }
        inner.buf.extend_from_slice(data);
        inner.tail_offset += data.len() as u64;
        Ok(())
    }
}

impl Reader {
    /// Returns the bytes readable from this reader's cursor to the
    /// current tail, as one contiguous slice.
    pub fn peek(&self) -> Bytes {
        let inner = self.ring.lock().unwrap();
        let offset = inner.readers[self.index];
        let start = (offset - inner.head_offset) as usize;
        Bytes::copy_from_slice(&inner.buf[start..])
    }

    pub fn readable_len(&self) -> usize {
        let inner = self.ring.lock().unwrap();
        let offset = inner.readers[self.index];
        (inner.tail_offset - offset) as usize
    }

    /// Advances this reader's cursor by `n` bytes. Once every reader has
    /// ack'd a byte, it is trimmed from the ring.
    pub fn ack(&self, n: usize) {
        let mut inner = self.ring.lock().unwrap();
        inner.readers[self.index] += n as u64;
        inner.compact();
    }

    /// Acknowledges all bytes currently reachable by this reader. Called
    /// implicitly when a [Reader] is dropped, matching the spec's
    /// `destroy(reader)` semantics.
    pub fn ack_all(&self) {
        let n = self.readable_len();
        self.ack(n);
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.ack_all();
        let mut inner = self.ring.lock().unwrap();
        // The reader's slot stays allocated (readers are indexed by
        // position) but it can no longer hold back compaction: pin it at
        // the tail so it never reports as the slowest reader again.
        inner.readers[self.index] = inner.tail_offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_reader_sees_pushed_bytes() {
        let ring = Ring::new(16).unwrap();
        let r = ring.dup();
        ring.push(b"hello").unwrap();
        assert_eq!(r.peek().as_ref(), &b"hello"[..]);
        r.ack(5);
        assert_eq!(r.readable_len(), 0);
    }

    #[test]
    fn two_readers_advance_independently() {
        let ring = Ring::new(16).unwrap();
        let fast = ring.dup();
        let slow = ring.dup();
        ring.push(b"abcd").unwrap();
        fast.ack(4);
        assert_eq!(slow.peek().as_ref(), &b"abcd"[..]);
        assert_eq!(fast.readable_len(), 0);
        slow.ack(4);
    }

    #[test]
    fn push_to_full_ring_fails_without_committing() {
        let ring = Ring::new(4).unwrap();
        let r = ring.dup();
        ring.push(b"abcd").unwrap();
        assert!(ring.push(b"e").is_err());
        assert_eq!(r.readable_len(), 4, "failed push must not commit bytes");
    }

    #[test]
    fn ack_by_all_readers_reclaims_space() {
        let ring = Ring::new(4).unwrap();
        let a = ring.dup();
        let b = ring.dup();
        ring.push(b"abcd").unwrap();
        assert!(ring.push(b"e").is_err());
        a.ack(4);
        // b has not ack'd yet, so the ring is still considered full.
        assert!(ring.push(b"e").is_err());
        b.ack(4);
        ring.push(b"e").unwrap();
    }
}

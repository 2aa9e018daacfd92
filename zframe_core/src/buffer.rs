use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};

/// A growable byte buffer handed out by a [`BufferPool`].
///
/// Owned by exactly one task, queue slot, or free list at a time. The pool's
/// `live` counter tracks every `Buffer` from allocation until drop.
///
/// The backing storage only ever grows. Clearing resets the logical length,
/// so a recycled buffer is not filled again on its next use.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    len: usize,
    metrics: PoolMetrics,
}

impl Buffer {
    fn new(metrics: PoolMetrics) -> Self {
        metrics.0.live.fetch_add(1, Ordering::Relaxed);
        Self {
            data: Vec::new(),
            len: 0,
            metrics,
        }
    }

    /// Grow the buffer to at least `new_size` bytes.
    ///
    /// Existing contents are kept. Bytes past the old length hold whatever
    /// the storage last held (zero on first use). Reallocates only when the
    /// storage is too small, and reports an allocation failure instead of
    /// aborting.
    pub fn expand(&mut self, new_size: usize) -> Result<()> {
        if self.len >= new_size {
            return Ok(());
        }
        if self.data.len() < new_size {
            let additional = new_size - self.data.len();
            self.data
                .try_reserve(additional)
                .map_err(|_| Error::OutOfMemory {
                    requested: new_size,
                })?;
            self.data.resize(new_size, 0);
        }
        self.len = new_size;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Drop the contents, keeping the allocation.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }
}

impl Default for Buffer {
    /// A buffer outside any pool, counted only against its own metrics.
    fn default() -> Self {
        Self::new(PoolMetrics::default())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.metrics.0.live.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Counters shared by every pool built from the same handle.
///
/// A [`FramePipeline`](crate::FramePipeline) keeps one of these across
/// invocations so callers can check that nothing outlived a call.
#[derive(Debug, Clone, Default)]
pub struct PoolMetrics(Arc<PoolMetricsInner>);

#[derive(Debug, Default)]
struct PoolMetricsInner {
    created: AtomicUsize,
    recycled: AtomicUsize,
    live: AtomicUsize,
}

impl PoolMetrics {
    pub fn snapshot(&self) -> BufferStats {
        BufferStats {
            created: self.0.created.load(Ordering::Relaxed),
            recycled: self.0.recycled.load(Ordering::Relaxed),
            live: self.0.live.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of buffer pool metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStats {
    /// Buffers allocated fresh
    pub created: usize,
    /// Acquisitions served from the free list
    pub recycled: usize,
    /// Buffers currently allocated and not yet freed
    pub live: usize,
}

/// A stack of emptied buffers reused across frames.
///
/// # Example
/// ```
/// use zframe_core::BufferPool;
///
/// let pool = BufferPool::new();
/// let buffer = pool.acquire(4096).unwrap();
/// assert_eq!(buffer.len(), 4096);
/// pool.recycle(buffer);
/// assert_eq!(pool.release(), 1);
/// assert_eq!(pool.metrics().live, 0);
/// ```
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Mutex<Vec<Buffer>>,
    metrics: PoolMetrics,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pool reporting into an existing set of counters.
    pub fn with_metrics(metrics: PoolMetrics) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            metrics,
        }
    }

    /// Take a buffer of at least `min_size` bytes.
    ///
    /// Pops the most recently recycled buffer and grows it in place when one
    /// is available, otherwise allocates.
    pub fn acquire(&self, min_size: usize) -> Result<Buffer> {
        let recycled = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let mut buffer = match recycled {
            Some(buffer) => {
                self.metrics.0.recycled.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => {
                self.metrics.0.created.fetch_add(1, Ordering::Relaxed);
                Buffer::new(self.metrics.clone())
            }
        };
        buffer.expand(min_size)?;
        Ok(buffer)
    }

    /// Return a buffer whose contents have been consumed.
    pub fn recycle(&self, mut buffer: Buffer) {
        buffer.clear();
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(buffer);
    }

    /// Free every buffer on the free list. Returns how many were freed.
    pub fn release(&self) -> usize {
        let drained = std::mem::take(&mut *self.free.lock().unwrap_or_else(PoisonError::into_inner));
        drained.len()
    }

    /// Number of buffers waiting on the free list.
    pub fn free_len(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn metrics(&self) -> BufferStats {
        self.metrics.snapshot()
    }
}

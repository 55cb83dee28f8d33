//! Buffer lifecycle: fixed-size pools with leased buffers, the pooled
//! picture and motion vector types, and the small reference picture
//! list built on top of them.
//!
//! A pool hands out exclusive [`WriteLease`]s. Freezing a write lease
//! turns it into a cloneable [`SharedLease`] for concurrent readers;
//! when the last reader drops, the buffer returns to its pool
//! automatically. An empty pool never blocks: acquisition fails with
//! [`EncodeError::PoolExhausted`], which callers treat as back
//! pressure.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use crate::encoder::api::EncodeError;
use crate::encoder::Mv;

struct PoolShared<T> {
    free: Mutex<Vec<T>>,
    total: usize,
}

/// A fixed-size recycling pool of buffers of type `T`.
pub struct BufferPool<T> {
    shared: Arc<PoolShared<T>>,
}

impl<T> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        BufferPool {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> BufferPool<T> {
    /// Build a pool from pre-allocated buffers.
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        let free: Vec<T> = items.into_iter().collect();
        BufferPool {
            shared: Arc::new(PoolShared {
                total: free.len(),
                free: Mutex::new(free),
            }),
        }
    }

    /// Take a buffer for exclusive writing.
    pub fn acquire(&self) -> Result<WriteLease<T>, EncodeError> {
        let item = self
            .shared
            .free
            .lock()
            .map_err(|_| EncodeError::WorkerPanicked)?
            .pop();
        match item {
            Some(item) => Ok(WriteLease {
                item: Some(item),
                pool: self.clone(),
            }),
            None => Err(EncodeError::PoolExhausted),
        }
    }

    /// Number of buffers currently available for acquisition.
    pub fn available(&self) -> usize {
        self.shared.free.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// Number of buffers the pool was built with.
    pub fn capacity(&self) -> usize {
        self.shared.total
    }

    fn release(&self, item: T) {
        if let Ok(mut free) = self.shared.free.lock() {
            free.push(item);
        }
    }
}

/// Exclusive hold on a pooled buffer. Dropping it returns the buffer;
/// [`WriteLease::freeze`] converts it into a shared read-only lease.
pub struct WriteLease<T> {
    item: Option<T>,
    pool: BufferPool<T>,
}

impl<T> WriteLease<T> {
    /// End the write phase and make the buffer shareable. From here on
    /// the contents are immutable until the buffer cycles back through
    /// the pool.
    pub fn freeze(mut self) -> SharedLease<T> {
        let item = self.item.take();
        SharedLease {
            inner: Arc::new(SharedInner {
                item,
                pool: self.pool.clone(),
            }),
        }
    }
}

impl<T> Deref for WriteLease<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.item.as_ref().expect("write lease already released")
    }
}

impl<T> DerefMut for WriteLease<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("write lease already released")
    }
}

impl<T> Drop for WriteLease<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

struct SharedInner<T> {
    item: Option<T>,
    pool: BufferPool<T>,
}

impl<T> Drop for SharedInner<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

/// Cloneable read-only hold on a pooled buffer. The buffer returns to
/// its pool when the last clone drops.
pub struct SharedLease<T> {
    inner: Arc<SharedInner<T>>,
}

impl<T> Clone for SharedLease<T> {
    fn clone(&self) -> Self {
        SharedLease {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Deref for SharedLease<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.inner.item.as_ref().expect("shared lease already reclaimed")
    }
}

/// One reconstructed picture: planar 4:2:0 samples plus the three
/// half-pel luma planes filled in when the picture becomes a reference.
pub struct Picture {
    /// Luma width in samples, a multiple of 16.
    pub width: usize,
    /// Luma height in samples, a multiple of 16.
    pub height: usize,
    /// Luma plane.
    pub y: Vec<u8>,
    /// Cb plane, quarter size.
    pub u: Vec<u8>,
    /// Cr plane, quarter size.
    pub v: Vec<u8>,
    /// Horizontal half-pel luma.
    pub hpel_h: Vec<u8>,
    /// Vertical half-pel luma.
    pub hpel_v: Vec<u8>,
    /// Diagonal half-pel luma.
    pub hpel_hv: Vec<u8>,
}

impl Picture {
    /// Allocate a zeroed picture for the given luma dimensions.
    pub fn new(width: usize, height: usize) -> Self {
        let luma = width * height;
        let chroma = luma / 4;
        Picture {
            width,
            height,
            y: vec![0; luma],
            u: vec![0; chroma],
            v: vec![0; chroma],
            hpel_h: vec![0; luma],
            hpel_v: vec![0; luma],
            hpel_hv: vec![0; luma],
        }
    }

    pub(crate) fn mb_luma_offset(&self, mb_x: usize, mb_y: usize) -> usize {
        mb_y * 16 * self.width + mb_x * 16
    }

    pub(crate) fn mb_chroma_offset(&self, mb_x: usize, mb_y: usize) -> usize {
        mb_y * 8 * (self.width / 2) + mb_x * 8
    }
}

/// Per-frame motion vector storage, one entry per macroblock, kept
/// alongside the reference picture for future temporal prediction.
pub struct MvBank {
    /// Motion vectors in macroblock raster order; intra macroblocks
    /// hold the zero vector.
    pub mvs: Vec<Mv>,
}

impl MvBank {
    /// Allocate storage for `mb_count` macroblocks.
    pub fn new(mb_count: usize) -> Self {
        MvBank {
            mvs: vec![Mv::default(); mb_count],
        }
    }

    pub(crate) fn reset(&mut self) {
        self.mvs.fill(Mv::default());
    }
}

/// A completed reference frame: shared picture plus its motion vectors.
pub(crate) struct RefFrame {
    pub picture: SharedLease<Picture>,
    pub mvs: SharedLease<MvBank>,
}

impl Clone for RefFrame {
    fn clone(&self) -> Self {
        RefFrame {
            picture: self.picture.clone(),
            mvs: self.mvs.clone(),
        }
    }
}

/// Reference list manager. Holds the most recent reference frames and
/// evicts the oldest once full; eviction drops a shared lease, which
/// recycles the underlying buffers when the last reader finishes.
pub(crate) struct DpbManager {
    frames: VecDeque<RefFrame>,
    max_refs: usize,
}

impl DpbManager {
    pub fn new(max_refs: usize) -> Self {
        DpbManager {
            frames: VecDeque::with_capacity(max_refs),
            max_refs,
        }
    }

    /// Drop all references, as an intra frame does.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn push(&mut self, frame: RefFrame) {
        if self.frames.len() == self.max_refs {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// The most recent reference, if any.
    pub fn latest(&self) -> Option<&RefFrame> {
        self.frames.back()
    }
}

//! Size-classed buffer pool for frame bodies.
//!
//! Frame bodies are written into [`PooledBuf`]s acquired from a [`BufferPool`]
//! and handed back with [`BufferPool::release`] (or on drop) once the
//! transport has written them.
//!
//! # Design
//!
//! - Size classes are powers of two from 64 bytes to 64 KiB
//! - Each class keeps a bounded free list of `BytesMut`
//! - Buffers larger than the biggest class are never retained
//! - A `PooledBuf` is moved, never shared, so it has exactly one owner
//!
//! # Usage
//!
//! ```
//! use rsocket_core::protocol::BufferPool;
//!
//! let pool = BufferPool::new();
//! let mut buf = pool.acquire(16);
//! buf.write_u32(100);
//! buf.write_u24(4).unwrap();
//! assert_eq!(buf.bytes(), &[0, 0, 0, 100, 0, 0, 4]);
//! pool.release(buf);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Smallest size class (bytes).
pub const MIN_CLASS_SIZE: usize = 64;

/// Largest pooled size class (bytes).
pub const MAX_CLASS_SIZE: usize = 64 * 1024;

/// Default number of retained buffers per size class.
pub const DEFAULT_MAX_RETAINED_PER_CLASS: usize = 64;

const CLASS_COUNT: usize = (MAX_CLASS_SIZE / MIN_CLASS_SIZE).trailing_zeros() as usize + 1;

/// Configuration for a [`BufferPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum buffers kept in each size class' free list.
    pub max_retained_per_class: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_retained_per_class: DEFAULT_MAX_RETAINED_PER_CLASS,
        }
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total `acquire` calls.
    pub acquired: usize,
    /// Acquisitions served from a free list.
    pub reused: usize,
    /// Buffers handed back (explicitly or on drop).
    pub released: usize,
    /// Buffers currently sitting in free lists.
    pub retained: usize,
}

/// Free-list buffer pool keyed by size class.
///
/// Cheaply cloneable; clones share the same free lists.
#[derive(Clone, Default)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    classes: [Mutex<Vec<BytesMut>>; CLASS_COUNT],
    config: PoolConfig,
    acquired: AtomicUsize,
    reused: AtomicUsize,
    released: AtomicUsize,
}

impl Default for PoolInner {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl PoolInner {
    fn new(config: PoolConfig) -> Self {
        Self {
            classes: std::array::from_fn(|_| Mutex::new(Vec::new())),
            config,
            acquired: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    fn reclaim(&self, mut buf: BytesMut) {
        self.released.fetch_add(1, Ordering::Relaxed);
        let Some(class) = class_for_retained(buf.capacity()) else {
            return;
        };
        buf.clear();
        let mut list = self.classes[class].lock();
        if list.len() < self.config.max_retained_per_class {
            list.push(buf);
        }
    }
}

/// Class index able to serve `min_capacity`, or `None` when oversized.
fn class_for_request(min_capacity: usize) -> Option<usize> {
    let size = min_capacity.max(MIN_CLASS_SIZE).checked_next_power_of_two()?;
    if size > MAX_CLASS_SIZE {
        return None;
    }
    Some((size / MIN_CLASS_SIZE).trailing_zeros() as usize)
}

/// Largest class fully covered by `capacity`.
fn class_for_retained(capacity: usize) -> Option<usize> {
    if !(MIN_CLASS_SIZE..=MAX_CLASS_SIZE).contains(&capacity) {
        return None;
    }
    let floor = 1usize << (usize::BITS - 1 - capacity.leading_zeros());
    Some((floor / MIN_CLASS_SIZE).trailing_zeros() as usize)
}

fn class_size(class: usize) -> usize {
    MIN_CLASS_SIZE << class
}

impl BufferPool {
    /// Create a pool with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool with custom configuration.
    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner::new(config)),
        }
    }

    /// Acquire an empty buffer with at least `min_capacity` bytes of room.
    pub fn acquire(&self, min_capacity: usize) -> PooledBuf {
        self.inner.acquired.fetch_add(1, Ordering::Relaxed);

        let buf = match class_for_request(min_capacity) {
            Some(class) => match self.inner.classes[class].lock().pop() {
                Some(buf) => {
                    self.inner.reused.fetch_add(1, Ordering::Relaxed);
                    buf
                }
                None => BytesMut::with_capacity(class_size(class)),
            },
            None => BytesMut::with_capacity(min_capacity),
        };

        PooledBuf {
            buf: Some(buf),
            pool: Some(self.inner.clone()),
        }
    }

    /// Hand a buffer back to its size class.
    pub fn release(&self, buf: PooledBuf) {
        drop(buf);
    }

    /// Snapshot of pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.inner.acquired.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            released: self.inner.released.load(Ordering::Relaxed),
            retained: self.inner.classes.iter().map(|c| c.lock().len()).sum(),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A growable buffer leased from a [`BufferPool`].
///
/// Returned to the pool when dropped or released. A buffer created with
/// [`PooledBuf::unpooled`] (or [`PooledBuf::from`]) is simply freed.
pub struct PooledBuf {
    buf: Option<BytesMut>,
    pool: Option<Arc<PoolInner>>,
}

impl PooledBuf {
    /// Standalone buffer not tied to any pool.
    pub fn unpooled(capacity: usize) -> Self {
        Self {
            buf: Some(BytesMut::with_capacity(capacity)),
            pool: None,
        }
    }

    fn inner(&self) -> &BytesMut {
        self.buf
            .as_ref()
            .unwrap_or_else(|| unreachable!("buffer is only taken on drop"))
    }

    fn inner_mut(&mut self) -> &mut BytesMut {
        self.buf
            .as_mut()
            .unwrap_or_else(|| unreachable!("buffer is only taken on drop"))
    }

    /// Append raw bytes.
    #[inline]
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.inner_mut().extend_from_slice(data);
    }

    /// Append a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.inner_mut().put_u8(value);
    }

    /// Append a 24-bit big-endian integer.
    ///
    /// Fails without writing if `value` does not fit 24 bits.
    pub fn write_u24(&mut self, value: usize) -> Result<()> {
        if value > 0xFF_FFFF {
            return Err(Error::MetadataTooLarge(value));
        }
        let bytes = (value as u32).to_be_bytes();
        self.inner_mut().extend_from_slice(&bytes[1..]);
        Ok(())
    }

    /// Append a 32-bit big-endian integer.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.inner_mut().put_u32(value);
    }

    /// Overwrite 4 already-written bytes at `offset` with `value` (BE).
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the written length.
    pub fn put_u32_at(&mut self, offset: usize, value: u32) {
        self.inner_mut()[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// Readable view of the written bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        self.inner()
    }

    /// Number of written bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner().len()
    }

    /// Check if nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner().is_empty()
    }

    /// Current capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner().capacity()
    }

    /// Copy the contents into an immutable `Bytes`.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.bytes())
    }

    /// Take the contents without returning the storage to the pool.
    pub fn into_bytes(mut self) -> Bytes {
        self.pool = None;
        self.buf.take().map(BytesMut::freeze).unwrap_or_default()
    }
}

impl From<&[u8]> for PooledBuf {
    fn from(data: &[u8]) -> Self {
        let mut buf = Self::unpooled(data.len());
        buf.write_bytes(data);
        buf
    }
}

impl AsRef<[u8]> for PooledBuf {
    fn as_ref(&self) -> &[u8] {
        self.bytes()
    }
}

impl fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.len())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let (Some(buf), Some(pool)) = (self.buf.take(), self.pool.take()) {
            pool.reclaim(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_selection() {
        assert_eq!(class_for_request(0), Some(0));
        assert_eq!(class_for_request(64), Some(0));
        assert_eq!(class_for_request(65), Some(1));
        assert_eq!(class_for_request(MAX_CLASS_SIZE), Some(CLASS_COUNT - 1));
        assert_eq!(class_for_request(MAX_CLASS_SIZE + 1), None);

        assert_eq!(class_for_retained(63), None);
        assert_eq!(class_for_retained(64), Some(0));
        assert_eq!(class_for_retained(127), Some(0));
        assert_eq!(class_for_retained(MAX_CLASS_SIZE), Some(CLASS_COUNT - 1));
        assert_eq!(class_for_retained(1 << 20), None);
    }

    #[test]
    fn test_acquire_capacity() {
        let pool = BufferPool::new();
        let buf = pool.acquire(100);
        assert!(buf.capacity() >= 100);
        assert!(buf.is_empty());

        let big = pool.acquire(MAX_CLASS_SIZE * 2);
        assert!(big.capacity() >= MAX_CLASS_SIZE * 2);
    }

    #[test]
    fn test_release_and_reuse() {
        let pool = BufferPool::new();

        let mut buf = pool.acquire(10);
        buf.write_bytes(b"leftover");
        pool.release(buf);
        assert_eq!(pool.stats().retained, 1);

        let again = pool.acquire(10);
        assert!(again.is_empty(), "reused buffer must be cleared");

        let stats = pool.stats();
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.retained, 0);
    }

    #[test]
    fn test_drop_returns_to_pool() {
        let pool = BufferPool::new();
        {
            let _buf = pool.acquire(200);
        }
        assert_eq!(pool.stats().released, 1);
        assert_eq!(pool.stats().retained, 1);
    }

    #[test]
    fn test_retention_is_bounded() {
        let pool = BufferPool::with_config(PoolConfig {
            max_retained_per_class: 2,
        });
        let bufs: Vec<_> = (0..5).map(|_| pool.acquire(8)).collect();
        for buf in bufs {
            pool.release(buf);
        }
        assert_eq!(pool.stats().released, 5);
        assert_eq!(pool.stats().retained, 2);
    }

    #[test]
    fn test_oversized_not_retained() {
        let pool = BufferPool::new();
        pool.release(pool.acquire(MAX_CLASS_SIZE * 4));
        assert_eq!(pool.stats().retained, 0);

        let small = PooledBuf::unpooled(8);
        drop(small);
        assert_eq!(pool.stats().released, 1);
    }

    #[test]
    fn test_write_fields_big_endian() {
        let pool = BufferPool::new();
        let mut buf = pool.acquire(16);
        buf.write_u32(0x0102_0304);
        buf.write_u24(0x0A_0B0C).unwrap();
        buf.write_u8(0xFF);
        assert_eq!(buf.bytes(), &[1, 2, 3, 4, 0x0A, 0x0B, 0x0C, 0xFF]);

        buf.put_u32_at(0, 100);
        assert_eq!(&buf.bytes()[..4], &[0, 0, 0, 100]);
    }

    #[test]
    fn test_write_u24_overflow_writes_nothing() {
        let mut buf = PooledBuf::unpooled(8);
        let err = buf.write_u24(0x100_0000).unwrap_err();
        assert!(matches!(err, Error::MetadataTooLarge(0x100_0000)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_into_bytes_detaches() {
        let pool = BufferPool::new();
        let mut buf = pool.acquire(4);
        buf.write_bytes(b"data");
        let bytes = buf.into_bytes();
        assert_eq!(&bytes[..], b"data");
        assert_eq!(pool.stats().released, 0);
    }

    #[test]
    fn test_clone_shares_free_lists() {
        let pool = BufferPool::new();
        let other = pool.clone();
        other.release(pool.acquire(32));
        assert_eq!(pool.stats().retained, 1);
    }
}

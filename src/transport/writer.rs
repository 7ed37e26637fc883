//! Dedicated writer task for length-prefixed frame output.
//!
//! Streams hand frames to a single writer task through a bounded channel.
//! The task takes whatever is queued (up to [`MAX_BATCH_SIZE`] frames),
//! writes each as `[len:u24][header][body]` with vectored writes, and then
//! drops the batch so every body buffer goes back to its pool.
//!
//! # Architecture
//!
//! ```text
//! Stream 1 ─┐
//! Stream 2 ─┼─► FrameSender ─► mpsc ─► writer task ─► AsyncWrite
//! Stream N ─┘        ▲                      │
//!                    └──── in-flight slots ─┘
//! ```
//!
//! Backpressure counts frames that were queued but not yet written. Once
//! `max_pending_frames` are in flight, [`FrameSender::send`] parks until the
//! writer frees a slot or `backpressure_timeout` elapses, and
//! [`FrameSender::try_send`] fails fast.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    Frame, FrameHeader, PooledBuf, FRAME_LENGTH_SIZE, HEADER_SIZE, MAX_FRAME_LENGTH,
};

/// Default number of in-flight frames before senders are held back.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default time a sender waits for an in-flight slot.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames written per vectored write at most.
const MAX_BATCH_SIZE: usize = 64;

const HEAD_SIZE: usize = FRAME_LENGTH_SIZE + HEADER_SIZE;

/// A frame with its length prefix, ready to be written.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Length prefix followed by the encoded header.
    head: [u8; HEAD_SIZE],
    body: PooledBuf,
}

impl OutboundFrame {
    /// Prepare `frame` for writing.
    ///
    /// # Errors
    ///
    /// `Protocol` if the frame does not fit the 24-bit length prefix.
    pub fn new(frame: Frame) -> Result<Self> {
        let (header, body) = frame.into_parts();
        Self::from_parts(header, body)
    }

    /// Prepare a header and body for writing.
    pub fn from_parts(header: FrameHeader, body: PooledBuf) -> Result<Self> {
        let frame_len = HEADER_SIZE + body.len();
        if frame_len > MAX_FRAME_LENGTH {
            return Err(Error::Protocol(format!(
                "Frame length {frame_len} exceeds maximum {MAX_FRAME_LENGTH}"
            )));
        }

        let mut head = [0u8; HEAD_SIZE];
        head[..FRAME_LENGTH_SIZE].copy_from_slice(&(frame_len as u32).to_be_bytes()[1..]);
        header.encode_into(&mut head[FRAME_LENGTH_SIZE..]);
        Ok(Self { head, body })
    }

    /// Bytes this frame occupies on the wire, prefix included.
    #[inline]
    pub fn size(&self) -> usize {
        HEAD_SIZE + self.body.len()
    }

    fn segments(&self) -> [&[u8]; 2] {
        [&self.head, self.body.bytes()]
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// In-flight frames allowed before senders are held back.
    pub max_pending_frames: usize,
    /// Capacity of the channel feeding the writer task.
    pub channel_capacity: usize,
    /// How long `send` waits for an in-flight slot.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

impl WriterConfig {
    /// Set the in-flight frame limit (at least 1).
    pub fn max_pending_frames(mut self, max: usize) -> Self {
        self.max_pending_frames = max.max(1);
        self
    }

    /// Set the channel capacity (at least 1).
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set the backpressure timeout.
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.backpressure_timeout = timeout;
        self
    }
}

/// In-flight slot accounting shared by senders and the writer task.
#[derive(Debug)]
struct Inflight {
    count: AtomicUsize,
    limit: usize,
    freed: Notify,
}

impl Inflight {
    fn new(limit: usize) -> Self {
        Self {
            count: AtomicUsize::new(0),
            limit,
            freed: Notify::new(),
        }
    }

    fn try_acquire(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .is_ok()
    }

    async fn acquire(&self) {
        loop {
            // Registered before the check so a release in between is not lost.
            let freed = self.freed.notified();
            if self.try_acquire() {
                return;
            }
            freed.await;
        }
    }

    fn release(&self, n: usize) {
        self.count.fetch_sub(n, Ordering::AcqRel);
        self.freed.notify_waiters();
    }

    fn current(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable; one per stream is fine.
#[derive(Debug, Clone)]
pub struct FrameSender {
    queue: mpsc::Sender<OutboundFrame>,
    inflight: Arc<Inflight>,
    timeout: Duration,
}

impl FrameSender {
    /// Queue a frame, waiting while backpressure is active.
    ///
    /// # Errors
    ///
    /// `BackpressureTimeout` if no slot frees up in time,
    /// `ConnectionClosed` if the writer task has stopped.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.send_outbound(OutboundFrame::new(frame)?).await
    }

    /// Queue an already-prepared frame.
    pub async fn send_outbound(&self, frame: OutboundFrame) -> Result<()> {
        if tokio::time::timeout(self.timeout, self.inflight.acquire())
            .await
            .is_err()
        {
            warn!(pending = self.inflight.current(), "Writer backpressure timeout");
            return Err(Error::BackpressureTimeout);
        }

        if self.queue.send(frame).await.is_err() {
            self.inflight.release(1);
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// `BackpressureTimeout` right away when no slot is free.
    pub fn try_send(&self, frame: Frame) -> Result<()> {
        let frame = OutboundFrame::new(frame)?;
        if !self.inflight.try_acquire() {
            return Err(Error::BackpressureTimeout);
        }

        self.queue.try_send(frame).map_err(|e| {
            self.inflight.release(1);
            match e {
                mpsc::error::TrySendError::Full(_) => Error::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => Error::ConnectionClosed,
            }
        })
    }

    /// Whether senders are currently held back.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.inflight.current() >= self.inflight.limit
    }

    /// Frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.inflight.current()
    }
}

/// Spawn the writer task and return a sender for it.
///
/// The task ends cleanly once every [`FrameSender`] is dropped, or with the
/// first I/O error.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (FrameSender, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (queue, rx) = mpsc::channel(config.channel_capacity.max(1));
    let inflight = Arc::new(Inflight::new(config.max_pending_frames.max(1)));

    let sender = FrameSender {
        queue,
        inflight: inflight.clone(),
        timeout: config.backpressure_timeout,
    };
    let task = tokio::spawn(run_writer(rx, writer, inflight));
    (sender, task)
}

async fn run_writer<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    inflight: Arc<Inflight>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    loop {
        if rx.recv_many(&mut batch, MAX_BATCH_SIZE).await == 0 {
            debug!("All frame senders dropped, writer stopping");
            return Ok(());
        }

        let frames = batch.len();
        trace!(frames, "Writing batch");
        let written = write_frames(&mut writer, &batch).await;

        // Dropping the frames hands their bodies back to the pool.
        batch.clear();
        inflight.release(frames);

        if let Err(e) = written {
            warn!(error = %e, "Writer task failed");
            return Err(e);
        }
    }
}

async fn write_frames<W>(writer: &mut W, frames: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = frames.iter().map(OutboundFrame::size).sum();
    let mut done = 0;

    while done < total {
        let slices = unwritten_slices(frames, done);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(Error::Io(std::io::ErrorKind::WriteZero.into()));
        }
        done += n;
    }

    writer.flush().await?;
    Ok(())
}

/// Slices covering everything after the first `skip` bytes of `frames`.
fn unwritten_slices(frames: &[OutboundFrame], mut skip: usize) -> Vec<IoSlice<'_>> {
    frames
        .iter()
        .flat_map(OutboundFrame::segments)
        .filter_map(|segment| {
            if skip >= segment.len() {
                skip -= segment.len();
                return None;
            }
            let rest = &segment[skip..];
            skip = 0;
            Some(IoSlice::new(rest))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BufferPool, FrameDecoder, FrameFlags, FrameType, RequestNFrame};
    use tokio::io::{duplex, AsyncReadExt};

    fn request_n(pool: &BufferPool, id: u32, n: u32) -> Frame {
        RequestNFrame::encode(pool, id, n).unwrap().into()
    }

    fn sender_with(inflight: usize, limit: usize, timeout: Duration) -> (FrameSender, mpsc::Receiver<OutboundFrame>) {
        let (queue, rx) = mpsc::channel(16);
        let state = Inflight::new(limit);
        state.count.store(inflight, Ordering::Release);
        let sender = FrameSender {
            queue,
            inflight: Arc::new(state),
            timeout,
        };
        (sender, rx)
    }

    #[test]
    fn test_outbound_frame_head() {
        let pool = BufferPool::new();
        let frame = OutboundFrame::new(request_n(&pool, 1, 5)).unwrap();

        assert_eq!(&frame.head[..FRAME_LENGTH_SIZE], &[0, 0, 10]);
        assert_eq!(&frame.head[FRAME_LENGTH_SIZE..], &[0, 0, 0, 1, 0x20, 0x00]);
        assert_eq!(frame.size(), HEAD_SIZE + 4);
    }

    #[test]
    fn test_outbound_frame_too_large() {
        let header = FrameHeader::new(1, FrameType::RequestN, FrameFlags::empty());
        let mut body = PooledBuf::unpooled(MAX_FRAME_LENGTH);
        body.write_bytes(&vec![0u8; MAX_FRAME_LENGTH]);

        assert!(matches!(
            OutboundFrame::from_parts(header, body),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_writer_config_builder() {
        let config = WriterConfig::default()
            .max_pending_frames(0)
            .channel_capacity(4)
            .backpressure_timeout(Duration::from_millis(10));
        assert_eq!(config.max_pending_frames, 1);
        assert_eq!(config.channel_capacity, 4);
        assert_eq!(config.backpressure_timeout, Duration::from_millis(10));

        let defaults = WriterConfig::default();
        assert_eq!(defaults.max_pending_frames, DEFAULT_MAX_PENDING_FRAMES);
        assert_eq!(defaults.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let pool = BufferPool::new();
        let (client, mut server) = duplex(4096);
        let (sender, _task) = spawn_writer_task(client, WriterConfig::default());

        for i in 1..=10u32 {
            sender.send(request_n(&pool, i, i * 2)).await.unwrap();
        }

        let mut decoder = FrameDecoder::new(pool.clone());
        let mut frames = Vec::new();
        let mut buf = vec![0u8; 1024];
        while frames.len() < 10 {
            let n = server.read(&mut buf).await.unwrap();
            frames.extend(decoder.push(&buf[..n]).unwrap());
        }

        let ids: Vec<_> = frames.iter().map(Frame::stream_id).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_bodies_released_after_write() {
        let pool = BufferPool::new();
        let (client, _server) = duplex(4096);
        let (sender, task) = spawn_writer_task(client, WriterConfig::default());

        for i in 1..=3 {
            sender.send(request_n(&pool, i, 1)).await.unwrap();
        }
        drop(sender);
        task.await.unwrap().unwrap();

        assert_eq!(pool.stats().released, 3);
    }

    #[tokio::test]
    async fn test_try_send_without_slot() {
        let (sender, _rx) = sender_with(2, 2, Duration::from_secs(1));

        assert!(sender.is_backpressure_active());
        let result = sender.try_send(request_n(&BufferPool::new(), 1, 1));
        assert!(matches!(result, Err(Error::BackpressureTimeout)));
        assert_eq!(sender.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_send_times_out_without_slot() {
        let (sender, _rx) = sender_with(2, 2, Duration::from_millis(5));

        let result = sender.send(request_n(&BufferPool::new(), 1, 1)).await;
        assert!(matches!(result, Err(Error::BackpressureTimeout)));
        assert_eq!(sender.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_send_resumes_when_slot_freed() {
        let (sender, mut rx) = sender_with(1, 1, Duration::from_secs(5));
        let inflight = sender.inflight.clone();

        let waiter = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.send(request_n(&BufferPool::new(), 2, 1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        inflight.release(1);
        waiter.await.unwrap().unwrap();
        assert!(rx.recv().await.is_some());
        assert_eq!(sender.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_send_after_writer_stopped() {
        let (sender, rx) = sender_with(0, 10, Duration::from_secs(1));
        drop(rx);

        let result = sender.send(request_n(&BufferPool::new(), 1, 1)).await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert_eq!(sender.pending_count(), 0);
    }

    #[test]
    fn test_unwritten_slices() {
        let pool = BufferPool::new();
        let frames = vec![
            OutboundFrame::new(request_n(&pool, 1, 1)).unwrap(),
            OutboundFrame::new(request_n(&pool, 2, 1)).unwrap(),
        ];

        assert_eq!(unwritten_slices(&frames, 0).len(), 4);

        // Partway through the first head.
        let slices = unwritten_slices(&frames, 5);
        assert_eq!(slices.len(), 4);
        assert_eq!(slices[0].len(), HEAD_SIZE - 5);

        // First frame fully written.
        let slices = unwritten_slices(&frames, HEAD_SIZE + 4);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEAD_SIZE);
    }

    #[tokio::test]
    async fn test_write_frames_total_size() {
        let pool = BufferPool::new();
        let mut out = std::io::Cursor::new(Vec::new());
        let frames: Vec<_> = (1..=5)
            .map(|i| OutboundFrame::new(request_n(&pool, i, 1)).unwrap())
            .collect();

        write_frames(&mut out, &frames).await.unwrap();
        assert_eq!(out.into_inner().len(), 5 * (HEAD_SIZE + 4));
    }

    #[tokio::test]
    async fn test_writer_stops_when_senders_dropped() {
        let (client, _server) = duplex(4096);
        let (sender, task) = spawn_writer_task(client, WriterConfig::default());

        drop(sender);
        assert!(task.await.unwrap().is_ok());
    }
}

//! Bounded recycling of fixed-size read buffers.
//!
//! The source implementation relies on a GC reference queue: a buffer is
//! returned to the pool opportunistically when it becomes unreachable. This
//! port replaces that with an explicit bounded free-list: a decode
//! task calls [`BufferPool::release`] once it is done with a buffer, and
//! [`BufferPool::take`] allocates a fresh one on a miss, up to `max_buffers`.

use bytes::BytesMut;
use tokio::sync::Mutex;

use crate::frame::DEFAULT_RCVBUF;

pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
    max_buffers: usize,
}

impl BufferPool {
    /// `max_buffers` should roughly track `active connections * 2`.
    /// Capped so a burst of connections can't grow this pool unbounded.
    pub fn new(buffer_size: usize, max_buffers: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_buffers)),
            buffer_size,
            max_buffers,
        }
    }

    pub fn with_defaults(max_buffers: usize) -> Self {
        Self::new(DEFAULT_RCVBUF, max_buffers)
    }

    pub async fn take(&self) -> BytesMut {
        let mut free = self.free.lock().await;
        if let Some(mut buf) = free.pop() {
            buf.clear();
            return buf;
        }
        BytesMut::with_capacity(self.buffer_size)
    }

    pub async fn release(&self, buf: BytesMut) {
        let mut free = self.free.lock().await;
        if free.len() < self.max_buffers {
            free.push(buf);
        }
        // Otherwise the buffer is simply dropped — the pool is at capacity.
    }

    pub async fn len(&self) -> usize {
        self.free.lock().await.len()
    }
}

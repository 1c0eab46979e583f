//! Reusable transfer buffers.
//!
//! Workers copy file content through a pooled buffer instead of allocating one
//! per file. Buffers are zero-filled when first allocated only; callers track
//! how much of a buffer they filled.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// Default buffer size (1MB)
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

/// Default number of idle buffers kept for reuse
pub const DEFAULT_MAX_IDLE: usize = 64;

#[derive(Debug)]
pub struct BufferPool {
    buffer_size: usize,
    max_idle: usize,
    idle: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        Self {
            buffer_size,
            max_idle,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Borrow a buffer; it goes back to the pool when the guard drops.
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let reused = self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
        let buf = reused.unwrap_or_else(|| vec![0u8; self.buffer_size]);
        PooledBuffer {
            pool: self,
            buf: Some(buf),
        }
    }

    fn release(&self, buf: Vec<u8>) {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }

    /// Number of buffers currently waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_MAX_IDLE)
    }
}

pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Option<Vec<u8>>,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_has_full_size() {
        let pool = BufferPool::new(4096, 4);
        let buf = pool.acquire();
        assert_eq!(buf.len(), 4096);
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_buffer_reused_without_clearing() {
        let pool = BufferPool::new(16, 4);
        {
            let mut buf = pool.acquire();
            buf[..3].copy_from_slice(b"abc");
        }
        assert_eq!(pool.idle_count(), 1);

        let buf = pool.acquire();
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_idle_buffers_capped() {
        let pool = BufferPool::new(8, 2);
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        drop(a);
        drop(b);
        drop(c);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_concurrent_use() {
        let pool = std::sync::Arc::new(BufferPool::new(64, 8));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let mut buf = pool.acquire();
                        buf[0] = 1;
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert!(pool.idle_count() <= 8);
    }
}

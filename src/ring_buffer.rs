//! Fixed-capacity byte ring used as the image cache.
//!
//! The ISP driver fills it chunk by chunk (producer side) and the image
//! transfer engine drains it as radio space frees up (consumer side).
//!
//! ```text
//!            read_index          write_index
//!                 │                    │
//!   ┌─────────────▼────────────────────▼──────────┐
//!   │  free ...   │ used bytes (FIFO) │  free ... │
//!   └─────────────────────────────────────────────┘
//! ```
//!
//! Both sides run on the single cooperative run loop, so there is no
//! synchronisation. Pushes and pops are all-or-nothing: callers check
//! [`RingBuffer::free`] / [`RingBuffer::used`] first.

use crate::error::RingBufferError;

/// Byte FIFO with compile-time capacity `N`. No allocation.
pub struct RingBuffer<const N: usize> {
    data: [u8; N],
    write_index: usize,
    read_index: usize,
    used: usize,
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RingBuffer<N> {
    pub const fn new() -> Self {
        Self {
            data: [0; N],
            write_index: 0,
            read_index: 0,
            used: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes currently buffered.
    pub const fn used(&self) -> usize {
        self.used
    }

    /// Bytes that can still be pushed.
    pub const fn free(&self) -> usize {
        N - self.used
    }

    pub const fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Drop all buffered bytes and zero both cursors.
    pub fn reset(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.used = 0;
    }

    /// Append all of `bytes`, or nothing.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), RingBufferError> {
        let n = bytes.len();
        if n > self.free() {
            return Err(RingBufferError::CapacityExceeded {
                requested: n,
                free: self.free(),
            });
        }
        if n == 0 {
            return Ok(());
        }

        // At most two copies: up to the end of the array, then the wrap.
        let first = n.min(N - self.write_index);
        self.data[self.write_index..self.write_index + first].copy_from_slice(&bytes[..first]);
        self.data[..n - first].copy_from_slice(&bytes[first..]);

        self.write_index = (self.write_index + n) % N;
        self.used += n;
        Ok(())
    }

    /// Remove exactly `out.len()` bytes in FIFO order into `out`.
    pub fn pop(&mut self, out: &mut [u8]) -> Result<(), RingBufferError> {
        let n = out.len();
        if n > self.used {
            return Err(RingBufferError::Underflow {
                requested: n,
                used: self.used,
            });
        }
        if n == 0 {
            return Ok(());
        }

        let first = n.min(N - self.read_index);
        out[..first].copy_from_slice(&self.data[self.read_index..self.read_index + first]);
        out[first..].copy_from_slice(&self.data[..n - first]);

        self.read_index = (self.read_index + n) % N;
        self.used -= n;
        Ok(())
    }
}

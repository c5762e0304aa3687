//! Fixed-capacity ring buffer over `Copy` elements.
//!
//! Positions are free-running counters; the slot index is `pos & mask`.
//! This keeps the two invariants trivially true:
//!
//! - `write_pos - read_pos <= capacity`
//! - `space_left() + data_left() == capacity`
//!
//! There is no overwrite-on-full mode. Writers check `space_left()` first or
//! get an `OutOfSpace` error; nothing is ever written partially.
//!
//! # Example
//!
//! ```
//! use debugwire::protocol::RingBuffer;
//!
//! let mut ring: RingBuffer<u8> = RingBuffer::with_capacity(8);
//! ring.write(b"hello").unwrap();
//!
//! let mut out = [0u8; 5];
//! ring.read(&mut out).unwrap();
//! assert_eq!(&out, b"hello");
//! assert_eq!(ring.data_left(), 0);
//! ```

use crate::error::{DebugWireError, Result};

/// Bounded circular buffer with bulk read/write.
pub struct RingBuffer<T> {
    data: Vec<T>,
    read_pos: usize,
    write_pos: usize,
    mask: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a buffer holding at least `capacity` elements.
    ///
    /// The capacity is rounded up to the next power of two. Zero stays zero.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut ring = Self {
            data: Vec::new(),
            read_pos: 0,
            write_pos: 0,
            mask: 0,
        };
        ring.resize(capacity);
        ring
    }

    /// Total number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of unread elements.
    #[inline]
    pub fn data_left(&self) -> usize {
        self.write_pos.wrapping_sub(self.read_pos)
    }

    /// Number of elements that can be written without failing.
    #[inline]
    pub fn space_left(&self) -> usize {
        self.capacity() - self.data_left()
    }

    /// Append all of `items`, or nothing.
    pub fn write(&mut self, items: &[T]) -> Result<()> {
        let count = items.len();
        if count > self.space_left() {
            return Err(DebugWireError::OutOfSpace {
                requested: count,
                available: self.space_left(),
            });
        }
        if count == 0 {
            return Ok(());
        }

        let start = self.write_pos & self.mask;
        let first = count.min(self.capacity() - start);
        self.data[start..start + first].copy_from_slice(&items[..first]);
        self.data[..count - first].copy_from_slice(&items[first..]);

        self.write_pos = self.write_pos.wrapping_add(count);
        Ok(())
    }

    /// Fill `out` completely from the unread elements, or read nothing.
    pub fn read(&mut self, out: &mut [T]) -> Result<()> {
        self.peek(out)?;
        self.read_pos = self.read_pos.wrapping_add(out.len());
        Ok(())
    }

    /// Copy the next `out.len()` elements without consuming them.
    pub fn peek(&self, out: &mut [T]) -> Result<()> {
        let count = out.len();
        if count > self.data_left() {
            return Err(DebugWireError::Unavailable);
        }
        if count == 0 {
            return Ok(());
        }

        let start = self.read_pos & self.mask;
        let first = count.min(self.capacity() - start);
        out[..first].copy_from_slice(&self.data[start..start + first]);
        out[first..].copy_from_slice(&self.data[..count - first]);
        Ok(())
    }

    /// Drop the next `count` unread elements.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        if count > self.data_left() {
            return Err(DebugWireError::Unavailable);
        }
        self.read_pos = self.read_pos.wrapping_add(count);
        Ok(())
    }

    /// The unread elements as up to two slices in logical order.
    pub fn as_slices(&self) -> (&[T], &[T]) {
        let count = self.data_left();
        if count == 0 {
            return (&[], &[]);
        }
        let start = self.read_pos & self.mask;
        let first = count.min(self.capacity() - start);
        (&self.data[start..start + first], &self.data[..count - first])
    }

    /// Change the capacity and reset both positions.
    ///
    /// Meant to be called on an empty buffer. Anything still unread is
    /// discarded.
    pub fn resize(&mut self, capacity: usize) {
        if self.data_left() > 0 {
            tracing::warn!(
                "Resizing ring buffer with {} unread elements, data discarded",
                self.data_left()
            );
        }

        let capacity = if capacity == 0 {
            0
        } else {
            capacity.next_power_of_two()
        };

        self.data = vec![T::default(); capacity];
        self.mask = capacity.saturating_sub(1);
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Forget all unread elements, keeping the capacity.
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }
}

impl<T: Copy + Default> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

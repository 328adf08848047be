//! Per-worker work arena for result buffers.
//!
//! A fixed-capacity bump allocator. Each reservation writes a record
//! `[buffer_id: u32 LE][size: u32 LE][size bytes]` at the current offset and
//! advances it, so the arena contents are already the response payload.
//!
//! ```text
//! 0                                         offset      capacity
//! ├──────────────┬──────────────┬─────────────┼─────────────┤
//! │ id│size│data │ id│size│data │ id│size│data│   free      │
//! └──────────────┴──────────────┴─────────────┴─────────────┘
//!                                └─ tail: only buffer that can be resized
//! ```
//!
//! Buffers are addressed through [`ResultBuffer`] handles rather than
//! references. A handle carries the arena generation it was reserved in;
//! `clear()` starts a new generation, so handles from an earlier request are
//! rejected instead of aliasing new data.

use std::fmt;

use crate::protocol::RESULT_BUFFER_HEADER_SIZE;

/// Handle to a buffer reserved in a [`WorkArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultBuffer {
    buffer_id: u32,
    offset: usize,
    size: usize,
    generation: u32,
}

impl ResultBuffer {
    /// Application-chosen buffer identifier.
    #[inline]
    pub fn id(&self) -> u32 {
        self.buffer_id
    }

    /// Payload size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    fn data_start(&self) -> usize {
        self.offset + RESULT_BUFFER_HEADER_SIZE
    }

    #[inline]
    fn end(&self) -> usize {
        self.data_start() + self.size
    }
}

/// Result of [`WorkArena::resize_last`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// Buffer resized in place.
    Good,
    /// Buffer is not the tail of the current generation.
    InputError,
    /// Growing would exceed the arena capacity.
    OutOfMemory,
}

/// Fixed-capacity bump allocator owned by one worker.
pub struct WorkArena {
    buf: Vec<u8>,
    offset: usize,
    generation: u32,
}

impl WorkArena {
    /// Allocate an arena of `capacity` bytes.
    ///
    /// The backing storage is allocated once and reused for the arena's
    /// whole lifetime.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            offset: 0,
            generation: 0,
        }
    }

    /// Drop all reservations.
    pub fn clear(&mut self) {
        self.offset = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes used, including record headers.
    #[inline]
    pub fn size(&self) -> usize {
        self.offset
    }

    /// Bytes still available, including room for record headers.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// Whether nothing is reserved.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }

    /// Reserve a `size`-byte buffer tagged `buffer_id`.
    ///
    /// Returns `None` if the record does not fit; the offset is unchanged in
    /// that case. The returned payload region holds unspecified bytes.
    pub fn reserve(&mut self, buffer_id: u32, size: usize) -> Option<ResultBuffer> {
        let stored_size = u32::try_from(size).ok()?;
        let end = self
            .offset
            .checked_add(RESULT_BUFFER_HEADER_SIZE)?
            .checked_add(size)?;
        if end > self.capacity() {
            tracing::debug!(
                offset = self.offset,
                size,
                capacity = self.capacity(),
                "Work arena exhausted"
            );
            return None;
        }

        let buffer = ResultBuffer {
            buffer_id,
            offset: self.offset,
            size,
            generation: self.generation,
        };
        self.write_record_header(buffer.offset, buffer_id, stored_size);
        self.offset = end;
        Some(buffer)
    }

    /// Resize the most recently reserved buffer in place.
    ///
    /// On `Good` the handle is updated to the new size and the arena offset
    /// moves to the buffer's new end. Any other outcome leaves both the arena
    /// and the handle untouched.
    pub fn resize_last(&mut self, buffer: &mut ResultBuffer, new_size: usize) -> ResizeOutcome {
        if !self.is_tail(buffer) {
            return ResizeOutcome::InputError;
        }

        let Ok(stored_size) = u32::try_from(new_size) else {
            return ResizeOutcome::OutOfMemory;
        };
        let end = match buffer.data_start().checked_add(new_size) {
            Some(end) if end <= self.capacity() => end,
            _ => return ResizeOutcome::OutOfMemory,
        };

        self.write_record_header(buffer.offset, buffer.buffer_id, stored_size);
        self.offset = end;
        buffer.size = new_size;
        ResizeOutcome::Good
    }

    /// Whether `buffer` is the tail of the current generation.
    pub fn is_tail(&self, buffer: &ResultBuffer) -> bool {
        self.is_live(buffer) && buffer.end() == self.offset
    }

    /// Payload of a live buffer.
    pub fn buffer(&self, buffer: &ResultBuffer) -> Option<&[u8]> {
        if !self.is_live(buffer) {
            return None;
        }
        Some(&self.buf[buffer.data_start()..buffer.end()])
    }

    /// Mutable payload of a live buffer.
    pub fn buffer_mut(&mut self, buffer: &ResultBuffer) -> Option<&mut [u8]> {
        if !self.is_live(buffer) {
            return None;
        }
        Some(&mut self.buf[buffer.data_start()..buffer.end()])
    }

    /// Everything reserved so far, as it goes on the wire.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.buf[..self.offset]
    }

    /// A handle is live when it belongs to this generation, lies inside the
    /// used region, and still matches the record header stored for it.
    fn is_live(&self, buffer: &ResultBuffer) -> bool {
        if buffer.generation != self.generation || buffer.end() > self.offset {
            return false;
        }
        let (id, size) = self.read_record_header(buffer.offset);
        id == buffer.buffer_id && size as usize == buffer.size
    }

    fn write_record_header(&mut self, at: usize, buffer_id: u32, size: u32) {
        self.buf[at..at + 4].copy_from_slice(&buffer_id.to_le_bytes());
        self.buf[at + 4..at + 8].copy_from_slice(&size.to_le_bytes());
    }

    fn read_record_header(&self, at: usize) -> (u32, u32) {
        let b = &self.buf[at..at + RESULT_BUFFER_HEADER_SIZE];
        (
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
        )
    }
}

impl fmt::Debug for WorkArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkArena")
            .field("capacity", &self.capacity())
            .field("offset", &self.offset)
            .field("generation", &self.generation)
            .finish()
    }
}

//! In-memory byte store.

use bytes::{Bytes, BytesMut};

use super::StoreError;

/// Append-only buffer holding every byte received so far.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buffer: BytesMut,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds a complete caller-supplied payload.
    pub fn with_payload(payload: &Bytes) -> Self {
        Self {
            buffer: BytesMut::from(&payload[..]),
        }
    }

    /// Appends the next chunk and returns the new `bytes_available`.
    pub fn append(&mut self, chunk: &[u8]) -> u64 {
        self.buffer.extend_from_slice(chunk);
        self.bytes_available()
    }

    pub fn bytes_available(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Returns a copy of `[start, start + len)`.
    ///
    /// # Errors
    ///
    /// - `StoreError::OutOfRange` - The range reaches past `bytes_available`
    pub fn read(&self, start: u64, len: u64) -> Result<Bytes, StoreError> {
        let available = self.bytes_available();
        let end = start
            .checked_add(len)
            .filter(|end| *end <= available)
            .ok_or(StoreError::OutOfRange {
                start,
                len,
                available,
            })?;

        Ok(Bytes::copy_from_slice(
            &self.buffer[start as usize..end as usize],
        ))
    }

    /// Copy of everything received, handed out with the completion notification.
    pub fn payload(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buffer)
    }
}

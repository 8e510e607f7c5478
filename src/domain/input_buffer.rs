//! Inbound byte buffer.
//!
//! Each notification from the device arrives as one chunk. Chunks are kept
//! whole in arrival order and read back one byte at a time.

use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct InputBuffer {
    chunks: VecDeque<Vec<u8>>,
    /// Offset of the next unread byte in the front chunk.
    cursor: usize,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one inbound delivery. Empty chunks are ignored.
    pub fn push(&mut self, chunk: Vec<u8>) {
        if !chunk.is_empty() {
            self.chunks.push_back(chunk);
        }
    }

    /// True if at least one unread byte is buffered.
    pub fn byte_available(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// Number of unread bytes across all chunks.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum::<usize>() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        !self.byte_available()
    }

    /// Take the next unread byte, evicting the front chunk once exhausted.
    pub fn next_byte(&mut self) -> Option<u8> {
        let front = self.chunks.front()?;
        let byte = front[self.cursor];
        self.cursor += 1;
        if self.cursor >= front.len() {
            self.chunks.pop_front();
            self.cursor = 0;
        }
        Some(byte)
    }

    /// Take every unread byte at once.
    pub fn drain(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        if let Some(front) = self.chunks.pop_front() {
            out.extend_from_slice(&front[self.cursor..]);
        }
        for chunk in self.chunks.drain(..) {
            out.extend_from_slice(&chunk);
        }
        self.cursor = 0;
        out
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.cursor = 0;
    }
}

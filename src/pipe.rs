//! Block-chunked growable byte buffer
//!
//! [`BlockBuffer`] accumulates bytes of unknown final length without ever
//! reallocating or copying what was already written. Data lives in a list
//! of full fixed-size blocks plus one partially filled tail block.
//!
//! Any number of [`BlockReader`] cursors can be opened over the same data.
//! Cursors are independent of each other and of the writer, and they are
//! live: a cursor observes bytes appended after it was opened, including
//! bytes still sitting in the tail block.

use crate::config::{validate_block_size, DEFAULT_BLOCK_SIZE};
use crate::error::{ArchiveError, Result};
use parking_lot::RwLock;
use std::io::{Read, Write};
use std::sync::Arc;

#[derive(Debug)]
struct Blocks {
    /// Completed blocks, each exactly `block_size` bytes
    full: Vec<Box<[u8]>>,
    /// Tail block; `tail.len()` is the used length
    tail: Vec<u8>,
    block_size: usize,
    shift: u32,
}

impl Blocks {
    fn size(&self) -> u64 {
        ((self.full.len() as u64) << self.shift) + self.tail.len() as u64
    }

    /// Bytes readable at `pos` without crossing a block boundary
    fn chunk_at(&self, pos: u64) -> &[u8] {
        let index = (pos >> self.shift) as usize;
        let within = (pos & (self.block_size as u64 - 1)) as usize;

        let block: &[u8] = if index < self.full.len() {
            &self.full[index]
        } else if index == self.full.len() {
            &self.tail
        } else {
            return &[];
        };

        block.get(within..).unwrap_or(&[])
    }
}

/// Append-only byte sink backed by fixed-size blocks
pub struct BlockBuffer {
    shared: Arc<RwLock<Blocks>>,
}

impl BlockBuffer {
    /// Create a buffer with the default block size (4096)
    pub fn new() -> Self {
        Self::build(DEFAULT_BLOCK_SIZE)
    }

    /// Create a buffer with a custom block size
    ///
    /// The block size must be a power of two of at least 64 bytes.
    pub fn with_block_size(block_size: usize) -> Result<Self> {
        validate_block_size(block_size)?;
        Ok(Self::build(block_size))
    }

    fn build(block_size: usize) -> Self {
        BlockBuffer {
            shared: Arc::new(RwLock::new(Blocks {
                full: Vec::new(),
                tail: Vec::with_capacity(block_size),
                block_size,
                shift: block_size.trailing_zeros(),
            })),
        }
    }

    /// Append a single byte
    pub fn write_byte(&mut self, byte: u8) {
        let mut blocks = self.shared.write();
        blocks.tail.push(byte);
        if blocks.tail.len() == blocks.block_size {
            rotate_tail(&mut blocks);
        }
    }

    /// Append `len` bytes of `src` starting at `offset`
    ///
    /// The range is checked before anything is written, so a failed call
    /// leaves the buffer untouched.
    pub fn write_range(&mut self, src: &[u8], offset: usize, len: usize) -> Result<()> {
        let end = offset.checked_add(len).filter(|&end| end <= src.len());
        let Some(end) = end else {
            return Err(ArchiveError::OutOfBounds {
                offset,
                len,
                available: src.len(),
            });
        };

        self.append(&src[offset..end]);
        Ok(())
    }

    /// Append all of `data`
    pub fn append(&mut self, mut data: &[u8]) {
        let mut blocks = self.shared.write();
        while !data.is_empty() {
            let room = blocks.block_size - blocks.tail.len();
            let take = room.min(data.len());
            blocks.tail.extend_from_slice(&data[..take]);
            data = &data[take..];

            if blocks.tail.len() == blocks.block_size {
                rotate_tail(&mut blocks);
            }
        }
    }

    /// Open a new cursor positioned at offset 0
    pub fn open_reader(&self) -> BlockReader {
        BlockReader {
            shared: Arc::clone(&self.shared),
            pos: 0,
            mark: 0,
        }
    }

    /// Total number of bytes written
    pub fn size(&self) -> u64 {
        self.shared.read().size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of completed (full) blocks
    pub fn block_count(&self) -> usize {
        self.shared.read().full.len()
    }

    pub fn block_size(&self) -> usize {
        self.shared.read().block_size
    }

    /// Copy the whole content into one contiguous vector
    pub fn to_vec(&self) -> Vec<u8> {
        let blocks = self.shared.read();
        let mut out = Vec::with_capacity(blocks.size() as usize);
        for block in &blocks.full {
            out.extend_from_slice(block);
        }
        out.extend_from_slice(&blocks.tail);
        out
    }

    /// Spool the whole content into `sink`, returning the byte count
    pub fn copy_to<W: Write>(&self, sink: &mut W) -> std::io::Result<u64> {
        let blocks = self.shared.read();
        for block in &blocks.full {
            sink.write_all(block)?;
        }
        sink.write_all(&blocks.tail)?;
        Ok(blocks.size())
    }
}

fn rotate_tail(blocks: &mut Blocks) {
    let fresh = Vec::with_capacity(blocks.block_size);
    let full = std::mem::replace(&mut blocks.tail, fresh);
    blocks.full.push(full.into_boxed_slice());
}

impl Default for BlockBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for BlockBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Independent read cursor over a [`BlockBuffer`]
///
/// A single read never crosses a block boundary; callers that want more
/// must loop (as [`Read::read_to_end`] does).
pub struct BlockReader {
    shared: Arc<RwLock<Blocks>>,
    pos: u64,
    mark: u64,
}

impl BlockReader {
    /// Read one byte, `None` at end of data
    pub fn read_byte(&mut self) -> Option<u8> {
        let blocks = self.shared.read();
        let byte = blocks.chunk_at(self.pos).first().copied()?;
        self.pos += 1;
        Some(byte)
    }

    /// Bytes readable before the current block boundary
    pub fn available(&self) -> usize {
        self.shared.read().chunk_at(self.pos).len()
    }

    /// Advance by at most `n` bytes within the current block
    pub fn skip(&mut self, n: u64) -> u64 {
        let skipped = n.min(self.available() as u64);
        self.pos += skipped;
        skipped
    }

    pub fn mark(&mut self) {
        self.mark = self.pos;
    }

    /// Rewind to the last mark (offset 0 if never marked)
    pub fn reset(&mut self) {
        self.pos = self.mark;
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl Read for BlockReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let blocks = self.shared.read();
        let chunk = blocks.chunk_at(self.pos);
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

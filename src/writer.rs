//! Staged archive writer
//!
//! [`ArchiveWriter`] batches entry payloads in a fixed staging buffer and
//! appends them to the archive's backing file in large chunks. The logical
//! write cursor ([`ArchiveWriter::file_position`]) is always the flushed
//! length plus the staged length, so entry offsets are correct whether or
//! not their bytes have reached the file yet.

use crate::archive::{Archive, Entry};
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, Result};
use crate::exit::ExitHooks;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ArchiveWriter {
    archive: Option<Archive>,
    staging: Box<[u8]>,
    /// Bytes staged but not yet flushed
    buffer_position: usize,
    /// Bytes physically written to the backing file
    file_position: u64,
    high_water_mark: usize,
}

impl ArchiveWriter {
    /// Start a writer over a new archive using the process exit hooks
    pub fn new() -> Result<Self> {
        Self::with_config(&ArchiveConfig::default(), crate::exit::process_hooks())
    }

    pub fn with_config(config: &ArchiveConfig, hooks: Arc<dyn ExitHooks>) -> Result<Self> {
        let archive = Archive::create(config, hooks)?;
        Ok(ArchiveWriter {
            archive: Some(archive),
            staging: vec![0u8; config.staging_capacity].into_boxed_slice(),
            buffer_position: 0,
            file_position: 0,
            high_water_mark: config.high_water_mark(),
        })
    }

    /// Logical end of data: flushed bytes plus staged bytes
    pub fn file_position(&self) -> u64 {
        self.file_position + self.buffer_position as u64
    }

    fn archive(&self) -> Result<&Archive> {
        self.archive.as_ref().ok_or(ArchiveError::AlreadyFinished)
    }

    fn flush_staging(&mut self) -> Result<()> {
        if self.buffer_position == 0 {
            return Ok(());
        }

        let archive = self.archive()?;
        archive.append(&self.staging[..self.buffer_position])?;
        self.file_position += self.buffer_position as u64;
        self.buffer_position = 0;
        Ok(())
    }

    /// Add an entry holding all of `data`
    pub fn add_bytes(&mut self, name: &str, data: &[u8]) -> Result<Entry> {
        self.add_range(name, data, 0, data.len())
    }

    /// Add an entry holding `len` bytes of `data` starting at `offset`
    ///
    /// Staged bytes are flushed first whenever this payload would carry the
    /// buffer past the high-water mark. Payloads larger than the mark bypass
    /// the staging buffer and are written straight through.
    pub fn add_range(&mut self, name: &str, data: &[u8], offset: usize, len: usize) -> Result<Entry> {
        self.archive()?;
        let end = offset.checked_add(len).filter(|&end| end <= data.len());
        let Some(end) = end else {
            return Err(ArchiveError::OutOfBounds {
                offset,
                len,
                available: data.len(),
            });
        };
        let payload = &data[offset..end];
        let start = self.file_position();

        if payload.len() > self.high_water_mark {
            self.flush_staging()?;
            self.archive()?.append(payload)?;
            self.file_position += payload.len() as u64;
        } else {
            if self.buffer_position + payload.len() > self.high_water_mark {
                self.flush_staging()?;
            }
            self.staging[self.buffer_position..self.buffer_position + payload.len()]
                .copy_from_slice(payload);
            self.buffer_position += payload.len();
        }

        self.record(name, start)
    }

    /// Add an entry holding everything `source` yields until end of stream
    pub fn add_reader<R: Read>(&mut self, name: &str, mut source: R) -> Result<Entry> {
        self.archive()?;
        let start = self.file_position();

        loop {
            if self.buffer_position == self.staging.len() {
                self.flush_staging()?;
            }

            match source.read(&mut self.staging[self.buffer_position..]) {
                Ok(0) => break,
                Ok(n) => self.buffer_position += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.record(name, start)
    }

    fn record(&self, name: &str, start: u64) -> Result<Entry> {
        let size = self.file_position() - start;
        debug!("Staged {} ({} bytes at {})", name, size, start);
        Ok(self.archive()?.insert_entry(name, start, size))
    }

    /// Flush staged bytes and hand over the finished archive
    ///
    /// The writer is spent afterwards: further adds and a second `finish`
    /// fail with [`ArchiveError::AlreadyFinished`].
    pub fn finish(&mut self) -> Result<Archive> {
        self.flush_staging()?;
        let archive = self.archive.take().ok_or(ArchiveError::AlreadyFinished)?;
        info!(
            "Finished archive {} ({} entries, {} bytes)",
            archive.id(),
            archive.entry_count(),
            self.file_position
        );
        Ok(archive)
    }

    /// Abandon the writer and delete its backing file
    ///
    /// No-op after [`ArchiveWriter::finish`] or a previous close.
    pub fn close(&mut self) -> Result<()> {
        self.buffer_position = 0;
        match self.archive.take() {
            Some(archive) => archive.close(),
            None => Ok(()),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.archive.is_none()
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to discard unfinished archive: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::HookRegistry;

    fn writer_with_staging(capacity: usize) -> ArchiveWriter {
        let config = ArchiveConfig {
            staging_capacity: capacity,
            ..Default::default()
        };
        ArchiveWriter::with_config(&config, Arc::new(HookRegistry::new())).unwrap()
    }

    #[test]
    fn test_hello_world_chain() {
        let mut writer = writer_with_staging(1024);
        writer.add_bytes("a", b"hello").unwrap();
        writer.add_bytes("a", b"world").unwrap();
        let archive = writer.finish().unwrap();

        let head = archive.get_entry("a").unwrap();
        assert_eq!(archive.read_entry(&head).unwrap(), b"hello");
        let next = archive.next_entry(&head).unwrap();
        assert_eq!(archive.read_entry(&next).unwrap(), b"world");
        assert_eq!(next.offset(), 5);
    }

    #[test]
    fn test_file_position_tracks_staged_bytes() {
        let mut writer = writer_with_staging(1024);
        assert_eq!(writer.file_position(), 0);

        writer.add_bytes("x", &[1u8; 100]).unwrap();
        assert_eq!(writer.file_position(), 100);
        assert_eq!(writer.file_position, 0);

        // 682 is the high-water mark for 1024; this goes straight through
        let entry = writer.add_bytes("big", &[2u8; 700]).unwrap();
        assert_eq!(entry.offset(), 100);
        assert_eq!(writer.file_position, 800);
        assert_eq!(writer.buffer_position, 0);
    }

    #[test]
    fn test_flush_when_staging_passes_high_water_mark() {
        let mut writer = writer_with_staging(1024);

        writer.add_bytes("a", &[1u8; 400]).unwrap();
        assert_eq!(writer.file_position, 0);

        // 400 + 400 would pass 682, so the first payload goes out first
        let entry = writer.add_bytes("b", &[2u8; 400]).unwrap();
        assert_eq!(entry.offset(), 400);
        assert_eq!(writer.file_position, 400);
        assert_eq!(writer.buffer_position, 400);

        writer.add_bytes("c", &[3u8; 282]).unwrap();
        assert_eq!(writer.file_position, 400);
        assert_eq!(writer.buffer_position, 682);

        let archive = writer.finish().unwrap();
        assert_eq!(archive.read("b").unwrap(), vec![2u8; 400]);
        assert_eq!(archive.data_len().unwrap(), 1082);
    }

    #[test]
    fn test_entries_span_flush_boundaries() {
        let mut writer = writer_with_staging(1024);
        let mut expected = Vec::new();
        for i in 0..20u8 {
            let data = vec![i; 300 + i as usize];
            writer.add_bytes(&format!("e{}", i), &data).unwrap();
            expected.push(data);
        }
        let archive = writer.finish().unwrap();

        for (i, data) in expected.iter().enumerate() {
            assert_eq!(&archive.read(&format!("e{}", i)).unwrap(), data);
        }
    }

    #[test]
    fn test_add_reader_larger_than_staging() {
        let mut writer = writer_with_staging(1024);
        writer.add_bytes("before", b"12345").unwrap();

        let data: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
        let entry = writer.add_reader("stream", &data[..]).unwrap();
        assert_eq!(entry.offset(), 5);
        assert_eq!(entry.size(), 5000);

        let archive = writer.finish().unwrap();
        assert_eq!(archive.read("stream").unwrap(), data);
        assert_eq!(archive.read("before").unwrap(), b"12345");
        assert_eq!(archive.data_len().unwrap(), 5005);
    }

    #[test]
    fn test_add_range_bounds() {
        let mut writer = writer_with_staging(1024);
        let entry = writer.add_range("r", b"abcdef", 2, 3).unwrap();
        assert_eq!(entry.size(), 3);

        assert!(matches!(
            writer.add_range("bad", b"abc", 2, 5),
            Err(ArchiveError::OutOfBounds { .. })
        ));
        assert_eq!(writer.file_position(), 3);

        let archive = writer.finish().unwrap();
        assert_eq!(archive.read("r").unwrap(), b"cde");
        assert!(archive.get_entry("bad").is_none());
    }

    #[test]
    fn test_use_after_finish() {
        let mut writer = writer_with_staging(1024);
        writer.add_bytes("a", b"1").unwrap();
        let archive = writer.finish().unwrap();

        assert!(writer.is_finished());
        assert!(matches!(
            writer.add_bytes("b", b"2"),
            Err(ArchiveError::AlreadyFinished)
        ));
        assert!(matches!(
            writer.add_reader("c", &b"3"[..]),
            Err(ArchiveError::AlreadyFinished)
        ));
        assert!(matches!(writer.finish(), Err(ArchiveError::AlreadyFinished)));

        // close after finish leaves the archive alone
        writer.close().unwrap();
        assert!(!archive.is_closed());
        assert_eq!(archive.read("a").unwrap(), b"1");
    }

    #[test]
    fn test_close_discards_backing_file() {
        let mut writer = writer_with_staging(1024);
        writer.add_bytes("a", &[0u8; 2000]).unwrap();
        let path = writer.archive().unwrap().path().unwrap();
        assert!(path.exists());

        writer.close().unwrap();
        assert!(!path.exists());
        writer.close().unwrap();
    }

    #[test]
    fn test_empty_entry() {
        let mut writer = writer_with_staging(1024);
        let entry = writer.add_bytes("empty", b"").unwrap();
        assert_eq!(entry.size(), 0);

        let archive = writer.finish().unwrap();
        assert!(archive.read("empty").unwrap().is_empty());
    }
}

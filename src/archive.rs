//! File-backed archive of named byte ranges
//!
//! An [`Archive`] owns one temporary backing file holding concatenated
//! entry payloads in write order, plus an in-memory index mapping each name
//! to its chain of [`Entry`] records. The file has no header or footer and is
//! meaningless without the index, so it lives only as long as the archive.
//!
//! All file access (appends and reads) goes through a single mutex so every
//! seek+read or seek+write pair is atomic with respect to other threads.
//!
//! The backing file is deleted exactly once: on [`Archive::close`], when the
//! last handle is dropped, or by the process-exit hook, whichever runs first.

use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, Result};
use crate::exit::{ExitHooks, HookToken};
use crate::resource_url;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tempfile::TempPath;
use tracing::{debug, info, warn};

/// Upper bound for up-front allocation when reading a whole entry
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

static NEXT_ARCHIVE_ID: AtomicU64 = AtomicU64::new(1);

/// Live archives by id, used to resolve synthetic URLs
static LIVE_ARCHIVES: Lazy<Mutex<HashMap<u64, Weak<Shared>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// One named byte range in the backing file
///
/// Entries are immutable. Entries sharing a name form a chain ordered by
/// insertion; `index` is the position within that chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    name: Arc<str>,
    index: usize,
    offset: u64,
    size: u64,
}

impl Entry {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position within the chain for this name (0 = first added)
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

struct Backing {
    file: File,
    path: TempPath,
    /// Bytes physically written
    len: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseOrigin {
    Explicit,
    ExitHook,
}

struct Shared {
    id: u64,
    backing: Mutex<Option<Backing>>,
    index: RwLock<HashMap<Arc<str>, Vec<Entry>>>,
    hooks: Arc<dyn ExitHooks>,
    hook_token: Mutex<Option<HookToken>>,
}

impl Shared {
    /// Seek to `offset` and fill as much of `buf` as the file allows
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut guard = self.backing.lock();
        let backing = guard.as_mut().ok_or(ArchiveError::Closed)?;

        backing.file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match backing.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn close(&self, origin: CloseOrigin) -> Result<()> {
        let mut guard = self.backing.lock();
        let Some(backing) = guard.take() else {
            return Ok(());
        };

        if let Some(token) = self.hook_token.lock().take() {
            // A running registry has already detached the hook that called us
            if origin == CloseOrigin::Explicit {
                self.hooks.deregister(token);
            }
        }
        LIVE_ARCHIVES.lock().remove(&self.id);

        let Backing { file, path, len } = backing;
        drop(file);
        let backing_path = path.to_path_buf();
        path.close()?;

        // Exit hooks may run after thread-locals are torn down, where a
        // subscriber would panic. Only log explicit closes.
        if origin == CloseOrigin::Explicit {
            info!(
                "Closed archive {} ({} bytes, {:?})",
                self.id, len, backing_path
            );
        }
        Ok(())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Err(e) = self.close(CloseOrigin::Explicit) {
            warn!("Failed to delete backing file of archive {}: {}", self.id, e);
        }
    }
}

/// Handle to a file-backed archive
///
/// Cloning is cheap; all clones share the backing file and index.
#[derive(Clone)]
pub struct Archive {
    shared: Arc<Shared>,
}

impl Archive {
    /// Create an empty archive backed by a fresh temporary file
    ///
    /// A cleanup hook is registered with `hooks` so the file is removed at
    /// process exit if the archive is never closed.
    pub fn create(config: &ArchiveConfig, hooks: Arc<dyn ExitHooks>) -> Result<Self> {
        config.validate()?;

        let mut builder = tempfile::Builder::new();
        builder.prefix(&config.temp_prefix).suffix(".solid");
        let temp = match &config.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let (file, path) = temp.into_parts();

        let id = NEXT_ARCHIVE_ID.fetch_add(1, Ordering::Relaxed);
        debug!("Creating archive {} at {:?}", id, &*path);

        let shared = Arc::new(Shared {
            id,
            backing: Mutex::new(Some(Backing { file, path, len: 0 })),
            index: RwLock::new(HashMap::new()),
            hooks: hooks.clone(),
            hook_token: Mutex::new(None),
        });

        let weak = Arc::downgrade(&shared);
        let token = hooks.register(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                let _ = shared.close(CloseOrigin::ExitHook);
            }
        }));
        *shared.hook_token.lock() = Some(token);

        LIVE_ARCHIVES.lock().insert(id, Arc::downgrade(&shared));

        Ok(Archive { shared })
    }

    /// Process-unique identifier, encoded in synthetic URLs
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Append raw bytes to the backing file, returning their offset
    pub fn append(&self, data: &[u8]) -> Result<u64> {
        let mut guard = self.shared.backing.lock();
        let backing = guard.as_mut().ok_or(ArchiveError::Closed)?;

        let offset = backing.len;
        backing.file.seek(SeekFrom::Start(offset))?;
        backing.file.write_all(data)?;
        backing.len += data.len() as u64;
        Ok(offset)
    }

    /// Register a byte range under `name`
    ///
    /// If the name already exists the entry goes to the end of its chain.
    /// The range must lie within the bytes written so far, otherwise this
    /// fails with [`ArchiveError::EntryOutOfRange`].
    pub fn add_entry(&self, name: &str, offset: u64, size: u64) -> Result<Entry> {
        let written = self.data_len()?;
        match offset.checked_add(size) {
            Some(end) if end <= written => Ok(self.insert_entry(name, offset, size)),
            _ => Err(ArchiveError::EntryOutOfRange {
                name: name.to_string(),
                offset,
                size,
                written,
            }),
        }
    }

    /// Index a range without checking it against the backing file
    ///
    /// The writer records entries whose bytes are still staged.
    pub(crate) fn insert_entry(&self, name: &str, offset: u64, size: u64) -> Entry {
        let mut index = self.shared.index.write();

        if let Some(chain) = index.get_mut(name) {
            let entry = Entry {
                name: chain[0].name.clone(),
                index: chain.len(),
                offset,
                size,
            };
            chain.push(entry.clone());
            debug!("Chained {} #{} [{}+{}]", name, entry.index, offset, size);
            return entry;
        }

        let key: Arc<str> = Arc::from(name);
        let entry = Entry {
            name: key.clone(),
            index: 0,
            offset,
            size,
        };
        index.insert(key, vec![entry.clone()]);
        debug!("Added {} [{}+{}]", name, offset, size);
        entry
    }

    /// Head of the chain for `name`
    pub fn get_entry(&self, name: &str) -> Option<Entry> {
        self.entry_at(name, 0)
    }

    /// The `index`-th entry of the chain for `name`
    pub fn entry_at(&self, name: &str, index: usize) -> Option<Entry> {
        self.shared.index.read().get(name)?.get(index).cloned()
    }

    /// The entry following `entry` in its chain
    pub fn next_entry(&self, entry: &Entry) -> Option<Entry> {
        self.entry_at(&entry.name, entry.index + 1)
    }

    /// All entries for `name` in insertion order
    pub fn chain(&self, name: &str) -> Vec<Entry> {
        self.shared
            .index
            .read()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Distinct entry names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .index
            .read()
            .keys()
            .map(|k| k.to_string())
            .collect();
        names.sort();
        names
    }

    /// Number of distinct names
    pub fn len(&self) -> usize {
        self.shared.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries across all chains
    pub fn entry_count(&self) -> usize {
        self.shared.index.read().values().map(Vec::len).sum()
    }

    /// Bytes physically written to the backing file
    pub fn data_len(&self) -> Result<u64> {
        let guard = self.shared.backing.lock();
        Ok(guard.as_ref().ok_or(ArchiveError::Closed)?.len)
    }

    /// Read an entry's bytes in full
    ///
    /// Fails with [`ArchiveError::Truncated`] if the backing file holds
    /// fewer bytes than the entry records.
    pub fn read_entry(&self, entry: &Entry) -> Result<Vec<u8>> {
        let mut guard = self.shared.backing.lock();
        let backing = guard.as_mut().ok_or(ArchiveError::Closed)?;

        backing.file.seek(SeekFrom::Start(entry.offset))?;
        let mut buf = Vec::with_capacity(entry.size.min(MAX_PREALLOC) as usize);
        let actual = (&backing.file).take(entry.size).read_to_end(&mut buf)? as u64;

        if actual < entry.size {
            return Err(ArchiveError::Truncated {
                name: entry.name.to_string(),
                offset: entry.offset,
                expected: entry.size,
                actual,
            });
        }
        Ok(buf)
    }

    /// Read the head entry for `name`
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self.get_entry(name).ok_or_else(|| ArchiveError::EntryNotFound {
            name: name.to_string(),
            index: 0,
        })?;
        self.read_entry(&entry)
    }

    /// Open a lazily reading stream over an entry
    pub fn open_entry(&self, entry: &Entry) -> EntryReader {
        EntryReader {
            archive: self.clone(),
            entry: entry.clone(),
            pos: 0,
            mark: 0,
        }
    }

    /// Synthetic URL addressing the `index`-th entry named `name`
    pub fn make_url(&self, name: &str, index: usize) -> Result<url::Url> {
        resource_url::make_url(self.shared.id, name, index)
    }

    /// Resolve one of this archive's URLs to its entry
    pub fn resolve_url(&self, target: &url::Url) -> Result<Entry> {
        let parsed = resource_url::parse_url(target)?;
        let not_found = || ArchiveError::EntryNotFound {
            name: parsed.name.clone(),
            index: parsed.index,
        };

        if parsed.archive_id != self.shared.id {
            return Err(not_found());
        }
        self.entry_at(&parsed.name, parsed.index).ok_or_else(not_found)
    }

    /// Resolve one of this archive's URLs and open a stream over it
    pub fn open_url(&self, target: &url::Url) -> Result<EntryReader> {
        let entry = self.resolve_url(target)?;
        Ok(self.open_entry(&entry))
    }

    /// Location of the backing file while the archive is open
    pub fn path(&self) -> Option<PathBuf> {
        self.shared
            .backing
            .lock()
            .as_ref()
            .map(|b| b.path.to_path_buf())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.backing.lock().is_none()
    }

    /// Close and delete the backing file
    ///
    /// Idempotent: later calls, and the exit hook, are no-ops.
    pub fn close(&self) -> Result<()> {
        self.shared.close(CloseOrigin::Explicit)
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("id", &self.shared.id)
            .field("names", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Find a live archive by id
pub(crate) fn lookup(id: u64) -> Option<Archive> {
    // Upgrade outside the registry lock: dropping the upgraded handle may
    // close the archive, which takes the registry lock again.
    let weak = LIVE_ARCHIVES.lock().get(&id).cloned()?;
    weak.upgrade().map(|shared| Archive { shared })
}

/// Seekable stream over one entry
///
/// Every read re-seeks the shared backing file under its lock, so any
/// number of readers can be active on one archive.
#[derive(Debug)]
pub struct EntryReader {
    archive: Archive,
    entry: Entry,
    pos: u64,
    mark: u64,
}

impl EntryReader {
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Bytes left before the end of the entry
    pub fn available(&self) -> u64 {
        self.entry.size.saturating_sub(self.pos)
    }

    /// Advance by at most `n` bytes, returning the amount skipped
    pub fn skip(&mut self, n: u64) -> u64 {
        let skipped = n.min(self.available());
        self.pos += skipped;
        skipped
    }

    pub fn mark(&mut self) {
        self.mark = self.pos;
    }

    /// Rewind to the last mark (start of entry if never marked)
    pub fn reset(&mut self) {
        self.pos = self.mark;
    }
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let want = (buf.len() as u64).min(self.available()) as usize;
        if want == 0 {
            return Ok(0);
        }

        let at = self.entry.offset.checked_add(self.pos).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "entry position overflows the file offset",
            )
        })?;
        let got = self.archive.shared.read_at(at, &mut buf[..want])?;
        if got == 0 {
            return Err(ArchiveError::Truncated {
                name: self.entry.name.to_string(),
                offset: self.entry.offset,
                expected: self.entry.size,
                actual: self.pos,
            }
            .into());
        }

        self.pos += got as u64;
        Ok(got)
    }
}

impl Seek for EntryReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.entry.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };

        match target {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

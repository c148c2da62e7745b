//! # Solid Archive - Append-Only Container of Named Byte Streams
//!
//! `solid-archive` packs many named byte streams (class files, images,
//! theme resources) into a single temporary backing file and serves them
//! back by name:
//!
//! - **Staged writes**: [`ArchiveWriter`] batches small entries before
//!   appending them to the backing file
//! - **Duplicate names**: entries sharing a name form an ordered chain
//! - **Random access**: whole-entry reads or seekable [`EntryReader`] streams,
//!   safe to use from many threads
//! - **Synthetic URLs**: `solid://` URLs address any chain entry
//! - **Resource loading**: [`ArchiveLoader`] collects directories and
//!   ZIP/JAR files into an archive and answers class/resource lookups
//! - **Block buffers**: [`BlockBuffer`] accumulates bytes of unknown length
//!   with any number of independent readers
//!
//! The backing file has no header or index of its own; it is a session
//! artifact and is deleted on close, on drop, or at process exit.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use solid_archive::{ArchiveWriter, Result};
//!
//! # fn main() -> Result<()> {
//! let mut writer = ArchiveWriter::new()?;
//! writer.add_bytes("a", b"hello")?;
//! writer.add_bytes("a", b"world")?;
//! let archive = writer.finish()?;
//!
//! let head = archive.get_entry("a").unwrap();
//! assert_eq!(archive.read_entry(&head)?, b"hello");
//! let next = archive.next_entry(&head).unwrap();
//! assert_eq!(archive.read_entry(&next)?, b"world");
//!
//! archive.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Loading Resources
//!
//! ```rust,no_run
//! use solid_archive::{ArchiveBuilder, ResourceLoader, Result};
//!
//! # fn main() -> Result<()> {
//! let loader = ArchiveBuilder::new()
//!     .root("build/classes")
//!     .root("lib/theme-editor.jar")
//!     .build_loader()?;
//!
//! let class = loader.find_class("org.example.ThemeEditor")?;
//! println!("{} ({} bytes)", class.url, class.bytes.len());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod exit;
pub mod loader;
pub mod pipe;
pub mod resource_url;
pub mod writer;

pub use crate::archive::{Archive, Entry, EntryReader};
pub use crate::config::ArchiveConfig;
pub use crate::error::{ArchiveError, Result};
pub use crate::exit::{process_hooks, ExitHooks, HookRegistry, HookToken};
pub use crate::loader::{ArchiveLoader, DefinedClass, ResourceLoader};
pub use crate::pipe::{BlockBuffer, BlockReader};
pub use crate::resource_url::{open_url, SolidUrl};
pub use crate::writer::ArchiveWriter;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Builder for writers and loaders with custom settings
///
/// # Examples
///
/// ```rust,no_run
/// use solid_archive::{ArchiveBuilder, ArchiveConfig, HookRegistry};
/// use std::sync::Arc;
///
/// # fn main() -> solid_archive::Result<()> {
/// let config = ArchiveConfig::from_toml_str("staging_capacity = 8192")?;
/// let writer = ArchiveBuilder::new()
///     .config(config)
///     .exit_hooks(Arc::new(HookRegistry::new()))
///     .build_writer()?;
/// # Ok(())
/// # }
/// ```
pub struct ArchiveBuilder {
    config: ArchiveConfig,
    hooks: Option<Arc<dyn ExitHooks>>,
    parent: Option<Arc<dyn ResourceLoader>>,
    roots: Vec<PathBuf>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        ArchiveBuilder {
            config: ArchiveConfig::default(),
            hooks: None,
            parent: None,
            roots: Vec::new(),
        }
    }

    pub fn config(mut self, config: ArchiveConfig) -> Self {
        self.config = config;
        self
    }

    /// Load settings from a TOML file
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        self.config = ArchiveConfig::load(path)?;
        Ok(self)
    }

    /// Put backing files in `dir` instead of the system temp dir
    pub fn temp_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn staging_capacity(mut self, capacity: usize) -> Self {
        self.config.staging_capacity = capacity;
        self
    }

    /// Use a custom exit hook registry (defaults to the process registry)
    pub fn exit_hooks(mut self, hooks: Arc<dyn ExitHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Parent consulted first by [`ResourceLoader::find_resources`]
    pub fn parent(mut self, parent: Arc<dyn ResourceLoader>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Add a directory or ZIP/JAR root for [`ArchiveBuilder::build_loader`]
    pub fn root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.roots.push(root.into());
        self
    }

    fn hooks(&self) -> Arc<dyn ExitHooks> {
        self.hooks.clone().unwrap_or_else(process_hooks)
    }

    pub fn build_writer(self) -> Result<ArchiveWriter> {
        debug!("Building writer with {:?}", self.config);
        ArchiveWriter::with_config(&self.config, self.hooks())
    }

    pub fn build_loader(self) -> Result<ArchiveLoader> {
        debug!("Building loader over {} roots", self.roots.len());
        let hooks = self.hooks();
        ArchiveLoader::create_with(self.parent, self.roots.as_slice(), &self.config, hooks)
    }

    /// A block buffer using the configured block size
    pub fn build_buffer(&self) -> Result<BlockBuffer> {
        BlockBuffer::with_block_size(self.config.block_size)
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

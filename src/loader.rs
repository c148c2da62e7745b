//! Archive-backed class and resource loader
//!
//! [`ArchiveLoader`] packs a set of roots (directories and ZIP/JAR files)
//! into one [`Archive`] and answers class and resource lookups from it.
//! Roots are collected in order, so when two roots provide the same name
//! both copies are kept as a chain: lookups return the first, while
//! [`ResourceLoader::find_resources`] returns all of them.

use crate::archive::{Archive, EntryReader};
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, Result};
use crate::exit::ExitHooks;
use crate::writer::ArchiveWriter;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;
use walkdir::WalkDir;

/// Class bytes located by a loader, ready for definition by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedClass {
    /// Dotted binary name, e.g. `org.example.Theme$Inner`
    pub binary_name: String,
    /// Resource path the bytes came from, e.g. `org/example/Theme$Inner.class`
    pub resource_name: String,
    pub url: Url,
    pub bytes: Vec<u8>,
}

/// Class and resource lookup contract shared by chained loaders
pub trait ResourceLoader: Send + Sync {
    fn find_class(&self, binary_name: &str) -> Result<DefinedClass>;

    fn find_resource(&self, name: &str) -> Option<Url>;

    fn find_resources(&self, name: &str) -> Vec<Url>;
}

/// Resource path of the class file for a binary name
pub fn class_resource_name(binary_name: &str) -> String {
    format!("{}.class", binary_name.replace('.', "/"))
}

pub struct ArchiveLoader {
    parent: Option<Arc<dyn ResourceLoader>>,
    archive: Archive,
    roots: Vec<PathBuf>,
}

impl ArchiveLoader {
    /// Collect `roots` into a new archive using default settings
    pub fn create<P: AsRef<Path>>(
        parent: Option<Arc<dyn ResourceLoader>>,
        roots: &[P],
    ) -> Result<Self> {
        Self::create_with(
            parent,
            roots,
            &ArchiveConfig::default(),
            crate::exit::process_hooks(),
        )
    }

    /// Collect `roots` into a new archive
    ///
    /// A root that cannot be read is logged and skipped; the loader still
    /// serves whatever the other roots contributed.
    pub fn create_with<P: AsRef<Path>>(
        parent: Option<Arc<dyn ResourceLoader>>,
        roots: &[P],
        config: &ArchiveConfig,
        hooks: Arc<dyn ExitHooks>,
    ) -> Result<Self> {
        let mut writer = ArchiveWriter::with_config(config, hooks)?;

        for root in roots {
            let root = root.as_ref();
            match collect_root(&mut writer, root) {
                Ok(count) => debug!("Collected {} entries from {:?}", count, root),
                Err(e) => warn!("Skipping root {:?}: {}", root, e),
            }
        }

        let archive = writer.finish()?;
        info!(
            "Loader ready: {} roots, {} names, {} entries",
            roots.len(),
            archive.len(),
            archive.entry_count()
        );

        Ok(ArchiveLoader {
            parent,
            archive,
            roots: roots.iter().map(|r| r.as_ref().to_path_buf()).collect(),
        })
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Bytes of the first resource named `name`
    pub fn load_resource(&self, name: &str) -> Result<Vec<u8>> {
        self.archive.read(name)
    }

    /// Stream over the first resource named `name`
    pub fn open_resource(&self, name: &str) -> Result<EntryReader> {
        let entry = self
            .archive
            .get_entry(name)
            .ok_or_else(|| ArchiveError::EntryNotFound {
                name: name.to_string(),
                index: 0,
            })?;
        Ok(self.archive.open_entry(&entry))
    }

    pub fn close(&self) -> Result<()> {
        self.archive.close()
    }
}

impl ResourceLoader for ArchiveLoader {
    fn find_class(&self, binary_name: &str) -> Result<DefinedClass> {
        let resource_name = class_resource_name(binary_name);
        let not_found = || ArchiveError::ClassNotFound(binary_name.to_string());

        let entry = self.archive.get_entry(&resource_name).ok_or_else(not_found)?;
        let bytes = self.archive.read_entry(&entry).map_err(|e| {
            warn!("Reading class {} failed: {}", binary_name, e);
            not_found()
        })?;
        let url = self
            .archive
            .make_url(&resource_name, 0)
            .map_err(|_| not_found())?;

        debug!("Found class {} ({} bytes)", binary_name, bytes.len());
        Ok(DefinedClass {
            binary_name: binary_name.to_string(),
            resource_name,
            url,
            bytes,
        })
    }

    fn find_resource(&self, name: &str) -> Option<Url> {
        self.archive.get_entry(name)?;
        self.archive.make_url(name, 0).ok()
    }

    fn find_resources(&self, name: &str) -> Vec<Url> {
        let mut urls = match &self.parent {
            Some(parent) => parent.find_resources(name),
            None => Vec::new(),
        };

        for entry in self.archive.chain(name) {
            match self.archive.make_url(name, entry.index()) {
                Ok(url) => urls.push(url),
                Err(e) => warn!("No URL for {} #{}: {}", name, entry.index(), e),
            }
        }
        urls
    }
}

impl std::fmt::Debug for ArchiveLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveLoader")
            .field("archive", &self.archive)
            .field("roots", &self.roots)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

fn collect_root(writer: &mut ArchiveWriter, root: &Path) -> Result<usize> {
    if root.is_dir() {
        collect_directory(writer, root)
    } else if root.is_file() {
        collect_zip(writer, root)
    } else {
        Err(ArchiveError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{:?} is neither a directory nor a file", root),
        )))
    }
}

fn collect_directory(writer: &mut ArchiveWriter, root: &Path) -> Result<usize> {
    let mut count = 0;
    for item in WalkDir::new(root).sort_by_file_name() {
        let item = item?;
        if !item.file_type().is_file() {
            continue;
        }

        let relative = item.path().strip_prefix(root).map_err(|_| {
            ArchiveError::InvalidConfig(format!("{:?} escapes root {:?}", item.path(), root))
        })?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let file = File::open(item.path())?;
        writer.add_reader(&name, BufReader::new(file))?;
        count += 1;
    }
    Ok(count)
}

fn collect_zip(writer: &mut ArchiveWriter, path: &Path) -> Result<usize> {
    let mut zip = zip::ZipArchive::new(BufReader::new(File::open(path)?))?;
    let mut count = 0;

    for i in 0..zip.len() {
        let file = zip.by_index(i)?;
        if file.is_dir() {
            continue;
        }

        let name = file.name().to_string();
        writer.add_reader(&name, file)?;
        count += 1;
    }
    Ok(count)
}

//! Synthetic `solid://` resource URLs
//!
//! `solid://archive-<id>:<index>/<name>` addresses the `index`-th entry of
//! the chain for `name` inside the live archive with id `<id>`. The port
//! field carries the chain index, so only the first 65536 entries of a chain
//! are addressable. The archive id is only meaningful inside the process
//! that created the archive.

use crate::archive::{self, EntryReader};
use crate::error::{ArchiveError, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

pub const SCHEME: &str = "solid";

const HOST_PREFIX: &str = "archive-";

/// Characters escaped in entry names (slashes are kept as path separators)
const NAME_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Decoded parts of a synthetic URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolidUrl {
    pub archive_id: u64,
    pub index: usize,
    pub name: String,
}

/// Build the URL for chain entry `index` of `name` in archive `archive_id`
pub fn make_url(archive_id: u64, name: &str, index: usize) -> Result<Url> {
    let port = u16::try_from(index).map_err(|_| ArchiveError::ChainIndexOverflow(index))?;

    let base = format!("{}://{}{}:{}/", SCHEME, HOST_PREFIX, archive_id, port);
    let mut url = Url::parse(&base).map_err(|e| ArchiveError::InvalidUrl(e.to_string()))?;
    url.set_path(&format!("/{}", utf8_percent_encode(name, NAME_ESCAPES)));

    // Dot segments are normalised away by URL parsing and cannot round-trip
    if parse_url(&url)?.name != name {
        return Err(ArchiveError::InvalidUrl(format!(
            "entry name '{}' cannot be represented in a URL path",
            name
        )));
    }
    Ok(url)
}

/// Split a synthetic URL into archive id, chain index and entry name
pub fn parse_url(url: &Url) -> Result<SolidUrl> {
    if url.scheme() != SCHEME {
        return Err(ArchiveError::InvalidUrl(format!(
            "unexpected scheme '{}' in {}",
            url.scheme(),
            url
        )));
    }

    let archive_id = url
        .host_str()
        .and_then(|host| host.strip_prefix(HOST_PREFIX))
        .and_then(|id| id.parse::<u64>().ok())
        .ok_or_else(|| ArchiveError::InvalidUrl(format!("no archive id in {}", url)))?;

    let path = url.path().strip_prefix('/').unwrap_or(url.path());
    let name = percent_decode_str(path)
        .decode_utf8()
        .map_err(|e| ArchiveError::InvalidUrl(format!("{}: {}", url, e)))?
        .into_owned();

    Ok(SolidUrl {
        archive_id,
        index: url.port().map(usize::from).unwrap_or(0),
        name,
    })
}

/// Resolve a synthetic URL against the live archives of this process
///
/// Fails with [`ArchiveError::EntryNotFound`] when the archive is closed or
/// foreign, or its chain is too short.
pub fn open_url(url: &Url) -> Result<EntryReader> {
    let parsed = parse_url(url)?;
    match archive::lookup(parsed.archive_id) {
        Some(archive) => archive.open_url(url),
        None => Err(ArchiveError::EntryNotFound {
            name: parsed.name,
            index: parsed.index,
        }),
    }
}

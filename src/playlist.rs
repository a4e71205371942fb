//! Playlist files embedded in the music library.
//!
//! Two dialects are understood: `.m3u` (one entry per line, `#` comments) and
//! `.pls` (`File<N>=<entry>` keys). Entries are resolved against the
//! playlist's own directory; anything that is neither a file inside that
//! directory tree nor a URL is dropped.

use crate::error::PlaylistError;
use crate::track::Track;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    M3u,
    Pls,
}

impl Dialect {
    /// Dialect for a file name, by case-sensitive extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "m3u" => Some(Dialect::M3u),
            "pls" => Some(Dialect::Pls),
            _ => None,
        }
    }
}

/// One raw entry of a playlist, before it is resolved to a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub dialect: Dialect,
    pub value: String,
    /// The `N` of `File<N>=`, for `.pls` entries.
    pub index: Option<u64>,
}

/// Parse playlist text into entries, in file order.
pub fn parse_entries(dialect: Dialect, text: &str) -> Vec<PlaylistEntry> {
    match dialect {
        Dialect::M3u => text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
            .map(|l| PlaylistEntry {
                dialect,
                value: l.to_string(),
                index: None,
            })
            .collect(),
        Dialect::Pls => text
            .lines()
            .filter_map(parse_pls_line)
            .map(|(index, value)| PlaylistEntry {
                dialect,
                value,
                index: Some(index),
            })
            .collect(),
    }
}

/// Match `File<N>=<value>`, tolerating blanks around the key and the `=`.
fn parse_pls_line(line: &str) -> Option<(u64, String)> {
    let rest = line.trim_start().strip_prefix("File")?;
    let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let index = rest[..digits_end].parse().ok()?;
    let value = rest[digits_end..].trim_start().strip_prefix('=')?;
    let value = value.trim_end_matches('\r').trim();
    if value.is_empty() {
        return None;
    }
    Some((index, value.to_string()))
}

/// Resolve one entry against the playlist directory.
///
/// A file that exists inside `dir` wins; otherwise a parseable URL with a
/// scheme separator becomes a stream; otherwise the entry is dropped.
pub fn resolve_entry(entry: &PlaylistEntry, dir: &Path) -> Option<Track> {
    let value = entry.value.as_str();
    if let Some(path) = join_contained(dir, value) {
        if path.is_file() {
            return Some(Track::local(path));
        }
    }
    if value.contains("://") && is_stream_url(value) {
        return Some(Track::remote(value));
    }
    debug!("dropping playlist entry '{}' ({:?})", value, entry.dialect);
    None
}

/// A URL naming something: a host or a path, not just a scheme.
fn is_stream_url(value: &str) -> bool {
    match url::Url::parse(value) {
        Ok(url) => {
            url.host_str().is_some_and(|h| !h.is_empty()) || !matches!(url.path(), "" | "/")
        }
        Err(_) => false,
    }
}

/// Join `entry` under `dir`, refusing absolute paths and `..` escapes.
fn join_contained(dir: &Path, entry: &str) -> Option<PathBuf> {
    let mut rel = PathBuf::new();
    for component in Path::new(entry).components() {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !rel.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if rel.as_os_str().is_empty() {
        return None;
    }
    Some(dir.join(rel))
}

/// Read and resolve a playlist file.
pub fn read_playlist(path: &Path) -> Result<Vec<Track>, PlaylistError> {
    let dialect =
        Dialect::from_path(path).ok_or_else(|| PlaylistError::UnknownDialect(path.to_path_buf()))?;
    let bytes = fs::read(path).map_err(|e| PlaylistError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let text = String::from_utf8_lossy(&bytes);
    let entries = parse_entries(dialect, &text);

    if dialect == Dialect::Pls && !indices_strictly_increasing(&entries) {
        warn!(
            "playlist '{}' has out-of-order or duplicate File<N> indices; keeping file order",
            path.display()
        );
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(entries
        .iter()
        .filter_map(|entry| resolve_entry(entry, dir))
        .collect())
}

/// Read a playlist, treating any failure as an empty playlist.
pub fn resolve(path: &Path) -> Vec<Track> {
    match read_playlist(path) {
        Ok(tracks) => tracks,
        Err(e) => {
            warn!("{e}; playlist contributes no tracks");
            Vec::new()
        }
    }
}

fn indices_strictly_increasing(entries: &[PlaylistEntry]) -> bool {
    entries
        .windows(2)
        .all(|pair| match (pair[0].index, pair[1].index) {
            (Some(a), Some(b)) => a < b,
            _ => true,
        })
}

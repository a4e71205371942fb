//! Music library scanning.
//!
//! Walks the music directory in a fixed order: within each directory the
//! entries are sorted by name (files and subdirectories together) and visited
//! in that order, so two scans of the same tree always give the same list.

use crate::error::ScanError;
use crate::playlist::{self, Dialect};
use crate::track::{Track, TrackList};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Audio container extensions handed straight to the transcoder.
pub const AUDIO_EXTENSIONS: &[&str] = &["aac", "mp3", "wav", "flac", "m4a", "ogg"];

/// What a single library file contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Audio,
    Playlist(Dialect),
    Other,
}

/// Classify a file by its (case-sensitive) extension.
pub fn classify(path: &Path) -> FileKind {
    if let Some(dialect) = Dialect::from_path(path) {
        return FileKind::Playlist(dialect);
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if AUDIO_EXTENSIONS.contains(&ext) => FileKind::Audio,
        _ => FileKind::Other,
    }
}

/// Scanner state for one walk. Remembers what it has already visited so a
/// directory or playlist reached twice (through symlinks) is used once.
#[derive(Debug, Default)]
pub struct LibraryScanner {
    visited_dirs: HashSet<PathBuf>,
    expanded_playlists: HashSet<PathBuf>,
}

impl LibraryScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `music_dir` into an ordered track list.
    pub fn scan(mut self, music_dir: &Path) -> Result<TrackList, ScanError> {
        let entries = sorted_entries(music_dir).map_err(|e| ScanError::Root {
            path: music_dir.to_path_buf(),
            source: e,
        })?;
        self.visited_dirs.insert(canonical(music_dir));

        let mut tracks = TrackList::default();
        self.walk_entries(entries, &mut tracks);
        info!(
            "Scanned {}: {} track(s)",
            music_dir.display(),
            tracks.len()
        );
        Ok(tracks)
    }

    fn walk_dir(&mut self, dir: &Path, tracks: &mut TrackList) {
        if !self.visited_dirs.insert(canonical(dir)) {
            debug!("already visited {}, skipping", dir.display());
            return;
        }
        match sorted_entries(dir) {
            Ok(entries) => self.walk_entries(entries, tracks),
            Err(e) => warn!("cannot read directory {}: {}", dir.display(), e),
        }
    }

    fn walk_entries(&mut self, entries: Vec<PathBuf>, tracks: &mut TrackList) {
        for path in entries {
            // Follows symlinks, so a linked directory is walked like a real one.
            if path.is_dir() {
                self.walk_dir(&path, tracks);
                continue;
            }
            match classify(&path) {
                FileKind::Audio => tracks.push(Track::local(path)),
                FileKind::Playlist(_) => {
                    if self.expanded_playlists.insert(canonical(&path)) {
                        tracks.extend(playlist::resolve(&path));
                    } else {
                        debug!("playlist {} already expanded", path.display());
                    }
                }
                FileKind::Other => {}
            }
        }
    }
}

/// Convenience wrapper for a one-off scan.
pub fn scan(music_dir: &Path) -> Result<TrackList, ScanError> {
    LibraryScanner::new().scan(music_dir)
}

/// Children of `dir`, sorted by file name.
fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(entries)
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

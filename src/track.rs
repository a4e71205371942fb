use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// One playable unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Track {
    LocalFile { path: PathBuf },
    RemoteStream { url: String },
}

impl Track {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Track::LocalFile { path: path.into() }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Track::RemoteStream { url: url.into() }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Track::RemoteStream { .. })
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Track::LocalFile { path } => Some(path.as_path()),
            Track::RemoteStream { .. } => None,
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Track::LocalFile { path } => write!(f, "{}", path.display()),
            Track::RemoteStream { url } => write!(f, "{url}"),
        }
    }
}

/// Tracks in playback order.
///
/// The order is the scan order and never changes; shuffling produces a
/// permuted copy for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TrackList {
    tracks: Vec<Track>,
}

impl TrackList {
    pub fn new(tracks: Vec<Track>) -> Self {
        TrackList { tracks }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn as_slice(&self) -> &[Track] {
        &self.tracks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Track> {
        self.tracks.iter()
    }

    pub fn push(&mut self, track: Track) {
        self.tracks.push(track);
    }

    pub fn extend(&mut self, tracks: impl IntoIterator<Item = Track>) {
        self.tracks.extend(tracks);
    }

    /// A random permutation of the list for a single pass.
    pub fn shuffled(&self, rng: &mut fastrand::Rng) -> Vec<Track> {
        let mut order = self.tracks.clone();
        rng.shuffle(&mut order);
        order
    }
}

impl From<Vec<Track>> for TrackList {
    fn from(tracks: Vec<Track>) -> Self {
        TrackList::new(tracks)
    }
}

impl<'a> IntoIterator for &'a TrackList {
    type Item = &'a Track;
    type IntoIter = std::slice::Iter<'a, Track>;

    fn into_iter(self) -> Self::IntoIter {
        self.tracks.iter()
    }
}

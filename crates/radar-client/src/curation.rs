//! Curation pipeline: pure transforms over a track list.
//!
//! Nothing here mutates its input or keeps state between calls; each
//! function returns a fresh list for the ResultStore to swap in.

use std::collections::{HashMap, HashSet};

use radar_proto::protocol::Track;
use radar_proto::settings::FilterSettings;

/// Minimum cluster size for a run of tracks to count as an album.
pub const DEFAULT_ALBUM_THRESHOLD: usize = 4;

/// Grouping key: first credited artist + album name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlbumKey {
    pub artist: String,
    pub album: String,
}

impl AlbumKey {
    pub fn of(track: &Track) -> Self {
        Self {
            artist: track.primary_artist().to_string(),
            album: track.album.name.clone(),
        }
    }
}

impl std::fmt::Display for AlbumKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}", self.artist, self.album)
    }
}

/// A detected album.  Exists only while an organize operation is pending.
#[derive(Debug, Clone, PartialEq)]
pub struct AlbumGroup {
    pub key: AlbumKey,
    pub tracks: Vec<Track>,
    /// Unselected albums are dropped when the organization is applied.
    pub selected: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// In order of first appearance.
    pub albums: Vec<AlbumGroup>,
    /// Everything not in an album, in input order.
    pub singles: Vec<Track>,
}

impl Detection {
    /// No album reached the threshold; organizing would change nothing.
    pub fn is_noop(&self) -> bool {
        self.albums.is_empty()
    }

    /// Tracks that applying this detection would discard.
    pub fn dropped_tracks(&self) -> impl Iterator<Item = &Track> {
        self.albums
            .iter()
            .filter(|a| !a.selected)
            .flat_map(|a| a.tracks.iter())
    }

    pub fn unselected_albums(&self) -> impl Iterator<Item = &AlbumGroup> {
        self.albums.iter().filter(|a| !a.selected)
    }

    /// What applying would throw away, or `None` when nothing is dropped and
    /// no confirmation is needed.
    pub fn removal_plan(&self) -> Option<RemovalPlan> {
        let albums: Vec<AlbumKey> = self.unselected_albums().map(|a| a.key.clone()).collect();
        if albums.is_empty() {
            return None;
        }
        Some(RemovalPlan {
            albums,
            track_count: self.dropped_tracks().count(),
        })
    }

    pub fn set_selected(&mut self, key: &AlbumKey, selected: bool) -> bool {
        match self.albums.iter_mut().find(|a| a.key == *key) {
            Some(album) => {
                album.selected = selected;
                true
            }
            None => false,
        }
    }
}

/// The destructive half of an organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalPlan {
    pub albums: Vec<AlbumKey>,
    pub track_count: usize,
}

impl std::fmt::Display for RemovalPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Remove {} track(s) from {} album(s)",
            self.track_count,
            self.albums.len()
        )?;
        for key in &self.albums {
            write!(f, "\n  - {key}")?;
        }
        Ok(())
    }
}

/// Case-insensitive substring match on the track name or any artist name.
/// A blank term keeps everything.
pub fn filter_by_search(tracks: &[Track], term: &str) -> Vec<Track> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return tracks.to_vec();
    }
    tracks
        .iter()
        .filter(|t| {
            t.name.to_lowercase().contains(&term)
                || t.artist_names().any(|a| a.to_lowercase().contains(&term))
        })
        .cloned()
        .collect()
}

/// Split `tracks` into albums (groups of at least `threshold` tracks sharing
/// first artist and album name) and singles.
///
/// Album members are ordered by track number; members without one follow the
/// numbered ones in order of appearance.  The sort is stable.
pub fn detect_albums(tracks: &[Track], threshold: usize) -> Detection {
    let threshold = threshold.max(1);

    let mut order: Vec<AlbumKey> = Vec::new();
    let mut members: HashMap<AlbumKey, Vec<usize>> = HashMap::new();
    for (idx, track) in tracks.iter().enumerate() {
        let key = AlbumKey::of(track);
        members
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(idx);
    }

    let mut in_album: HashSet<usize> = HashSet::new();
    let mut albums = Vec::new();
    for key in order {
        let idxs = &members[&key];
        if idxs.len() < threshold {
            continue;
        }
        in_album.extend(idxs.iter().copied());
        let mut group: Vec<Track> = idxs.iter().map(|&i| tracks[i].clone()).collect();
        group.sort_by_key(|t| t.track_number.unwrap_or(u32::MAX));
        albums.push(AlbumGroup {
            key,
            tracks: group,
            selected: true,
        });
    }

    let singles = tracks
        .iter()
        .enumerate()
        .filter(|(i, _)| !in_album.contains(i))
        .map(|(_, t)| t.clone())
        .collect();

    Detection { albums, singles }
}

/// `singles` followed by every selected album, in detection order.
/// Unselected albums are left out entirely.
pub fn apply_album_organization(singles: &[Track], albums: &[AlbumGroup]) -> Vec<Track> {
    let mut out = singles.to_vec();
    for album in albums.iter().filter(|a| a.selected) {
        out.extend(album.tracks.iter().cloned());
    }
    out
}

/// Re-apply the scan filters locally: duration window, forbidden keywords in
/// the track name, excluded artists (name or id of any credited artist).
pub fn refine(tracks: &[Track], settings: &FilterSettings) -> Vec<Track> {
    let min_ms = u64::from(settings.min_duration_sec) * 1000;
    let max_ms = u64::from(settings.max_duration_sec) * 1000;
    let excluded: Vec<String> = settings
        .excluded_artists
        .iter()
        .map(|a| a.to_lowercase())
        .collect();

    tracks
        .iter()
        .filter(|t| t.duration_ms >= min_ms && t.duration_ms <= max_ms)
        .filter(|t| {
            let name = t.name.to_lowercase();
            !settings
                .forbidden_keywords
                .iter()
                .any(|k| name.contains(k.as_str()))
        })
        .filter(|t| {
            !t.artists.iter().any(|a| {
                excluded
                    .iter()
                    .any(|x| *x == a.name.to_lowercase() || *x == a.id.to_lowercase())
            })
        })
        .cloned()
        .collect()
}

fn normalized_key(track: &Track) -> (String, Vec<String>) {
    let name = track.name.trim().to_lowercase();
    let artists = track
        .artists
        .iter()
        .take(2)
        .map(|a| a.name.trim().to_lowercase())
        .collect();
    (name, artists)
}

/// Where the same song (name + first two artists) appears both explicit and
/// clean, keep only the explicit versions.  Input order is preserved.
pub fn prefer_explicit(tracks: &[Track]) -> Vec<Track> {
    let has_explicit: HashSet<(String, Vec<String>)> = tracks
        .iter()
        .filter(|t| t.explicit)
        .map(normalized_key)
        .collect();
    tracks
        .iter()
        .filter(|t| t.explicit || !has_explicit.contains(&normalized_key(t)))
        .cloned()
        .collect()
}

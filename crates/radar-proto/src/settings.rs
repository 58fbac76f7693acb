//! Filter and scan preferences persisted by the local settings store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Release types the scanner can include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlbumType {
    Album,
    Single,
    Compilation,
    AppearsOn,
}

impl AlbumType {
    pub const ALL: [AlbumType; 4] = [
        AlbumType::Album,
        AlbumType::Single,
        AlbumType::Compilation,
        AlbumType::AppearsOn,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Album => "album",
            Self::Single => "single",
            Self::Compilation => "compilation",
            Self::AppearsOn => "appears_on",
        }
    }
}

impl std::str::FromStr for AlbumType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.label() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown album type: {s}"))
    }
}

/// Keywords the scanner drops by default.  Matched as lowercase substrings of
/// the track name, so surrounding spaces are significant.
pub const DEFAULT_FORBIDDEN_KEYWORDS: &[&str] = &[
    " live ",
    "session",
    "לייב",
    "קאבר",
    "a capella",
    "acapella",
    "fsoe",
    "techno",
    "extended",
    "sped up",
    "speed up",
    "intro",
    "slow",
    "remaster",
    "instrumental",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub min_duration_sec: u32,
    pub max_duration_sec: u32,
    /// Lowercase, deduplicated, in insertion order.
    pub forbidden_keywords: Vec<String>,
    /// Artist names or ids, deduplicated, in insertion order.
    pub excluded_artists: Vec<String>,
    pub album_types: BTreeSet<AlbumType>,
    pub include_followed: bool,
    pub include_liked: bool,
    pub min_liked_songs: u32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            min_duration_sec: 90,
            max_duration_sec: 270,
            forbidden_keywords: DEFAULT_FORBIDDEN_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            excluded_artists: Vec::new(),
            album_types: [AlbumType::Album, AlbumType::Single].into_iter().collect(),
            include_followed: true,
            include_liked: false,
            min_liked_songs: 1,
        }
    }
}

/// Why a settings record can't be used for a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsIssue {
    DurationRange { min: u32, max: u32 },
    MinLikedSongs,
}

impl std::fmt::Display for SettingsIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DurationRange { min, max } => write!(
                f,
                "minimum duration ({min}s) must not exceed maximum duration ({max}s)"
            ),
            Self::MinLikedSongs => f.write_str("minimum liked songs must be at least 1"),
        }
    }
}

impl FilterSettings {
    /// Local invariants.  Whether at least one artist source is enabled is
    /// left to the server, which rejects such a scan itself.
    pub fn validate(&self) -> Result<(), SettingsIssue> {
        if self.min_duration_sec > self.max_duration_sec {
            return Err(SettingsIssue::DurationRange {
                min: self.min_duration_sec,
                max: self.max_duration_sec,
            });
        }
        if self.min_liked_songs == 0 {
            return Err(SettingsIssue::MinLikedSongs);
        }
        Ok(())
    }

    pub fn has_source(&self) -> bool {
        self.include_followed || self.include_liked
    }

    /// Lowercase and deduplicate list fields, keeping first occurrences.
    pub fn normalized(mut self) -> Self {
        self.forbidden_keywords = dedup_ordered(
            self.forbidden_keywords
                .into_iter()
                .map(|k| k.to_lowercase()),
        );
        self.excluded_artists = dedup_ordered(
            self.excluded_artists
                .into_iter()
                .map(|a| a.trim().to_string()),
        );
        self
    }

    pub fn add_keyword(&mut self, keyword: &str) {
        let keyword = keyword.to_lowercase();
        if !keyword.trim().is_empty() && !self.forbidden_keywords.contains(&keyword) {
            self.forbidden_keywords.push(keyword);
        }
    }

    pub fn remove_keyword(&mut self, keyword: &str) {
        let keyword = keyword.to_lowercase();
        self.forbidden_keywords.retain(|k| *k != keyword);
    }

    pub fn exclude_artist(&mut self, artist: &str) {
        let artist = artist.trim();
        if !artist.is_empty() && !self.excluded_artists.iter().any(|a| a == artist) {
            self.excluded_artists.push(artist.to_string());
        }
    }
}

fn dedup_ordered(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if item.trim().is_empty() || out.contains(&item) {
            continue;
        }
        out.push(item);
    }
    out
}

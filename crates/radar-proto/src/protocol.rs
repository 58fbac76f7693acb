//! Wire types for the remote scan-job API.
//!
//! Everything here mirrors what the scan service sends or accepts.  Types are
//! plain data: the client never mutates provider-owned fields, it only derives
//! local state from them.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::settings::{AlbumType, FilterSettings};

/// Symbolic date sent in automation snapshots; the server resolves it at run time.
pub const DYNAMIC_DATE: &str = "dynamic";

// ── Tracks ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub name: String,
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Image {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AlbumRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub release_date: String,
}

/// One track from the scan results.  Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    #[serde(default)]
    pub album: AlbumRef,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub explicit: bool,
    /// Position within its album, when the provider reported one.
    #[serde(default)]
    pub track_number: Option<u32>,
}

impl Track {
    /// First credited artist's name, or "" for artist-less tracks.
    pub fn primary_artist(&self) -> &str {
        self.artists.first().map(|a| a.name.as_str()).unwrap_or("")
    }

    pub fn artist_names(&self) -> impl Iterator<Item = &str> {
        self.artists.iter().map(|a| a.name.as_str())
    }

    pub fn cover_url(&self) -> Option<&str> {
        self.album.images.first().map(|i| i.url.as_str())
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_ms / 1000
    }

    /// `m:ss`, the way the dashboard prints durations.
    pub fn duration_label(&self) -> String {
        let secs = self.duration_secs();
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

// ── Scan status ───────────────────────────────────────────────────────────────

/// Local projection of the remote job phase.
///
/// Transitions:
///   Idle -> FetchingArtists -> Scanning <-> RateLimited -> Completed | Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    #[default]
    Idle,
    FetchingArtists,
    Scanning,
    RateLimited,
    Completed,
    Error,
}

impl ScanPhase {
    /// Map a raw remote status string onto the local state machine.
    pub fn from_remote(status: &str, running: bool) -> Self {
        match status {
            "idle" => Self::Idle,
            "initializing" | "fetching_artists" | "fetching_liked" => Self::FetchingArtists,
            "scanning" | "stopping" => Self::Scanning,
            "rate_limited" => Self::RateLimited,
            "completed" => Self::Completed,
            "error" => Self::Error,
            _ if running => Self::Scanning,
            _ => Self::Idle,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FetchingArtists => "fetching_artists",
            Self::Scanning => "scanning",
            Self::RateLimited => "rate_limited",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Phases from which a stop request is accepted.
    pub fn is_stoppable(&self) -> bool {
        matches!(self, Self::FetchingArtists | Self::Scanning)
    }
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// `GET status` body as the server sends it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawScanStatus {
    #[serde(default)]
    is_running: bool,
    #[serde(default)]
    status: String,
    #[serde(default)]
    progress: u64,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    current_artist: Option<String>,
    #[serde(default)]
    results_count: u64,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    retry_after: Option<i64>,
    #[serde(default, alias = "recent_logs")]
    logs: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "RawScanStatus", into = "RawScanStatus")]
pub struct ScanStatus {
    pub running: bool,
    pub phase: ScanPhase,
    pub progress: u64,
    pub total: u64,
    pub current_artist: String,
    pub result_count: u64,
    pub error: Option<String>,
    /// Advisory only; never used to schedule anything.
    pub retry_after_secs: Option<u64>,
    /// Oldest first, as received.
    pub recent_logs: Vec<String>,
}

impl From<RawScanStatus> for ScanStatus {
    fn from(raw: RawScanStatus) -> Self {
        Self {
            running: raw.is_running,
            phase: ScanPhase::from_remote(&raw.status, raw.is_running),
            progress: raw.progress,
            total: raw.total,
            current_artist: raw.current_artist.unwrap_or_default(),
            result_count: raw.results_count,
            error: raw.error.filter(|e| !e.is_empty()),
            retry_after_secs: raw.retry_after.and_then(|s| u64::try_from(s).ok()),
            recent_logs: raw.logs.unwrap_or_default(),
        }
    }
}

impl From<ScanStatus> for RawScanStatus {
    fn from(status: ScanStatus) -> Self {
        Self {
            is_running: status.running,
            status: status.phase.label().to_string(),
            progress: status.progress,
            total: status.total,
            current_artist: Some(status.current_artist),
            results_count: status.result_count,
            error: status.error,
            retry_after: status.retry_after_secs.and_then(|s| i64::try_from(s).ok()),
            logs: Some(status.recent_logs),
        }
    }
}

impl ScanStatus {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.progress as f64 / self.total as f64 * 100.0).min(100.0)
    }

    /// Up to `limit` recent log lines, most recent first.
    pub fn log_tail(&self, limit: usize) -> Vec<&str> {
        self.recent_logs
            .iter()
            .rev()
            .take(limit)
            .map(String::as_str)
            .collect()
    }
}

// ── Scan requests ─────────────────────────────────────────────────────────────

/// Release-date window for a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateWindow {
    LastDays(u32),
    Custom { start: NaiveDate, end: NaiveDate },
    /// Resolved by the server when an automated run fires.
    Dynamic,
}

impl Default for DateWindow {
    fn default() -> Self {
        Self::LastDays(7)
    }
}

impl DateWindow {
    /// Concrete dates relative to `today`, or `None` for `Dynamic`.
    ///
    /// A `LastDays` window reaching past the calendar's first date is
    /// clamped to it; `validate()` rejects such windows up front.
    pub fn dates(&self, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            Self::LastDays(days) => Some((
                today
                    .checked_sub_days(Days::new(u64::from(*days)))
                    .unwrap_or(NaiveDate::MIN),
                today,
            )),
            Self::Custom { start, end } => Some((*start, *end)),
            Self::Dynamic => None,
        }
    }

    /// Checks the window can be scanned: the range resolves to real dates
    /// and does not end before it starts.
    pub fn validate(&self, today: NaiveDate) -> Result<(), String> {
        match self {
            Self::LastDays(days) => {
                if today.checked_sub_days(Days::new(u64::from(*days))).is_none() {
                    return Err(format!("a {days}-day window reaches past the calendar"));
                }
                Ok(())
            }
            Self::Custom { start, end } if start > end => {
                Err(format!("start date {start} is after end date {end}"))
            }
            Self::Custom { .. } | Self::Dynamic => Ok(()),
        }
    }

    fn wire_dates(&self, today: NaiveDate) -> (String, String) {
        match self.dates(today) {
            Some((start, end)) => (start.to_string(), end.to_string()),
            None => (DYNAMIC_DATE.to_string(), DYNAMIC_DATE.to_string()),
        }
    }
}

/// `POST start` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParams {
    pub start_date: String,
    pub end_date: String,
    pub include_followed: bool,
    pub include_liked_songs: bool,
    pub min_liked_songs: u32,
    pub album_types: Vec<AlbumType>,
    #[serde(default)]
    pub refresh_artists: bool,
    pub min_duration_sec: u32,
    pub max_duration_sec: u32,
    #[serde(default)]
    pub forbidden_keywords: Vec<String>,
    #[serde(default)]
    pub exclude_artists: Vec<String>,
}

impl ScanParams {
    pub fn new(
        settings: &FilterSettings,
        window: &DateWindow,
        today: NaiveDate,
        refresh_artists: bool,
    ) -> Self {
        let (start_date, end_date) = window.wire_dates(today);
        Self {
            start_date,
            end_date,
            include_followed: settings.include_followed,
            include_liked_songs: settings.include_liked,
            min_liked_songs: settings.min_liked_songs,
            album_types: settings.album_types.iter().copied().collect(),
            refresh_artists,
            min_duration_sec: settings.min_duration_sec,
            max_duration_sec: settings.max_duration_sec,
            forbidden_keywords: settings.forbidden_keywords.clone(),
            exclude_artists: settings.excluded_artists.clone(),
        }
    }

    /// Filter block of this request, back in settings form.
    pub fn filter_settings(&self) -> FilterSettings {
        FilterSettings {
            min_duration_sec: self.min_duration_sec,
            max_duration_sec: self.max_duration_sec,
            forbidden_keywords: self.forbidden_keywords.clone(),
            excluded_artists: self.exclude_artists.clone(),
            album_types: self.album_types.iter().copied().collect(),
            include_followed: self.include_followed,
            include_liked: self.include_liked_songs,
            min_liked_songs: self.min_liked_songs,
        }
    }
}

/// Acknowledgement for `POST start` / `POST stop`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobAck {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl JobAck {
    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

/// `GET cache-info` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CacheInfo {
    pub exists: bool,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CacheInfo {
    /// Default for the "refresh artist list" toggle: refresh when nothing is cached.
    pub fn should_refresh(&self) -> bool {
        !self.exists
    }
}

// ── Export ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub name: String,
    pub uris: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub playlist_url: Option<String>,
    #[serde(default)]
    pub playlist_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A created playlist.  Opening the URL is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistRef {
    pub id: String,
    pub url: String,
}

// ── Automation ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    #[default]
    Friday,
    Saturday,
    Sunday,
}

impl std::str::FromStr for RunDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "monday" | "mon" => Ok(Self::Monday),
            "tuesday" | "tue" => Ok(Self::Tuesday),
            "wednesday" | "wed" => Ok(Self::Wednesday),
            "thursday" | "thu" => Ok(Self::Thursday),
            "friday" | "fri" => Ok(Self::Friday),
            "saturday" | "sat" => Ok(Self::Saturday),
            "sunday" | "sun" => Ok(Self::Sunday),
            other => Err(format!("unknown weekday: {other}")),
        }
    }
}

/// Weekly automation schedule plus the scan snapshot it will run with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub run_day: RunDay,
    /// "HH:MM", UTC.
    #[serde(rename = "run_time", alias = "run_time_utc", default = "default_run_time")]
    pub run_time_utc: String,
    /// Snapshot taken at save time; dates are `DYNAMIC_DATE`.
    #[serde(default, deserialize_with = "empty_object_as_none")]
    pub settings: Option<ScanParams>,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            run_day: RunDay::default(),
            run_time_utc: default_run_time(),
            settings: None,
        }
    }
}

fn default_run_time() -> String {
    "10:00".to_string()
}

impl AutomationConfig {
    pub fn new(enabled: bool, run_day: RunDay, run_time_utc: &str, settings: &FilterSettings) -> Self {
        let today = Utc::now().date_naive();
        Self {
            enabled,
            run_day,
            run_time_utc: run_time_utc.to_string(),
            settings: Some(ScanParams::new(settings, &DateWindow::Dynamic, today, false)),
        }
    }

    /// Checks `run_time_utc` is a valid 24h "HH:MM".
    pub fn validate_time(&self) -> Result<(), String> {
        let valid = match self.run_time_utc.split_once(':') {
            Some((h, m)) if h.len() == 2 && m.len() == 2 => matches!(
                (h.parse::<u8>(), m.parse::<u8>()),
                (Ok(h), Ok(m)) if h < 24 && m < 60
            ),
            _ => false,
        };
        if valid {
            Ok(())
        } else {
            Err(format!("run time must be HH:MM, got {:?}", self.run_time_utc))
        }
    }
}

fn empty_object_as_none<'de, D>(deserializer: D) -> Result<Option<ScanParams>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match &value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) if map.is_empty() => Ok(None),
        _ => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

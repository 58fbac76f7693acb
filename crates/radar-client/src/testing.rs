//! In-memory `JobApi` and track builders for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use radar_proto::protocol::{
    AlbumRef, ArtistRef, AutomationConfig, CacheInfo, ExportRequest, ExportResponse, ScanParams,
    ScanPhase, ScanStatus, Track,
};

use crate::error::{RadarError, Result};
use crate::transport::JobApi;

pub fn status(phase: ScanPhase, progress: u64, total: u64, result_count: u64) -> ScanStatus {
    ScanStatus {
        running: matches!(
            phase,
            ScanPhase::FetchingArtists | ScanPhase::Scanning | ScanPhase::RateLimited
        ),
        phase,
        progress,
        total,
        result_count,
        ..Default::default()
    }
}

pub fn track(id: &str, artist: &str, album: &str, ordinal: Option<u32>) -> Track {
    Track {
        id: id.to_string(),
        uri: format!("spotify:track:{id}"),
        name: format!("Song {id}"),
        artists: vec![ArtistRef {
            name: artist.to_string(),
            id: format!("artist-{}", artist.to_lowercase().replace(' ', "-")),
        }],
        album: AlbumRef {
            id: format!("album-{}", album.to_lowercase().replace(' ', "-")),
            name: album.to_string(),
            images: Vec::new(),
            release_date: "2024-05-31".to_string(),
        },
        duration_ms: 180_000,
        explicit: false,
        track_number: ordinal,
    }
}

/// `n` singles, each by its own artist.
pub fn sample_tracks(n: usize) -> Vec<Track> {
    (0..n)
        .map(|i| track(&format!("s{i}"), &format!("Artist {i}"), &format!("Single {i}"), None))
        .collect()
}

pub fn uris(tracks: &[Track]) -> Vec<String> {
    tracks.iter().map(|t| t.uri.clone()).collect()
}

/// Scripted job API.  Status replies are consumed in order; once the script
/// runs out the last reply repeats.
#[derive(Default)]
pub struct FakeJobApi {
    statuses: Mutex<VecDeque<ScanStatus>>,
    last_status: Mutex<ScanStatus>,
    results: Mutex<Vec<Track>>,
    fail_results: AtomicBool,
    fail_status: AtomicBool,
    reject_start: Mutex<Option<String>>,
    export_reply: Mutex<Option<ExportResponse>>,
    pub exports: Mutex<Vec<ExportRequest>>,
    pub started: Mutex<Vec<ScanParams>>,
    automation: Mutex<AutomationConfig>,
    pub saved_automation: Mutex<Vec<AutomationConfig>>,
    status_calls: AtomicUsize,
    results_calls: AtomicUsize,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl FakeJobApi {
    pub fn push_status(&self, status: ScanStatus) {
        self.statuses.lock().unwrap().push_back(status);
    }

    pub fn set_results(&self, tracks: Vec<Track>) {
        *self.results.lock().unwrap() = tracks;
    }

    pub fn fail_next_results(&self) {
        self.fail_results.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_status(&self) {
        self.fail_status.store(true, Ordering::SeqCst);
    }

    pub fn reject_start(&self, message: &str) {
        *self.reject_start.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_export_reply(&self, reply: ExportResponse) {
        *self.export_reply.lock().unwrap() = Some(reply);
    }

    pub fn set_automation(&self, config: AutomationConfig) {
        *self.automation.lock().unwrap() = config;
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn results_calls(&self) -> usize {
        self.results_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobApi for FakeJobApi {
    async fn start(&self, params: &ScanParams) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.reject_start.lock().unwrap().clone() {
            return Err(RadarError::Validation(message));
        }
        self.started.lock().unwrap().push(params.clone());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn status(&self) -> Result<ScanStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_status.swap(false, Ordering::SeqCst) {
            return Err(RadarError::Transport("connection refused".into()));
        }
        let mut last = self.last_status.lock().unwrap();
        if let Some(next) = self.statuses.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }

    async fn results(&self) -> Result<Vec<Track>> {
        self.results_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_results.swap(false, Ordering::SeqCst) {
            return Err(RadarError::Transport("timed out".into()));
        }
        Ok(self.results.lock().unwrap().clone())
    }

    async fn cache_info(&self) -> Result<CacheInfo> {
        Ok(CacheInfo::default())
    }

    async fn export(&self, request: &ExportRequest) -> Result<ExportResponse> {
        self.exports.lock().unwrap().push(request.clone());
        Ok(self.export_reply.lock().unwrap().clone().unwrap_or(ExportResponse {
            status: "success".into(),
            playlist_url: Some("https://open.spotify.com/playlist/pl123".into()),
            ..Default::default()
        }))
    }

    async fn automation_config(&self) -> Result<AutomationConfig> {
        Ok(self.automation.lock().unwrap().clone())
    }

    async fn save_automation_config(&self, config: &AutomationConfig) -> Result<()> {
        self.saved_automation.lock().unwrap().push(config.clone());
        Ok(())
    }
}

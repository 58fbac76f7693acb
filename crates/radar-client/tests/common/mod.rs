#![allow(dead_code)]

//! In-process fake of the scan job API, served by axum on a random port.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use radar_proto::config::ServerConfig;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct FakeState {
    /// Scripted status replies; the last one repeats once the script is used up.
    pub statuses: VecDeque<Value>,
    pub last_status: Option<Value>,
    pub results: Vec<Value>,
    /// Status replies to fail with 500 before answering normally.
    pub failing_status_polls: usize,
    pub cache_exists: bool,
    /// One-off reply to the next `POST start`.
    pub start_reply: Option<(StatusCode, Value)>,
    pub automation: Option<Value>,

    pub start_bodies: Vec<Value>,
    pub export_bodies: Vec<Value>,
    pub automation_bodies: Vec<Value>,
    pub status_calls: usize,
    pub results_calls: usize,
    pub stop_calls: usize,
}

pub type Shared = Arc<Mutex<FakeState>>;

pub struct FakeServer {
    pub base_url: String,
    pub state: Shared,
    task: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(FakeState::default()));
        let app = Router::new()
            .route("/api/start", post(start))
            .route("/api/stop", post(stop))
            .route("/api/status", get(status))
            .route("/api/results", get(results))
            .route("/api/cache-info", get(cache_info))
            .route("/api/export", post(export))
            .route("/api/automation/config", get(get_automation).post(save_automation))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake job api");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake job api");
        });

        Self {
            base_url: format!("http://{addr}/api"),
            state,
            task,
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            base_url: self.base_url.clone(),
            request_timeout_secs: 5,
        }
    }

    pub fn script(&self, statuses: impl IntoIterator<Item = Value>) {
        self.state.lock().unwrap().statuses.extend(statuses);
    }

    pub fn set_results(&self, tracks: Vec<Value>) {
        self.state.lock().unwrap().results = tracks;
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Wire builders ─────────────────────────────────────────────────────────────

pub fn status_json(status: &str, running: bool, progress: u64, total: u64, count: u64) -> Value {
    json!({
        "is_running": running,
        "status": status,
        "progress": progress,
        "total": total,
        "current_artist": if running { "Some Artist" } else { "" },
        "results_count": count,
        "error": null,
        "retry_after": null,
        "logs": ["Started scan"],
    })
}

pub fn track_json(id: &str, artist: &str, album: &str, number: Option<u32>) -> Value {
    json!({
        "id": id,
        "uri": format!("spotify:track:{id}"),
        "name": format!("Track {id}"),
        "artists": [{"name": artist, "id": format!("artist-{artist}")}],
        "album": {
            "id": format!("album-{album}"),
            "name": album,
            "images": [{"url": "https://i.scdn.co/image/cover"}],
            "release_date": "2024-05-31",
        },
        "duration_ms": 200_000,
        "explicit": false,
        "track_number": number,
    })
}

pub fn tracks_json(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| track_json(&format!("t{i}"), &format!("Artist {i}"), &format!("Single {i}"), None))
        .collect()
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn start(State(state): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut s = state.lock().unwrap();
    s.start_bodies.push(body);
    match s.start_reply.take() {
        Some((code, reply)) => (code, Json(reply)),
        None => (StatusCode::OK, Json(json!({"status": "started"}))),
    }
}

async fn stop(State(state): State<Shared>) -> Json<Value> {
    state.lock().unwrap().stop_calls += 1;
    Json(json!({"status": "stopping"}))
}

async fn status(State(state): State<Shared>) -> (StatusCode, Json<Value>) {
    let mut s = state.lock().unwrap();
    s.status_calls += 1;
    if s.failing_status_polls > 0 {
        s.failing_status_polls -= 1;
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "backend unavailable"})),
        );
    }
    if let Some(next) = s.statuses.pop_front() {
        s.last_status = Some(next);
    }
    let reply = s
        .last_status
        .clone()
        .unwrap_or_else(|| status_json("idle", false, 0, 0, 0));
    (StatusCode::OK, Json(reply))
}

async fn results(State(state): State<Shared>) -> Json<Value> {
    let mut s = state.lock().unwrap();
    s.results_calls += 1;
    Json(Value::Array(s.results.clone()))
}

async fn cache_info(State(state): State<Shared>) -> Json<Value> {
    let s = state.lock().unwrap();
    Json(json!({
        "exists": s.cache_exists,
        "count": if s.cache_exists { 120 } else { 0 },
        "last_updated": if s.cache_exists { json!("2024-05-30T08:00:00Z") } else { Value::Null },
    }))
}

async fn export(State(state): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let empty = body["uris"].as_array().map_or(true, |u| u.is_empty());
    state.lock().unwrap().export_bodies.push(body);
    if empty {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "No tracks to export"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "playlist_url": "https://open.spotify.com/playlist/5xYz?si=1",
        })),
    )
}

async fn get_automation(State(state): State<Shared>) -> Json<Value> {
    let s = state.lock().unwrap();
    Json(s.automation.clone().unwrap_or_else(|| {
        json!({"enabled": false, "run_day": "friday", "run_time": "10:00", "settings": {}})
    }))
}

async fn save_automation(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut s = state.lock().unwrap();
    s.automation = Some(body.clone());
    s.automation_bodies.push(body);
    Json(json!({"status": "success"}))
}

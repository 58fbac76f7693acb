/// RadarCore — single-owner event loop for all client state.
///
/// The scan reconciler, the result store, the selection, the settings store
/// and the automation cache are owned by this loop and nothing else.  Views
/// and the CLI talk to it through `CoreHandle`: every `CoreCommand` carries a
/// oneshot reply, and state changes are announced as `CoreUpdate` on a
/// `tokio::sync::broadcast` channel.  Views read `CoreSnapshot`s and never
/// mutate.
///
/// The loop waits on four sources at once:
///
/// ```text
///  command channel        CoreCommand from the handle
///  poll deadline          re-armed after each poll completes
///  settings deadline      armed while a settings write is owed
///  automation channel     result of the one-shot startup fetch
/// ```
///
/// Polls never overlap and missed ticks are not caught up: the next deadline
/// is set only once the previous poll has returned.
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use radar_proto::config::Config;
use radar_proto::protocol::{
    AutomationConfig, DateWindow, PlaylistRef, RunDay, ScanParams, ScanPhase, ScanStatus, Track,
};
use radar_proto::settings::FilterSettings;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::automation::AutomationCache;
use crate::curation::{self, AlbumKey, Detection};
use crate::error::{RadarError, Result};
use crate::export::{default_playlist_name, ExportCoordinator};
use crate::prompt::Prompter;
use crate::reconciler::{JobReconciler, PollOutcome};
use crate::results::ResultStore;
use crate::selection::SelectionManager;
use crate::settings_store::{SettingsBackend, SettingsStore};
use crate::transport::JobApi;

// ── CoreCommand ───────────────────────────────────────────────────────────────

pub type Reply<T> = oneshot::Sender<Result<T>>;

/// All inputs into the RadarCore loop.
#[derive(Debug)]
pub enum CoreCommand {
    /// `refresh: None` asks the server's artist cache whether a refresh is due.
    StartScan {
        window: DateWindow,
        refresh: Option<bool>,
        reply: Reply<()>,
    },
    StopScan {
        reply: Reply<()>,
    },
    UpdateSettings {
        settings: FilterSettings,
        reply: Reply<()>,
    },
    /// Show only tracks matching `term`; a blank term shows everything.
    /// The working copy and the selection are left alone.
    Search {
        term: String,
        reply: Reply<usize>,
    },
    /// Album detection over the working copy, without applying anything.
    DetectAlbums {
        reply: Reply<Detection>,
    },
    /// Move albums to the end; albums in `drop` are removed after confirmation.
    Organize {
        drop: Vec<AlbumKey>,
        reply: Reply<OrganizeOutcome>,
    },
    Refine {
        reply: Reply<usize>,
    },
    PreferExplicit {
        reply: Reply<usize>,
    },
    Restore {
        reply: Reply<()>,
    },
    Toggle {
        uri: String,
        reply: Reply<bool>,
    },
    /// Select or deselect the listed (visible) tracks.
    SetVisible {
        uris: Vec<String>,
        selected: bool,
        reply: Reply<usize>,
    },
    /// `name: None` uses the default name for the last scan window.
    Export {
        name: Option<String>,
        reply: Reply<PlaylistRef>,
    },
    SaveAutomation {
        enabled: bool,
        run_day: RunDay,
        run_time_utc: String,
        reply: Reply<AutomationConfig>,
    },
    Snapshot {
        reply: Reply<CoreSnapshot>,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrganizeOutcome {
    NoAlbums,
    Declined,
    Applied { albums: usize, dropped: usize },
}

// ── CoreUpdate / CoreSnapshot ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum CoreUpdate {
    Status(ScanStatus),
    ResultsLoaded { count: usize, first: bool },
    WorkingCopyChanged { count: usize },
    /// The search term changed; `visible` tracks pass it.
    ViewChanged { visible: usize },
    SelectionChanged { selected: usize },
    /// The scan this client was following ended (completed, failed or stopped).
    ScanFinished(ScanPhase),
    Notice(String),
    Exported(PlaylistRef),
    AutomationLoaded(AutomationConfig),
    AutomationUnavailable(String),
}

/// Read-only copy of the state a view renders.
#[derive(Debug, Clone)]
pub struct CoreSnapshot {
    pub status: ScanStatus,
    pub tracks: Vec<Track>,
    /// The working-copy tracks that pass the current search.
    pub visible: Vec<Track>,
    pub search: String,
    /// Selected URIs in working-copy order, hidden tracks included.
    pub selected: Vec<String>,
    pub modified: bool,
    pub settings: FilterSettings,
    pub automation: Option<AutomationConfig>,
    pub scan_dates: Option<(NaiveDate, NaiveDate)>,
}

// ── CoreHandle ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CoreHandle {
    tx: mpsc::Sender<CoreCommand>,
    updates: broadcast::Sender<CoreUpdate>,
}

impl CoreHandle {
    pub fn new(tx: mpsc::Sender<CoreCommand>, updates: broadcast::Sender<CoreUpdate>) -> Self {
        Self { tx, updates }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreUpdate> {
        self.updates.subscribe()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> CoreCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| RadarError::CoreClosed)?;
        rx.await.map_err(|_| RadarError::CoreClosed)?
    }

    pub async fn start_scan(&self, window: DateWindow, refresh: Option<bool>) -> Result<()> {
        self.request(|reply| CoreCommand::StartScan {
            window,
            refresh,
            reply,
        })
        .await
    }

    pub async fn stop_scan(&self) -> Result<()> {
        self.request(|reply| CoreCommand::StopScan { reply }).await
    }

    pub async fn update_settings(&self, settings: FilterSettings) -> Result<()> {
        self.request(|reply| CoreCommand::UpdateSettings { settings, reply })
            .await
    }

    pub async fn search(&self, term: &str) -> Result<usize> {
        let term = term.to_string();
        self.request(|reply| CoreCommand::Search { term, reply }).await
    }

    pub async fn detect_albums(&self) -> Result<Detection> {
        self.request(|reply| CoreCommand::DetectAlbums { reply }).await
    }

    pub async fn organize(&self, drop: Vec<AlbumKey>) -> Result<OrganizeOutcome> {
        self.request(|reply| CoreCommand::Organize { drop, reply }).await
    }

    pub async fn refine(&self) -> Result<usize> {
        self.request(|reply| CoreCommand::Refine { reply }).await
    }

    pub async fn prefer_explicit(&self) -> Result<usize> {
        self.request(|reply| CoreCommand::PreferExplicit { reply }).await
    }

    pub async fn restore(&self) -> Result<()> {
        self.request(|reply| CoreCommand::Restore { reply }).await
    }

    pub async fn toggle(&self, uri: &str) -> Result<bool> {
        let uri = uri.to_string();
        self.request(|reply| CoreCommand::Toggle { uri, reply }).await
    }

    pub async fn set_visible(&self, uris: Vec<String>, selected: bool) -> Result<usize> {
        self.request(|reply| CoreCommand::SetVisible {
            uris,
            selected,
            reply,
        })
        .await
    }

    pub async fn export(&self, name: Option<String>) -> Result<PlaylistRef> {
        self.request(|reply| CoreCommand::Export { name, reply }).await
    }

    pub async fn save_automation(
        &self,
        enabled: bool,
        run_day: RunDay,
        run_time_utc: &str,
    ) -> Result<AutomationConfig> {
        let run_time_utc = run_time_utc.to_string();
        self.request(|reply| CoreCommand::SaveAutomation {
            enabled,
            run_day,
            run_time_utc,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<CoreSnapshot> {
        self.request(|reply| CoreCommand::Snapshot { reply }).await
    }

    /// Ask the loop to tear down.  A loop that is already gone is fine.
    pub async fn shutdown(&self) {
        if self.tx.send(CoreCommand::Shutdown).await.is_err() {
            debug!("CoreHandle: shutdown sent to a stopped core");
        }
    }
}

// ── RadarCore ─────────────────────────────────────────────────────────────────

pub struct RadarCore {
    api: Arc<dyn JobApi>,
    reconciler: JobReconciler,
    store: ResultStore,
    selection: SelectionManager,
    exporter: ExportCoordinator,
    settings: SettingsStore,
    automation: AutomationCache,
    automation_tx: mpsc::Sender<Result<AutomationConfig>>,
    automation_rx: mpsc::Receiver<Result<AutomationConfig>>,
    prompter: Arc<dyn Prompter>,
    broadcast_tx: broadcast::Sender<CoreUpdate>,
    poll_interval: Duration,
    album_threshold: usize,
    log_tail: usize,
    /// A scan this client started (or found running) has not ended yet.
    scan_active: bool,
    /// The active scan has been observed running at least once.
    seen_running: bool,
    scan_dates: Option<(NaiveDate, NaiveDate)>,
    search_term: String,
}

impl RadarCore {
    pub fn new(
        config: &Config,
        api: Arc<dyn JobApi>,
        backend: Box<dyn SettingsBackend>,
        prompter: Arc<dyn Prompter>,
        broadcast_tx: broadcast::Sender<CoreUpdate>,
    ) -> Self {
        let (automation_tx, automation_rx) = mpsc::channel(1);
        Self {
            reconciler: JobReconciler::new(Arc::clone(&api)),
            exporter: ExportCoordinator::new(Arc::clone(&api)),
            automation: AutomationCache::new(Arc::clone(&api)),
            api,
            store: ResultStore::new(),
            selection: SelectionManager::new(),
            settings: SettingsStore::new(backend, config.settings.debounce()),
            automation_tx,
            automation_rx,
            prompter,
            broadcast_tx,
            poll_interval: config.polling.interval(),
            album_threshold: config.curation.album_threshold,
            log_tail: config.curation.log_tail,
            scan_active: false,
            seen_running: false,
            scan_dates: None,
            search_term: String::new(),
        }
    }

    /// Run the core loop.  Returns on `Shutdown` or when every handle is gone.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<CoreCommand>) -> anyhow::Result<()> {
        info!("RadarCore: starting event loop");

        self.settings.load();
        self.automation.spawn_fetch(self.automation_tx.clone());
        let mut next_poll = Instant::now();

        loop {
            let settings_deadline = self.settings.deadline();
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    None => {
                        info!("RadarCore: command channel closed, shutting down");
                        break;
                    }
                    Some(CoreCommand::Shutdown) => {
                        info!("RadarCore: shutdown requested");
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                },

                _ = sleep_until(next_poll) => {
                    self.poll_once().await;
                    next_poll = Instant::now() + self.poll_interval;
                }

                _ = sleep_until_opt(settings_deadline) => {
                    if let Err(e) = self.settings.flush() {
                        error!("RadarCore: settings write failed: {}", e);
                    }
                }

                Some(result) = self.automation_rx.recv() => {
                    let failure = result.as_ref().err().map(|e| e.to_string());
                    if let Some(config) = self.automation.apply_fetch(result) {
                        let _ = self.broadcast_tx.send(CoreUpdate::AutomationLoaded(config.clone()));
                    } else if let Some(reason) = failure {
                        let _ = self.broadcast_tx.send(CoreUpdate::AutomationUnavailable(reason));
                    }
                }
            }
        }

        self.teardown();
        Ok(())
    }

    fn teardown(&mut self) {
        if let Err(e) = self.settings.flush_now() {
            error!("RadarCore: final settings write failed: {}", e);
        }
        self.automation.abort();
        info!("RadarCore: stopped");
    }

    fn publish(&self, update: CoreUpdate) {
        // No subscribers is not an error.
        let _ = self.broadcast_tx.send(update);
    }

    fn notice(&self, message: String) {
        self.prompter.notify(&message);
        self.publish(CoreUpdate::Notice(message));
    }

    // ── Polling ───────────────────────────────────────────────────────────────

    async fn poll_once(&mut self) {
        match self.reconciler.poll().await {
            Ok(outcome) => self.apply_poll(outcome),
            // The cadence continues; the next poll retries.
            Err(e) => warn!("RadarCore: poll failed: {}", e),
        }
    }

    fn apply_poll(&mut self, outcome: PollOutcome) {
        let PollOutcome {
            status,
            results,
            transition,
        } = outcome;

        if status.running {
            if !self.scan_active {
                debug!("RadarCore: following a running scan");
                self.scan_active = true;
            }
            self.seen_running = true;
        }
        self.publish(CoreUpdate::Status(status.clone()));

        if let Some(tracks) = results {
            let count = tracks.len();
            let first = self.store.load(tracks);
            if first {
                self.selection.clear();
            }
            self.reconcile_selection();
            self.publish(CoreUpdate::ResultsLoaded { count, first });
        }

        if let Some((from, to)) = transition {
            debug!("RadarCore: {} -> {}", from, to);
        }
        // An idle reply right after start can predate the job; only an idle
        // job that was seen running counts as stopped.
        let stopped = status.phase == ScanPhase::Idle && !status.running && self.seen_running;
        if self.scan_active && (status.phase.is_terminal() || stopped) {
            self.scan_active = false;
            self.seen_running = false;
            match status.phase {
                ScanPhase::Completed => {
                    self.notice(format!("Scan complete: {} tracks", self.store.len()))
                }
                ScanPhase::Error => self.notice(self.failure_message(&status)),
                _ => self.notice("Scan stopped".to_string()),
            }
            self.publish(CoreUpdate::ScanFinished(status.phase));
        }
    }

    fn failure_message(&self, status: &ScanStatus) -> String {
        let mut message = format!(
            "Scan failed: {}",
            status.error.as_deref().unwrap_or("unknown error")
        );
        for line in status.log_tail(self.log_tail) {
            message.push_str("\n  ");
            message.push_str(line);
        }
        message
    }

    fn reconcile_selection(&mut self) {
        self.selection
            .reconcile(self.store.tracks().iter().map(|t| t.uri.as_str()));
        self.publish(CoreUpdate::SelectionChanged {
            selected: self.selection.len(),
        });
    }

    fn replace_working(&mut self, tracks: Vec<Track>) -> Result<usize> {
        self.store.replace(tracks)?;
        self.reconcile_selection();
        let count = self.store.len();
        self.publish(CoreUpdate::WorkingCopyChanged { count });
        Ok(count)
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: CoreCommand) {
        match cmd {
            CoreCommand::StartScan {
                window,
                refresh,
                reply,
            } => {
                let result = self.start_scan(window, refresh).await;
                self.respond("start scan", reply, result);
            }
            CoreCommand::StopScan { reply } => {
                let result = self.reconciler.stop().await;
                self.respond("stop scan", reply, result);
            }
            CoreCommand::UpdateSettings { settings, reply } => {
                let result = if self.settings.save(settings) {
                    Ok(())
                } else {
                    Err(RadarError::Settings("settings not loaded yet".into()))
                };
                self.respond("update settings", reply, result);
            }
            CoreCommand::Search { term, reply } => {
                self.search_term = term.trim().to_string();
                let visible = self.visible().len();
                debug!("RadarCore: search {:?} shows {} tracks", self.search_term, visible);
                self.publish(CoreUpdate::ViewChanged { visible });
                let _ = reply.send(Ok(visible));
            }
            CoreCommand::DetectAlbums { reply } => {
                let detection = curation::detect_albums(self.store.tracks(), self.album_threshold);
                let _ = reply.send(Ok(detection));
            }
            CoreCommand::Organize { drop, reply } => {
                let result = self.organize(&drop).await;
                self.respond("organize", reply, result);
            }
            CoreCommand::Refine { reply } => {
                let refined = curation::refine(self.store.tracks(), self.settings.current());
                let result = self.replace_working(refined);
                self.respond("refine", reply, result);
            }
            CoreCommand::PreferExplicit { reply } => {
                let kept = curation::prefer_explicit(self.store.tracks());
                let result = self.replace_working(kept);
                self.respond("prefer explicit", reply, result);
            }
            CoreCommand::Restore { reply } => {
                let result = self.store.restore().map(|()| {
                    self.reconcile_selection();
                    self.publish(CoreUpdate::WorkingCopyChanged {
                        count: self.store.len(),
                    });
                });
                self.respond("restore", reply, result);
            }
            CoreCommand::Toggle { uri, reply } => {
                let on = self.selection.toggle(&uri);
                self.publish(CoreUpdate::SelectionChanged {
                    selected: self.selection.len(),
                });
                let _ = reply.send(Ok(on));
            }
            CoreCommand::SetVisible {
                uris,
                selected,
                reply,
            } => {
                self.selection
                    .set_all(uris.iter().map(String::as_str), selected);
                let count = self.selection.len();
                self.publish(CoreUpdate::SelectionChanged { selected: count });
                let _ = reply.send(Ok(count));
            }
            CoreCommand::Export { name, reply } => {
                let result = self.export(name).await;
                self.respond("export", reply, result);
            }
            CoreCommand::SaveAutomation {
                enabled,
                run_day,
                run_time_utc,
                reply,
            } => {
                let settings = self.settings.current().clone();
                let result = self
                    .automation
                    .save(enabled, run_day, &run_time_utc, &settings)
                    .await;
                if let Ok(config) = &result {
                    self.publish(CoreUpdate::AutomationLoaded(config.clone()));
                }
                self.respond("save automation", reply, result);
            }
            CoreCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(self.snapshot()));
            }
            CoreCommand::Shutdown => {}
        }
    }

    /// Send `result` back, surfacing precondition failures as notices.
    fn respond<T>(&self, what: &str, reply: Reply<T>, result: Result<T>) {
        if let Err(e) = &result {
            if e.is_precondition() {
                self.notice(e.to_string());
            } else {
                warn!("RadarCore: {} failed: {}", what, e);
            }
        }
        if reply.send(result).is_err() {
            debug!("RadarCore: {} reply dropped", what);
        }
    }

    async fn start_scan(&mut self, window: DateWindow, refresh: Option<bool>) -> Result<()> {
        let today = Local::now().date_naive();
        window.validate(today).map_err(RadarError::Validation)?;
        let refresh = match refresh {
            Some(refresh) => refresh,
            None => refresh_due(self.api.as_ref()).await,
        };
        let params = ScanParams::new(self.settings.current(), &window, today, refresh);
        self.reconciler.start(&params).await?;

        self.scan_dates = window.dates(today);
        self.store.begin_scan();
        self.scan_active = true;
        self.seen_running = false;
        Ok(())
    }

    async fn organize(&mut self, drop: &[AlbumKey]) -> Result<OrganizeOutcome> {
        let mut detection = curation::detect_albums(self.store.tracks(), self.album_threshold);
        if detection.is_noop() {
            self.notice("No albums found".to_string());
            return Ok(OrganizeOutcome::NoAlbums);
        }
        for key in drop {
            if !detection.set_selected(key, false) {
                debug!("RadarCore: no album {} to drop", key);
            }
        }

        if let Some(plan) = detection.removal_plan() {
            if !self.prompter.confirm(&plan.to_string()).await {
                info!("RadarCore: organize declined");
                return Ok(OrganizeOutcome::Declined);
            }
        }

        let organized = curation::apply_album_organization(&detection.singles, &detection.albums);
        let albums = detection.albums.iter().filter(|a| a.selected).count();
        let dropped = detection.dropped_tracks().count();
        self.replace_working(organized)?;
        info!(
            "RadarCore: organized {} albums, dropped {} tracks",
            albums, dropped
        );
        Ok(OrganizeOutcome::Applied { albums, dropped })
    }

    async fn export(&mut self, name: Option<String>) -> Result<PlaylistRef> {
        let name = name.unwrap_or_else(|| self.default_name());
        let uris = self.selection.ordered(self.store.tracks());
        let playlist = self.exporter.export(&name, uris).await?;
        self.publish(CoreUpdate::Exported(playlist.clone()));
        Ok(playlist)
    }

    fn default_name(&self) -> String {
        let today = Local::now().date_naive();
        let (start, end) = self
            .scan_dates
            .or_else(|| DateWindow::default().dates(today))
            .unwrap_or((today, today));
        default_playlist_name(start, end)
    }

    fn visible(&self) -> Vec<Track> {
        curation::filter_by_search(self.store.tracks(), &self.search_term)
    }

    fn snapshot(&self) -> CoreSnapshot {
        CoreSnapshot {
            status: self.reconciler.status().clone(),
            tracks: self.store.tracks().to_vec(),
            visible: self.visible(),
            search: self.search_term.clone(),
            selected: self.selection.ordered(self.store.tracks()),
            modified: self.store.is_modified(),
            settings: self.settings.current().clone(),
            automation: self.automation.config().cloned(),
            scan_dates: self.scan_dates,
        }
    }
}

/// Whether the server's followed-artist cache needs rebuilding.
async fn refresh_due(api: &dyn JobApi) -> bool {
    match api.cache_info().await {
        Ok(info) => info.should_refresh(),
        Err(e) => {
            warn!("RadarCore: cache info unavailable, not refreshing: {}", e);
            false
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Wire up a core and its handle.  The caller spawns `core.run(rx)`.
pub fn channel(
    config: &Config,
    api: Arc<dyn JobApi>,
    backend: Box<dyn SettingsBackend>,
    prompter: Arc<dyn Prompter>,
) -> (RadarCore, CoreHandle, mpsc::Receiver<CoreCommand>) {
    let (broadcast_tx, _) = broadcast::channel::<CoreUpdate>(1024);
    let (command_tx, command_rx) = mpsc::channel::<CoreCommand>(64);
    let core = RadarCore::new(config, api, backend, prompter, broadcast_tx.clone());
    (core, CoreHandle::new(command_tx, broadcast_tx), command_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::AutoPrompter;
    use crate::settings_store::{MemoryBackend, SETTINGS_KEY};
    use crate::testing::{sample_tracks, status, track, FakeJobApi};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::task::JoinHandle;

    /// Records notices and answers confirmations from a fixed reply.
    struct ScriptedPrompter {
        answer: bool,
        asked: AtomicUsize,
        notices: Mutex<Vec<String>>,
    }

    impl ScriptedPrompter {
        fn new(answer: bool) -> Arc<Self> {
            Arc::new(Self {
                answer,
                asked: AtomicUsize::new(0),
                notices: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Prompter for ScriptedPrompter {
        async fn confirm(&self, _prompt: &str) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer
        }

        fn notify(&self, message: &str) {
            self.notices.lock().unwrap().push(message.to_string());
        }
    }

    fn spawn(
        api: Arc<FakeJobApi>,
        backend: MemoryBackend,
        prompter: Arc<dyn Prompter>,
    ) -> (CoreHandle, JoinHandle<anyhow::Result<()>>) {
        let (core, handle, rx) = channel(&Config::default(), api, Box::new(backend), prompter);
        (handle, tokio::spawn(core.run(rx)))
    }

    async fn wait_for_results(updates: &mut broadcast::Receiver<CoreUpdate>) -> usize {
        loop {
            if let CoreUpdate::ResultsLoaded { count, .. } = updates.recv().await.unwrap() {
                return count;
            }
        }
    }

    async fn wait_finished(updates: &mut broadcast::Receiver<CoreUpdate>) -> ScanPhase {
        loop {
            if let CoreUpdate::ScanFinished(phase) = updates.recv().await.unwrap() {
                return phase;
            }
        }
    }

    fn album_fixture() -> Vec<Track> {
        let mut tracks = sample_tracks(2);
        tracks.extend((1..=4).map(|n| track(&format!("a{n}"), "Band", "LP", Some(n))));
        tracks.extend((1..=4).map(|n| track(&format!("b{n}"), "Other", "EP", Some(n))));
        tracks
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_scan_loads_and_selects_all() {
        let api = Arc::new(FakeJobApi::default());
        api.set_results(sample_tracks(5));
        let (handle, task) = spawn(api.clone(), MemoryBackend::new(), ScriptedPrompter::new(true));
        let mut updates = handle.subscribe();

        handle.start_scan(DateWindow::LastDays(7), Some(false)).await.unwrap();
        api.push_status(status(ScanPhase::Scanning, 1, 2, 0));
        api.push_status(status(ScanPhase::Completed, 2, 2, 5));

        assert_eq!(wait_for_results(&mut updates).await, 5);
        assert_eq!(wait_finished(&mut updates).await, ScanPhase::Completed);

        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.tracks.len(), 5);
        assert_eq!(snap.selected.len(), 5);
        assert!(!snap.modified);
        assert_eq!(api.results_calls(), 1);

        handle.shutdown().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_keeps_polling() {
        let api = Arc::new(FakeJobApi::default());
        api.fail_next_status();
        api.push_status(status(ScanPhase::Scanning, 1, 10, 0));
        let (handle, task) = spawn(api.clone(), MemoryBackend::new(), ScriptedPrompter::new(true));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(api.status_calls() >= 3);

        handle.shutdown().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_organize_declined_leaves_state() {
        let api = Arc::new(FakeJobApi::default());
        api.set_results(album_fixture());
        api.push_status(status(ScanPhase::Completed, 1, 1, 10));
        let prompter = ScriptedPrompter::new(false);
        let (handle, task) = spawn(api.clone(), MemoryBackend::new(), prompter.clone());
        let mut updates = handle.subscribe();
        wait_for_results(&mut updates).await;

        let before = handle.snapshot().await.unwrap();
        let drop = vec![AlbumKey {
            artist: "Band".into(),
            album: "LP".into(),
        }];
        assert_eq!(handle.organize(drop).await.unwrap(), OrganizeOutcome::Declined);
        assert_eq!(prompter.asked.load(Ordering::SeqCst), 1);

        let after = handle.snapshot().await.unwrap();
        assert_eq!(after.tracks, before.tracks);
        assert_eq!(after.selected, before.selected);

        handle.shutdown().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_organize_then_restore() {
        let api = Arc::new(FakeJobApi::default());
        let tracks = album_fixture();
        api.set_results(tracks.clone());
        api.push_status(status(ScanPhase::Completed, 1, 1, 10));
        let (handle, task) = spawn(api.clone(), MemoryBackend::new(), ScriptedPrompter::new(true));
        let mut updates = handle.subscribe();
        wait_for_results(&mut updates).await;

        let drop = vec![AlbumKey {
            artist: "Other".into(),
            album: "EP".into(),
        }];
        assert_eq!(
            handle.organize(drop).await.unwrap(),
            OrganizeOutcome::Applied {
                albums: 1,
                dropped: 4
            }
        );
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.tracks.len(), 6);
        assert_eq!(snap.selected.len(), 6);
        assert!(snap.modified);

        handle.restore().await.unwrap();
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.tracks, tracks);
        assert!(matches!(handle.restore().await, Err(RadarError::NothingToRestore)));

        handle.shutdown().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_organize_without_albums_is_noop() {
        let api = Arc::new(FakeJobApi::default());
        api.set_results(sample_tracks(3));
        api.push_status(status(ScanPhase::Completed, 1, 1, 3));
        let prompter = ScriptedPrompter::new(true);
        let (handle, task) = spawn(api.clone(), MemoryBackend::new(), prompter.clone());
        let mut updates = handle.subscribe();
        wait_for_results(&mut updates).await;

        assert_eq!(handle.organize(Vec::new()).await.unwrap(), OrganizeOutcome::NoAlbums);
        assert_eq!(prompter.asked.load(Ordering::SeqCst), 0);
        assert!(prompter
            .notices
            .lock()
            .unwrap()
            .iter()
            .any(|n| n == "No albums found"));

        handle.shutdown().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_uses_selection_in_order() {
        let api = Arc::new(FakeJobApi::default());
        let tracks = sample_tracks(4);
        api.set_results(tracks.clone());
        api.push_status(status(ScanPhase::Completed, 1, 1, 4));
        let (handle, task) = spawn(api.clone(), MemoryBackend::new(), ScriptedPrompter::new(true));
        let mut updates = handle.subscribe();
        wait_for_results(&mut updates).await;

        assert!(!handle.toggle(&tracks[1].uri).await.unwrap());
        let playlist = handle.export(Some("Picks".into())).await.unwrap();
        assert_eq!(playlist.url, "https://open.spotify.com/playlist/pl123");

        let sent = api.exports.lock().unwrap()[0].clone();
        assert_eq!(sent.name, "Picks");
        assert_eq!(
            sent.uris,
            vec![tracks[0].uri.clone(), tracks[2].uri.clone(), tracks[3].uri.clone()]
        );

        handle.set_visible(sent.uris.clone(), false).await.unwrap();
        assert!(matches!(
            handle.export(None).await,
            Err(RadarError::EmptySelection)
        ));

        handle.shutdown().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_only_filters_the_view() {
        let api = Arc::new(FakeJobApi::default());
        let tracks = sample_tracks(4);
        api.set_results(tracks.clone());
        api.push_status(status(ScanPhase::Completed, 1, 1, 4));
        let (handle, task) = spawn(api.clone(), MemoryBackend::new(), ScriptedPrompter::new(true));
        let mut updates = handle.subscribe();
        wait_for_results(&mut updates).await;

        assert!(!handle.toggle(&tracks[3].uri).await.unwrap());
        assert_eq!(handle.search(&tracks[0].name).await.unwrap(), 1);

        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.visible, vec![tracks[0].clone()]);
        assert_eq!(snap.tracks, tracks);
        assert!(!snap.modified);

        // Deselecting the visible scope leaves hidden tracks as they were.
        handle
            .set_visible(vec![tracks[0].uri.clone()], false)
            .await
            .unwrap();
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.selected, vec![tracks[1].uri.clone(), tracks[2].uri.clone()]);

        assert_eq!(handle.search("").await.unwrap(), 4);
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.visible, tracks);
        assert_eq!(snap.selected, vec![tracks[1].uri.clone(), tracks[2].uri.clone()]);
        assert!(matches!(handle.restore().await, Err(RadarError::NothingToRestore)));

        handle.shutdown().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_burst_written_once() {
        let api = Arc::new(FakeJobApi::default());
        let backend = MemoryBackend::new();
        let (handle, task) = spawn(api, backend.clone(), ScriptedPrompter::new(true));

        for i in 0..5u32 {
            let settings = FilterSettings {
                max_duration_sec: 300 + i,
                ..Default::default()
            };
            handle.update_settings(settings).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(backend.writes(), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(backend.writes(), 1);
        let stored: FilterSettings =
            serde_json::from_value(backend.get(SETTINGS_KEY).unwrap()).unwrap();
        assert_eq!(stored.max_duration_sec, 304);

        handle.shutdown().await;
        task.await.unwrap().unwrap();
        assert_eq!(backend.writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_pending_settings() {
        let api = Arc::new(FakeJobApi::default());
        let backend = MemoryBackend::new();
        let (handle, task) = spawn(api, backend.clone(), ScriptedPrompter::new(true));

        handle.update_settings(FilterSettings::default()).await.unwrap();
        handle.shutdown().await;
        task.await.unwrap().unwrap();
        assert_eq!(backend.writes(), 1);
        assert!(matches!(
            handle.snapshot().await,
            Err(RadarError::CoreClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_window_is_rejected_before_start() {
        let api = Arc::new(FakeJobApi::default());
        let (handle, task) = spawn(api.clone(), MemoryBackend::new(), ScriptedPrompter::new(true));

        assert!(matches!(
            handle.start_scan(DateWindow::LastDays(u32::MAX), Some(false)).await,
            Err(RadarError::Validation(_))
        ));
        assert!(api.started.lock().unwrap().is_empty());

        handle.shutdown().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_uses_stored_settings() {
        let api = Arc::new(FakeJobApi::default());
        let backend = MemoryBackend::with_value(
            SETTINGS_KEY,
            serde_json::json!({"forbidden_keywords": ["live"], "include_liked": true}),
        );
        let (handle, task) = spawn(api.clone(), backend, Arc::new(AutoPrompter { answer: true }));

        handle.start_scan(DateWindow::LastDays(7), None).await.unwrap();
        let started = api.started.lock().unwrap()[0].clone();
        assert_eq!(started.forbidden_keywords, vec!["live"]);
        assert!(started.include_liked_songs);
        // Fake cache info reports no cache, so artists are refreshed.
        assert!(started.refresh_artists);

        handle.shutdown().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_scan_reports_error_and_logs() {
        let api = Arc::new(FakeJobApi::default());
        let prompter = ScriptedPrompter::new(true);
        let (handle, task) = spawn(api.clone(), MemoryBackend::new(), prompter.clone());
        let mut updates = handle.subscribe();

        handle.start_scan(DateWindow::LastDays(7), Some(false)).await.unwrap();
        let mut failed = status(ScanPhase::Error, 3, 10, 0);
        failed.error = Some("Spotify token expired".into());
        failed.recent_logs = vec!["first".into(), "second".into()];
        api.push_status(failed);

        assert_eq!(wait_finished(&mut updates).await, ScanPhase::Error);
        let notices = prompter.notices.lock().unwrap().clone();
        let message = notices.iter().find(|n| n.starts_with("Scan failed")).unwrap();
        assert!(message.contains("Spotify token expired"));
        assert!(message.find("second").unwrap() < message.find("first").unwrap());

        handle.shutdown().await;
        task.await.unwrap().unwrap();
    }
}

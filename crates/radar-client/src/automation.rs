//! Cached copy of the server's weekly automation schedule.
//!
//! The remote config is fetched once, in the background, when the core
//! starts.  The fetch task's handle lives here so teardown can abort it.

use std::sync::Arc;

use radar_proto::protocol::{AutomationConfig, RunDay};
use radar_proto::settings::FilterSettings;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{RadarError, Result};
use crate::transport::JobApi;

pub struct AutomationCache {
    api: Arc<dyn JobApi>,
    config: Option<AutomationConfig>,
    fetch_task: Option<JoinHandle<()>>,
}

impl AutomationCache {
    pub fn new(api: Arc<dyn JobApi>) -> Self {
        Self {
            api,
            config: None,
            fetch_task: None,
        }
    }

    pub fn config(&self) -> Option<&AutomationConfig> {
        self.config.as_ref()
    }

    /// Start the one-shot fetch; its result is sent to `tx`.  No-op when a
    /// fetch is already in flight.
    pub fn spawn_fetch(&mut self, tx: mpsc::Sender<Result<AutomationConfig>>) {
        if self.fetch_task.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let api = Arc::clone(&self.api);
        self.fetch_task = Some(tokio::spawn(async move {
            let result = api.automation_config().await;
            if tx.send(result).await.is_err() {
                debug!("Automation fetch finished after core shutdown");
            }
        }));
    }

    /// Take the result of the background fetch.  A saved config always wins
    /// over a fetch that lands after it.
    pub fn apply_fetch(&mut self, result: Result<AutomationConfig>) -> Option<&AutomationConfig> {
        self.fetch_task = None;
        match result {
            Ok(config) if self.config.is_none() => {
                info!(
                    "Automation: enabled={} {:?} {} UTC",
                    config.enabled, config.run_day, config.run_time_utc
                );
                self.config = Some(config);
            }
            Ok(_) => debug!("Automation fetch superseded by a local save"),
            Err(e) => warn!("Failed to load automation config: {}", e),
        }
        self.config.as_ref()
    }

    /// Persist a new schedule together with a snapshot of `settings`.
    pub async fn save(
        &mut self,
        enabled: bool,
        run_day: RunDay,
        run_time_utc: &str,
        settings: &FilterSettings,
    ) -> Result<AutomationConfig> {
        let config = AutomationConfig::new(enabled, run_day, run_time_utc, settings);
        config.validate_time().map_err(RadarError::Validation)?;
        self.api.save_automation_config(&config).await?;
        info!(
            "Automation saved: enabled={} {:?} {} UTC",
            enabled, run_day, run_time_utc
        );
        self.config = Some(config.clone());
        Ok(config)
    }

    pub fn abort(&mut self) {
        if let Some(handle) = self.fetch_task.take() {
            handle.abort();
        }
    }
}

impl Drop for AutomationCache {
    fn drop(&mut self) {
        self.abort();
    }
}

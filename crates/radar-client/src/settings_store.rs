//! Persisted filter settings with a debounced write.
//!
//! `save()` never touches storage directly: it records the latest value and
//! (re)arms a single deadline.  The owning loop sleeps until `deadline()` and
//! then calls `flush()`, so a burst of edits lands as one write holding the
//! final values.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use radar_proto::settings::FilterSettings;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{RadarError, Result};

/// Storage key of the settings record.
pub const SETTINGS_KEY: &str = "filter_settings";

/// Key-value storage for JSON records.
pub trait SettingsBackend: Send + Sync {
    fn read(&self, key: &str) -> anyhow::Result<Option<Value>>;
    fn write(&mut self, key: &str, value: Value) -> anyhow::Result<()>;
}

// ── File backend ──────────────────────────────────────────────────────────────

/// One JSON object per file; each key is a top-level field.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_all(&self) -> Map<String, Value> {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return Map::new();
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!("Ignoring unreadable settings file {}", self.path.display());
                Map::new()
            }
        }
    }
}

impl SettingsBackend for FileBackend {
    fn read(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.read_all().remove(key))
    }

    fn write(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut all = self.read_all();
        all.insert(key.to_string(), value);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&Value::Object(all))?)?;
        Ok(())
    }
}

// ── Memory backend ────────────────────────────────────────────────────────────

/// Shared in-memory storage.  Clones see the same data and write counter.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    values: Arc<Mutex<HashMap<String, Value>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(key: &str, value: Value) -> Self {
        let backend = Self::default();
        if let Ok(mut values) = backend.values.lock() {
            values.insert(key.to_string(), value);
        }
        backend
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().ok()?.get(key).cloned()
    }
}

impl SettingsBackend for MemoryBackend {
    fn read(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("settings store poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("settings store poisoned"))?;
        values.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

pub struct SettingsStore {
    backend: Box<dyn SettingsBackend>,
    current: FilterSettings,
    loaded: bool,
    /// Set while a write is owed; cleared by a flush.
    deadline: Option<Instant>,
    debounce: Duration,
}

impl SettingsStore {
    pub fn new(backend: Box<dyn SettingsBackend>, debounce: Duration) -> Self {
        Self {
            backend,
            current: FilterSettings::default(),
            loaded: false,
            deadline: None,
            debounce,
        }
    }

    /// Read the stored record.  Missing or malformed records fall back to
    /// defaults; either way the store counts as loaded afterwards.
    pub fn load(&mut self) -> FilterSettings {
        self.current = match self.backend.read(SETTINGS_KEY) {
            Ok(Some(value)) => match serde_json::from_value::<FilterSettings>(value) {
                Ok(settings) => settings.normalized(),
                Err(e) => {
                    warn!("Stored filter settings are malformed, using defaults: {}", e);
                    FilterSettings::default()
                }
            },
            Ok(None) => {
                debug!("No stored filter settings, using defaults");
                FilterSettings::default()
            }
            Err(e) => {
                warn!("Failed to read filter settings, using defaults: {}", e);
                FilterSettings::default()
            }
        };
        self.loaded = true;
        self.current.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn current(&self) -> &FilterSettings {
        &self.current
    }

    /// Record `settings` and restart the debounce window.  Returns `false`
    /// when ignored because `load()` hasn't run yet.
    pub fn save(&mut self, settings: FilterSettings) -> bool {
        if !self.loaded {
            warn!("Settings change before load ignored");
            return false;
        }
        self.current = settings.normalized();
        self.deadline = Some(Instant::now() + self.debounce);
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Write the pending value if its deadline has passed.  Returns whether a
    /// write happened.
    pub fn flush(&mut self) -> Result<bool> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.write_current()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Write a pending value right away, deadline or not.
    pub fn flush_now(&mut self) -> Result<bool> {
        if self.deadline.is_none() {
            return Ok(false);
        }
        self.write_current()?;
        Ok(true)
    }

    fn write_current(&mut self) -> Result<()> {
        self.deadline = None;
        let value = serde_json::to_value(&self.current)
            .map_err(|e| RadarError::Settings(e.to_string()))?;
        self.backend
            .write(SETTINGS_KEY, value)
            .map_err(|e| RadarError::Settings(e.to_string()))?;
        info!("Filter settings saved");
        Ok(())
    }
}

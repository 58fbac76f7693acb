//! ResultStore — the working copy of the scan results plus the untouched
//! snapshot it can be restored to.
//!
//! Only the store writes the working copy.  Every change swaps the whole
//! list, so readers see either the old list or the new one, never a mix.

use std::collections::HashSet;

use radar_proto::protocol::Track;
use tracing::debug;

use crate::error::{RadarError, Result};

#[derive(Debug, Default)]
pub struct ResultStore {
    working: Vec<Track>,
    snapshot: Vec<Track>,
    /// True until the first `load()` after `begin_scan()`.
    awaiting_first_load: bool,
    /// Bumped on every working-copy change.
    rev: u64,
}

impl ResultStore {
    pub fn new() -> Self {
        Self {
            awaiting_first_load: true,
            ..Default::default()
        }
    }

    /// A new scan was started; the next `load()` is its first.
    pub fn begin_scan(&mut self) {
        self.awaiting_first_load = true;
    }

    /// Replace the working copy and the restore snapshot with fresh server
    /// results.  Returns whether this was the first load of the current scan.
    pub fn load(&mut self, tracks: Vec<Track>) -> bool {
        let first = std::mem::replace(&mut self.awaiting_first_load, false);
        debug!("ResultStore: load {} tracks (first={})", tracks.len(), first);
        self.snapshot = tracks.clone();
        self.working = tracks;
        self.rev += 1;
        first
    }

    /// Reset the working copy to the snapshot.
    pub fn restore(&mut self) -> Result<()> {
        if self.working == self.snapshot {
            return Err(RadarError::NothingToRestore);
        }
        self.working = self.snapshot.clone();
        self.rev += 1;
        Ok(())
    }

    /// Swap in a curated list.  Every entry must already be in the working
    /// copy; anything else is rejected and the store is left untouched.
    pub fn replace(&mut self, new_order: Vec<Track>) -> Result<()> {
        let known: HashSet<&str> = self.working.iter().map(|t| t.uri.as_str()).collect();
        if let Some(stranger) = new_order.iter().find(|t| !known.contains(t.uri.as_str())) {
            return Err(RadarError::UnknownTrack(stranger.uri.clone()));
        }
        self.working = new_order;
        self.rev += 1;
        Ok(())
    }

    pub fn tracks(&self) -> &[Track] {
        &self.working
    }

    pub fn snapshot(&self) -> &[Track] {
        &self.snapshot
    }

    pub fn uris(&self) -> Vec<String> {
        self.working.iter().map(|t| t.uri.clone()).collect()
    }

    pub fn is_modified(&self) -> bool {
        self.working != self.snapshot
    }

    pub fn len(&self) -> usize {
        self.working.len()
    }

    pub fn is_empty(&self) -> bool {
        self.working.is_empty()
    }

    pub fn rev(&self) -> u64 {
        self.rev
    }
}

//! Export selection over the working copy, keyed by track URI.

use std::collections::HashSet;

use radar_proto::protocol::Track;

#[derive(Debug, Default, Clone)]
pub struct SelectionManager {
    selected: HashSet<String>,
    /// Every URI seen at the last reconcile.
    known: HashSet<String>,
}

impl SelectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the selection in line with a new working copy.
    ///
    /// Vanished URIs are dropped, URIs never seen before are selected, and
    /// existing choices are kept.  Running it twice on the same list changes
    /// nothing.
    pub fn reconcile<'a, I>(&mut self, current: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let current: HashSet<String> = current.into_iter().map(str::to_string).collect();
        let fresh: Vec<String> = current.difference(&self.known).cloned().collect();
        self.selected.retain(|uri| current.contains(uri));
        self.selected.extend(fresh);
        self.known = current;
    }

    /// Flip one URI.  Returns the new state.  Unknown URIs are ignored.
    pub fn toggle(&mut self, uri: &str) -> bool {
        if !self.known.contains(uri) {
            return false;
        }
        if !self.selected.remove(uri) {
            self.selected.insert(uri.to_string());
            return true;
        }
        false
    }

    /// Select or deselect exactly the given (visible) URIs; everything else
    /// keeps its state.
    pub fn set_all<'a, I>(&mut self, visible: I, selected: bool)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for uri in visible {
            if !self.known.contains(uri) {
                continue;
            }
            if selected {
                self.selected.insert(uri.to_string());
            } else {
                self.selected.remove(uri);
            }
        }
    }

    pub fn is_selected(&self, uri: &str) -> bool {
        self.selected.contains(uri)
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Selected URIs in working-copy order.
    pub fn ordered(&self, tracks: &[Track]) -> Vec<String> {
        tracks
            .iter()
            .filter(|t| self.selected.contains(&t.uri))
            .map(|t| t.uri.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.selected.clear();
        self.known.clear();
    }
}

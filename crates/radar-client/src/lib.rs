//! Client engine for release-radar.
//!
//! Follows a server-run release scan through the job API, keeps the results
//! as an editable working copy, and turns the user's selection into a
//! playlist.  `core::RadarCore` owns all of it; everything else here is a
//! component that the core drives.

pub mod automation;
pub mod core;
pub mod curation;
pub mod error;
pub mod export;
pub mod prompt;
pub mod reconciler;
pub mod results;
pub mod selection;
pub mod settings_store;
pub mod transport;

#[cfg(test)]
mod testing;

pub use error::{RadarError, Result};

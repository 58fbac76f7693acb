//! Shared data model for the release-radar client: remote job wire types,
//! filter settings, user config and platform paths.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod settings;

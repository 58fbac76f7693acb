use std::sync::Arc;

use chrono::NaiveDate;
use radar_proto::protocol::{ExportRequest, PlaylistRef};
use tracing::{info, warn};

use crate::error::{RadarError, Result};
use crate::transport::JobApi;

/// "New Releases 25.05.2024 - 01.06.2024"
pub fn default_playlist_name(start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "New Releases {} - {}",
        start.format("%d.%m.%Y"),
        end.format("%d.%m.%Y")
    )
}

/// Playlist id from an `open.spotify.com/playlist/<id>?...` style URL.
fn playlist_id_from_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("playlist/")?;
    let id = rest.split(['?', '/', '#']).next()?;
    (!id.is_empty()).then(|| id.to_string())
}

pub struct ExportCoordinator {
    api: Arc<dyn JobApi>,
}

impl ExportCoordinator {
    pub fn new(api: Arc<dyn JobApi>) -> Self {
        Self { api }
    }

    /// Create a playlist from `uris`, in the given order.
    pub async fn export(&self, name: &str, uris: Vec<String>) -> Result<PlaylistRef> {
        if uris.is_empty() {
            return Err(RadarError::EmptySelection);
        }
        let count = uris.len();
        let request = ExportRequest {
            name: name.to_string(),
            uris,
        };
        let response = self.api.export(&request).await?;

        if response.status != "success" {
            let message = response
                .message
                .unwrap_or_else(|| format!("export failed ({})", response.status));
            warn!("Export of {:?} rejected: {}", name, message);
            return Err(RadarError::ProviderRejected(message));
        }
        let Some(url) = response.playlist_url else {
            return Err(RadarError::ProviderRejected(
                "provider returned no playlist url".into(),
            ));
        };
        let id = response
            .playlist_id
            .or_else(|| playlist_id_from_url(&url))
            .unwrap_or_default();

        info!("Exported {} tracks to {:?} ({})", count, name, url);
        Ok(PlaylistRef { id, url })
    }
}

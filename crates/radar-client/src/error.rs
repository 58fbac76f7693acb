use radar_proto::protocol::ScanPhase;

#[derive(Debug, thiserror::Error)]
pub enum RadarError {
    /// Network or remote failure.  Always recoverable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server (or a local pre-check) rejected the request.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The provider refused to create the playlist.
    #[error("Export rejected: {0}")]
    ProviderRejected(String),

    #[error("Nothing selected to export")]
    EmptySelection,

    #[error("Working copy already matches the original results")]
    NothingToRestore,

    #[error("A scan is already running")]
    AlreadyRunning,

    #[error("Scan cannot be stopped while {0}")]
    NotStoppable(ScanPhase),

    /// A replacement list referenced a track outside the working copy.
    #[error("Unknown track in replacement: {0}")]
    UnknownTrack(String),

    #[error("Settings store error: {0}")]
    Settings(String),

    #[error("Core is not running")]
    CoreClosed,
}

impl RadarError {
    /// Precondition violations: shown as a notice, never fatal to the flow.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            RadarError::EmptySelection
                | RadarError::NothingToRestore
                | RadarError::AlreadyRunning
                | RadarError::NotStoppable(_)
        )
    }
}

impl From<reqwest::Error> for RadarError {
    fn from(e: reqwest::Error) -> Self {
        RadarError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RadarError>;

use crate::commands::Command;

/// Errors surfaced through [`PlayerStatus`](crate::commands::PlayerStatus).
///
/// Collaborator errors are carried as rendered messages so the enum stays
/// `Clone + PartialEq` and repeated identical statuses can be collapsed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlayerError {
    /// An invariant was violated. Always a bug in this crate.
    #[error("internal error: {0}")]
    Internal(String),

    /// The admission gate rejected the command.
    #[error("invalid command: {0}")]
    InvalidCommand(Command),

    #[error("failed to resolve item metadata: {0}")]
    ItemMetadataResolutionFailed(String),

    #[error("item playback failed: {0}")]
    ItemPlaybackFailed(String),

    #[error("engine error log entry: {0}")]
    EngineErrorLogEntry(String),

    #[error("failed to reach end of track: {0}")]
    FailedToReachEndOfTrack(String),

    /// The engine itself failed and cannot continue with the current item.
    #[error("engine failed: {0}")]
    EngineFailed(String),

    /// The audio session could not be configured for playback.
    #[error("audio session unavailable: {0}")]
    SessionUnavailable(String),
}

impl PlayerError {
    pub fn kind(&self) -> &'static str {
        match self {
            PlayerError::Internal(_) => "internal",
            PlayerError::InvalidCommand(_) => "invalid_command",
            PlayerError::ItemMetadataResolutionFailed(_) => "item_metadata_resolution_failed",
            PlayerError::ItemPlaybackFailed(_) => "item_playback_failed",
            PlayerError::EngineErrorLogEntry(_) => "engine_error_log_entry",
            PlayerError::FailedToReachEndOfTrack(_) => "failed_to_reach_end_of_track",
            PlayerError::EngineFailed(_) => "engine_failed",
            PlayerError::SessionUnavailable(_) => "session_unavailable",
        }
    }
}

pub type PlayerResult<T> = Result<T, PlayerError>;

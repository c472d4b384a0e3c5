use std::fmt::Display;

use crate::error::PlayerError;

/// Commands accepted by the player.
///
/// Every command supersedes whichever command is still executing when it arrives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Play the item at the current index, or resume it when paused
    Play,
    /// Play the item at the given index of the active queue
    PlayAt(usize),
    /// Skip to the next item
    Next,
    /// Restart the current item, or go back one item near its start
    Previous,
    /// Pause playback
    Pause,
    /// Stop playback and release the engine
    Stop,
    /// Move the play head, optionally resuming playback afterwards
    Seek { seconds: f64, should_play: bool },
    /// Resolve the current item without starting playback
    Prefetch,
}

impl Command {
    /// Whether the command may start a new load and so replace the engine.
    pub fn is_load(&self) -> bool {
        matches!(
            self,
            Command::Play | Command::PlayAt(_) | Command::Next | Command::Previous | Command::Prefetch
        )
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Play => write!(f, "play"),
            Command::PlayAt(index) => write!(f, "playAt({})", index),
            Command::Next => write!(f, "next"),
            Command::Previous => write!(f, "previous"),
            Command::Pause => write!(f, "pause"),
            Command::Stop => write!(f, "stop"),
            Command::Seek { seconds, should_play } => {
                write!(f, "seek({:.2}s, shouldPlay: {})", seconds, should_play)
            }
            Command::Prefetch => write!(f, "prefetch"),
        }
    }
}

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CommandSource {
    #[strum(serialize = "user")]
    User,
    #[strum(serialize = "auto")]
    Auto,
    #[strum(serialize = "remote")]
    Remote,
}

/// Player status as seen by observers.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PlayerStatus {
    #[default]
    Ready,
    Loading,
    Playing,
    Paused,
    /// The current item has been resolved but no engine was started
    ReadyToPlay,
    /// A transition failed; the next successful command clears it
    Failed(PlayerError),
    /// The engine was torn down; playback stays halted until play is issued
    Critical(PlayerError),
}

impl PlayerStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, PlayerStatus::Loading | PlayerStatus::Playing)
    }

    pub fn error(&self) -> Option<&PlayerError> {
        match self {
            PlayerStatus::Failed(err) | PlayerStatus::Critical(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for PlayerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerStatus::Ready => write!(f, "ready"),
            PlayerStatus::Loading => write!(f, "loading"),
            PlayerStatus::Playing => write!(f, "playing"),
            PlayerStatus::Paused => write!(f, "paused"),
            PlayerStatus::ReadyToPlay => write!(f, "readyToPlay"),
            PlayerStatus::Failed(err) => write!(f, "failed({})", err),
            PlayerStatus::Critical(err) => write!(f, "critical({})", err),
        }
    }
}

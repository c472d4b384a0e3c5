use std::{ sync::Arc, time::Duration };

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{ error::PlayerResult, item::PlayableHandle };

/// Notifications emitted by an engine instance about its own item.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The engine finished buffering and can play
    Ready,
    /// Periodic play-head report
    Progress { elapsed: Duration, loaded: f32 },
    /// The item played to its end
    EndOfTrack,
    /// Playback ran out of data
    Stalled,
    /// The engine cannot continue at all
    Failed(String),
    /// The current item failed to play; the engine itself is still usable
    ItemFailed(String),
    /// A non-fatal error was logged for the current item
    ErrorLogEntry(String),
    /// The item stopped before reaching its end
    FailedToReachEnd(String),
}

/// A live engine instance bound to exactly one item.
///
/// Owned by the player; dropping the last reference must release the
/// underlying output resources.
#[async_trait]
pub trait Engine: Send + Sync {
    fn play(&self);

    fn pause(&self);

    fn set_rate(&self, rate: f32);

    /// Current play-head position
    fn position(&self) -> Duration;

    /// Fraction of the item that has been loaded, 0.0 to 1.0
    fn loaded_progress(&self) -> f32;

    async fn seek(&self, position: Duration) -> PlayerResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}

/// Builds engine instances from playable handles.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self, handle: PlayableHandle) -> PlayerResult<Arc<dyn Engine>>;
}

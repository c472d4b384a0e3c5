use tokio::sync::broadcast;

use crate::error::PlayerResult;

/// Why the audio route changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RouteChangeReason {
    NewDeviceAvailable,
    /// The device that was playing went away (e.g. headphones unplugged)
    OldDeviceUnavailable,
    CategoryChange,
    Other,
}

/// Notifications from the platform audio session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    InterruptionBegan,
    InterruptionEnded { should_resume: bool },
    RouteChanged(RouteChangeReason),
}

/// The platform audio session.
pub trait AudioSession: Send + Sync {
    /// Configure the session for playback. Called once at construction.
    fn activate_for_playback(&self) -> PlayerResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}

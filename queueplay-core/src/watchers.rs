//! Translation of engine and session notifications into player reactions.
//!
//! The spawned watchers only forward notifications to the player mailbox;
//! the player decides what they mean against its current state, so a
//! notification is never judged on stale data.

use std::time::Duration;

use tokio::{ sync::{ broadcast, mpsc }, task::JoinHandle };
use tokio_util::sync::CancellationToken;

use crate::{
    commands::{ Command, PlayerStatus },
    engine::EngineEvent,
    error::PlayerError,
    executor::Msg,
    queue::RepeatMode,
    session::{ RouteChangeReason, SessionEvent },
    state::PlayerState,
};

/// What the player should do in response to a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    /// Set the status directly, bypassing admission
    SetStatus(PlayerStatus),
    /// Push an auto-command into the command stream
    Submit(Command),
    /// Pause and immediately resume the engine at the desired rate
    RecoverStall,
    /// Record the play-head position
    Progress { elapsed: Duration, loaded: f32 },
}

pub fn react_to_engine(event: &EngineEvent, state: &PlayerState) -> Vec<Reaction> {
    match event {
        EngineEvent::Ready => Vec::new(),
        EngineEvent::Progress { elapsed, loaded } => {
            vec![Reaction::Progress { elapsed: *elapsed, loaded: *loaded }]
        }
        EngineEvent::EndOfTrack => end_of_track(state),
        EngineEvent::Stalled => vec![Reaction::RecoverStall],
        EngineEvent::Failed(msg) => {
            vec![
                Reaction::SetStatus(PlayerStatus::Critical(PlayerError::EngineFailed(msg.clone()))),
                Reaction::Submit(Command::Stop)
            ]
        }
        EngineEvent::ItemFailed(msg) => {
            vec![Reaction::SetStatus(PlayerStatus::Failed(PlayerError::ItemPlaybackFailed(msg.clone())))]
        }
        EngineEvent::ErrorLogEntry(msg) => {
            vec![Reaction::SetStatus(PlayerStatus::Failed(PlayerError::EngineErrorLogEntry(msg.clone())))]
        }
        EngineEvent::FailedToReachEnd(msg) => {
            vec![
                Reaction::SetStatus(
                    PlayerStatus::Failed(PlayerError::FailedToReachEndOfTrack(msg.clone()))
                )
            ]
        }
    }
}

fn end_of_track(state: &PlayerState) -> Vec<Reaction> {
    match state.repeat_mode {
        RepeatMode::None => {
            if state.can_run(&Command::Next) {
                vec![Reaction::Submit(Command::Next)]
            } else {
                vec![Reaction::Submit(Command::Stop)]
            }
        }
        RepeatMode::One => {
            vec![Reaction::Submit(Command::Seek { seconds: 0.0, should_play: true })]
        }
        RepeatMode::All => {
            if state.is_last_index() {
                vec![Reaction::SetStatus(PlayerStatus::Paused), Reaction::Submit(Command::PlayAt(0))]
            } else {
                vec![Reaction::Submit(Command::Next)]
            }
        }
    }
}

pub fn react_to_session(event: &SessionEvent, state: &PlayerState) -> Vec<Reaction> {
    match event {
        SessionEvent::InterruptionBegan => vec![Reaction::SetStatus(PlayerStatus::Paused)],
        SessionEvent::InterruptionEnded { should_resume: true } if state.can_run(&Command::Play) => {
            vec![Reaction::Submit(Command::Play)]
        }
        SessionEvent::InterruptionEnded { .. } => Vec::new(),
        SessionEvent::RouteChanged(RouteChangeReason::OldDeviceUnavailable)
            if state.status == PlayerStatus::Playing =>
        {
            vec![Reaction::SetStatus(PlayerStatus::Paused)]
        }
        SessionEvent::RouteChanged(_) => Vec::new(),
    }
}

/// Forward the events of one engine instance until `token` is cancelled.
pub(crate) fn spawn_engine_watcher(
    generation: u64,
    mut events: broadcast::Receiver<EngineEvent>,
    mailbox: mpsc::UnboundedSender<Msg>,
    token: CancellationToken
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => {
                        if mailbox.send(Msg::Engine { generation, event }).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Engine watcher #{} lagged by {} events", generation, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        log::debug!("Engine watcher #{} stopped", generation);
    })
}

/// Forward audio session events for the lifetime of the player.
pub(crate) fn spawn_session_watcher(
    mut events: broadcast::Receiver<SessionEvent>,
    mailbox: mpsc::UnboundedSender<Msg>,
    token: CancellationToken
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => {
                        if mailbox.send(Msg::Session(event)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Session watcher lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        log::debug!("Session watcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::item::PlayerItem;

    fn state(len: usize, index: usize, repeat_mode: RepeatMode) -> PlayerState {
        PlayerState {
            status: PlayerStatus::Playing,
            play_index: index,
            queue: (0..len).map(|i| Arc::new(PlayerItem::new(format!("item-{}", i)))).collect(),
            repeat_mode,
            has_engine: true,
            ..Default::default()
        }
    }

    #[test]
    fn end_of_track_without_repeat_advances_or_stops() {
        assert_eq!(
            react_to_engine(&EngineEvent::EndOfTrack, &state(3, 0, RepeatMode::None)),
            vec![Reaction::Submit(Command::Next)]
        );
        assert_eq!(
            react_to_engine(&EngineEvent::EndOfTrack, &state(3, 2, RepeatMode::None)),
            vec![Reaction::Submit(Command::Stop)]
        );
    }

    #[test]
    fn end_of_track_repeat_one_restarts() {
        assert_eq!(
            react_to_engine(&EngineEvent::EndOfTrack, &state(3, 1, RepeatMode::One)),
            vec![Reaction::Submit(Command::Seek { seconds: 0.0, should_play: true })]
        );
    }

    #[test]
    fn end_of_track_repeat_all_wraps_at_the_end() {
        assert_eq!(
            react_to_engine(&EngineEvent::EndOfTrack, &state(3, 2, RepeatMode::All)),
            vec![Reaction::SetStatus(PlayerStatus::Paused), Reaction::Submit(Command::PlayAt(0))]
        );
        assert_eq!(
            react_to_engine(&EngineEvent::EndOfTrack, &state(3, 1, RepeatMode::All)),
            vec![Reaction::Submit(Command::Next)]
        );
    }

    #[test]
    fn fatal_engine_failure_is_critical_and_stops() {
        let reactions = react_to_engine(&EngineEvent::Failed("gone".into()), &state(1, 0, RepeatMode::None));
        assert_eq!(
            reactions,
            vec![
                Reaction::SetStatus(PlayerStatus::Critical(PlayerError::EngineFailed("gone".into()))),
                Reaction::Submit(Command::Stop)
            ]
        );
    }

    #[test]
    fn interruption_end_resumes_only_when_allowed() {
        let mut paused = state(2, 0, RepeatMode::None);
        paused.status = PlayerStatus::Paused;
        let resume = SessionEvent::InterruptionEnded { should_resume: true };

        assert_eq!(react_to_session(&resume, &paused), vec![Reaction::Submit(Command::Play)]);
        assert!(react_to_session(&resume, &state(2, 0, RepeatMode::None)).is_empty());
        assert!(
            react_to_session(&SessionEvent::InterruptionEnded { should_resume: false }, &paused)
                .is_empty()
        );
    }

    #[test]
    fn unplugged_output_pauses_playback() {
        let unplugged = SessionEvent::RouteChanged(RouteChangeReason::OldDeviceUnavailable);
        assert_eq!(
            react_to_session(&unplugged, &state(1, 0, RepeatMode::None)),
            vec![Reaction::SetStatus(PlayerStatus::Paused)]
        );
        let new_device = SessionEvent::RouteChanged(RouteChangeReason::NewDeviceAvailable);
        assert!(react_to_session(&new_device, &state(1, 0, RepeatMode::None)).is_empty());
    }
}

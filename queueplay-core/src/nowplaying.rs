use std::{ collections::HashMap, sync::Arc, time::Duration };

use strum::{ EnumIter, IntoEnumIterator };
use tokio::{ sync::{ mpsc, watch }, task::JoinHandle };
use tokio_util::sync::CancellationToken;

use crate::{ commands::Command, executor::Msg, state::PlayerState };

/// Actions coming from hardware keys or the lock screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportAction {
    Play,
    Pause,
    TogglePlayPause,
    NextTrack,
    PreviousTrack,
    Stop,
    ChangePlaybackPosition(Duration),
}

/// Controls whose enabled state is mirrored on the transport surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, strum::Display)]
pub enum TransportControl {
    Play,
    Pause,
    TogglePlayPause,
    NextTrack,
    PreviousTrack,
    Stop,
    ChangePlaybackPosition,
}

impl TransportControl {
    fn is_enabled(self, state: &PlayerState) -> bool {
        match self {
            TransportControl::Play => state.can_run(&Command::Play),
            TransportControl::Pause => state.can_run(&Command::Pause),
            TransportControl::TogglePlayPause => {
                state.can_run(&Command::Play) || state.can_run(&Command::Pause)
            }
            TransportControl::NextTrack => state.can_run(&Command::Next),
            TransportControl::PreviousTrack => state.can_run(&Command::Previous),
            TransportControl::Stop => state.can_run(&Command::Stop),
            TransportControl::ChangePlaybackPosition => {
                state.can_run(&Command::Seek { seconds: 0.0, should_play: false })
            }
        }
    }
}

/// Translate a transport action into the player's command vocabulary.
pub fn command_for(action: TransportAction, state: &PlayerState) -> Command {
    match action {
        TransportAction::Play => Command::Play,
        TransportAction::Pause => Command::Pause,
        TransportAction::TogglePlayPause => {
            if state.can_run(&Command::Pause) { Command::Pause } else { Command::Play }
        }
        TransportAction::NextTrack => Command::Next,
        TransportAction::PreviousTrack => Command::Previous,
        TransportAction::Stop => Command::Stop,
        TransportAction::ChangePlaybackPosition(position) => Command::Seek {
            seconds: position.as_secs_f64(),
            should_play: state.status == crate::commands::PlayerStatus::Playing,
        },
    }
}

/// What the transport surface displays for the current item.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlayingInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<Duration>,
    pub elapsed: Duration,
    pub queue_count: usize,
    pub queue_index: usize,
    pub rate: f32,
}

impl NowPlayingInfo {
    /// `None` when there is nothing to show.
    pub fn from_state(state: &PlayerState) -> Option<Self> {
        state.current_item()?;
        let meta = state.current_meta.clone().unwrap_or_default();
        Some(Self {
            title: meta.title,
            artist: meta.artist,
            album: meta.album,
            duration: meta.duration,
            elapsed: state.elapsed,
            queue_count: state.queue.len(),
            queue_index: state.play_index,
            rate: state.effective_rate(),
        })
    }
}

/// Sink through which a transport surface injects remote commands.
#[derive(Clone)]
pub struct RemoteCommands {
    mailbox: mpsc::UnboundedSender<Msg>,
}

impl RemoteCommands {
    pub(crate) fn new(mailbox: mpsc::UnboundedSender<Msg>) -> Self {
        Self { mailbox }
    }

    /// Returns false once the player is gone.
    pub fn send(&self, action: TransportAction) -> bool {
        log::debug!("Remote action {:?}", action);
        self.mailbox.send(Msg::Remote(action)).is_ok()
    }
}

/// The external transport-control surface (media keys, lock screen, ...).
pub trait TransportSurface: Send + Sync {
    /// Called once when the player starts; keep `remote` to inject actions.
    fn register(&self, remote: RemoteCommands);

    fn set_enabled(&self, control: TransportControl, enabled: bool);

    /// `None` clears the display.
    fn set_now_playing(&self, info: Option<&NowPlayingInfo>);
}

/// Mirror the player state onto `surface` until `token` is cancelled.
pub(crate) fn spawn_publisher(
    surface: Arc<dyn TransportSurface>,
    mut state_rx: watch::Receiver<PlayerState>,
    token: CancellationToken
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_info: Option<NowPlayingInfo> = None;
        let mut last_epoch = None;
        let mut enabled: HashMap<TransportControl, bool> = HashMap::new();

        loop {
            let state = state_rx.borrow_and_update().clone();

            let info = NowPlayingInfo::from_state(&state);
            if info != last_info || last_epoch != Some(state.refresh_epoch) {
                surface.set_now_playing(info.as_ref());
                last_info = info;
                last_epoch = Some(state.refresh_epoch);
            }

            for control in TransportControl::iter() {
                let now = control.is_enabled(&state);
                if enabled.insert(control, now) != Some(now) {
                    surface.set_enabled(control, now);
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        surface.set_now_playing(None);
        log::debug!("Now-playing publisher stopped");
    })
}

use crate::commands::{ Command, PlayerStatus };

/// Decide whether `cmd` may run against the given state.
///
/// This is the single source of truth for both the executor and the
/// enabled state of UI affordances and transport controls.
pub fn can_run(
    status: &PlayerStatus,
    play_index: usize,
    queue_len: usize,
    has_engine: bool,
    cmd: &Command,
) -> bool {
    match cmd {
        Command::Play => !status.is_active(),
        Command::PlayAt(index) => !status.is_active() && *index < queue_len,
        Command::Pause => status.is_active(),
        Command::Next => play_index + 1 < queue_len,
        Command::Previous | Command::Stop => true,
        Command::Seek { .. } => {
            has_engine
                && matches!(
                    status,
                    PlayerStatus::Ready
                        | PlayerStatus::Playing
                        | PlayerStatus::Paused
                        | PlayerStatus::ReadyToPlay
                )
        }
        Command::Prefetch => !status.is_active(),
    }
}

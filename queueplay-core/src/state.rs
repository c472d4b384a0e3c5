use std::{ sync::Arc, time::Duration };

use tokio::sync::{ broadcast, watch };
use tokio_util::sync::CancellationToken;

use crate::{
    admission,
    commands::{ Command, PlayerStatus },
    item::PlayerItem,
    metadata::ItemMeta,
    queue::{ RepeatMode, ShuffleMode },
};

/// Published snapshot of everything observers may read.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub status: PlayerStatus,
    pub play_index: usize,
    /// Active queue ordering
    pub queue: Vec<Arc<PlayerItem>>,
    pub shuffle_mode: ShuffleMode,
    pub repeat_mode: RepeatMode,
    pub desired_rate: f32,
    pub has_engine: bool,
    pub current_meta: Option<ItemMeta>,
    pub elapsed: Duration,
    pub loaded_progress: f32,
    /// Bumped whenever the now-playing display must be pushed again
    pub refresh_epoch: u64,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            status: PlayerStatus::Ready,
            play_index: 0,
            queue: Vec::new(),
            shuffle_mode: ShuffleMode::Off,
            repeat_mode: RepeatMode::None,
            desired_rate: 1.0,
            has_engine: false,
            current_meta: None,
            elapsed: Duration::ZERO,
            loaded_progress: 0.0,
            refresh_epoch: 0,
        }
    }
}

impl PlayerState {
    pub fn can_run(&self, cmd: &Command) -> bool {
        admission::can_run(&self.status, self.play_index, self.queue.len(), self.has_engine, cmd)
    }

    pub fn current_item(&self) -> Option<&Arc<PlayerItem>> {
        self.queue.get(self.play_index)
    }

    pub fn current_duration(&self) -> Option<Duration> {
        self.current_meta.as_ref().and_then(|meta| meta.duration)
    }

    pub fn is_last_index(&self) -> bool {
        self.play_index + 1 >= self.queue.len()
    }

    /// Rate the output is actually running at: zero unless playing.
    pub fn effective_rate(&self) -> f32 {
        if self.status == PlayerStatus::Playing { self.desired_rate } else { 0.0 }
    }
}

type Selector<T> = Box<dyn Fn(&PlayerState) -> T + Send + Sync>;

/// A de-duplicated view on one aspect of the player state.
pub struct Projection<T> {
    rx: watch::Receiver<PlayerState>,
    select: Selector<T>,
    last: Option<T>,
    closed: CancellationToken,
}

impl<T: Clone + PartialEq> Projection<T> {
    pub(crate) fn new(
        rx: watch::Receiver<PlayerState>,
        closed: CancellationToken,
        select: impl Fn(&PlayerState) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            select: Box::new(select),
            last: None,
            closed,
        }
    }

    /// Current value, without waiting.
    pub fn get(&self) -> T {
        (self.select)(&*self.rx.borrow())
    }

    /// The current value on the first call, then every distinct change.
    ///
    /// Returns `None` once the player has been torn down.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            let value = {
                let state = self.rx.borrow_and_update();
                (self.select)(&*state)
            };
            if self.last.as_ref() != Some(&value) {
                self.last = Some(value.clone());
                return Some(value);
            }
            tokio::select! {
                _ = self.closed.cancelled() => return None,
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

/// Every distinct status the player goes through, in order.
pub struct StatusStream {
    current: Option<PlayerStatus>,
    rx: broadcast::Receiver<PlayerStatus>,
    closed: CancellationToken,
}

impl StatusStream {
    pub(crate) fn new(
        current: PlayerStatus,
        rx: broadcast::Receiver<PlayerStatus>,
        closed: CancellationToken,
    ) -> Self {
        Self { current: Some(current), rx, closed }
    }

    /// Returns `None` once the player has been torn down.
    pub async fn next(&mut self) -> Option<PlayerStatus> {
        if let Some(status) = self.current.take() {
            return Some(status);
        }
        loop {
            tokio::select! {
                biased;
                received = self.rx.recv() => match received {
                    Ok(status) => return Some(status),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Status stream lagged by {} updates; catching up", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                _ = self.closed.cancelled() => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_rate_is_zero_unless_playing() {
        let mut state = PlayerState { desired_rate: 1.5, ..Default::default() };
        assert_eq!(state.effective_rate(), 0.0);
        state.status = PlayerStatus::Playing;
        assert_eq!(state.effective_rate(), 1.5);
        state.status = PlayerStatus::Paused;
        assert_eq!(state.effective_rate(), 0.0);
    }

    #[tokio::test]
    async fn projection_skips_unrelated_changes() {
        let (tx, rx) = watch::channel(PlayerState::default());
        let mut index = Projection::new(rx, CancellationToken::new(), |s| s.play_index);

        assert_eq!(index.next().await, Some(0));
        tx.send_modify(|s| s.desired_rate = 2.0);
        tx.send_modify(|s| s.play_index = 4);
        assert_eq!(index.next().await, Some(4));
    }

    #[tokio::test]
    async fn projection_ends_when_closed() {
        let (_tx, rx) = watch::channel(PlayerState::default());
        let closed = CancellationToken::new();
        let mut status = Projection::new(rx, closed.clone(), |s| s.status.clone());

        assert_eq!(status.next().await, Some(PlayerStatus::Ready));
        closed.cancel();
        assert_eq!(status.next().await, None);
    }
}

use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::{ Deserialize, Serialize };
use strum::EnumIter;

use crate::item::PlayerItem;

/// Shuffle mode for queue ordering
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, EnumIter, strum::Display, Serialize, Deserialize
)]
#[serde(rename_all = "lowercase")]
pub enum ShuffleMode {
    #[default]
    #[strum(serialize = "➡️ Off")]
    Off,
    #[strum(serialize = "🔀 Songs")]
    Songs,
}

/// What happens when the current item plays to its end
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, EnumIter, strum::Display, Serialize, Deserialize
)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    #[strum(serialize = "➡️ None")]
    None,
    #[strum(serialize = "🔂 One")]
    One,
    #[strum(serialize = "🔁 All")]
    All,
}

impl ShuffleMode {
    pub fn toggled(self) -> Self {
        match self {
            ShuffleMode::Off => ShuffleMode::Songs,
            ShuffleMode::Songs => ShuffleMode::Off,
        }
    }
}

impl RepeatMode {
    /// Cycle none -> all -> one -> none
    pub fn cycled(self) -> Self {
        match self {
            RepeatMode::None => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::None,
        }
    }
}

/// The play queue: insertion-ordered master list plus the active ordering.
///
/// `active` is always a permutation of `master`; with shuffle off both are equal.
#[derive(Debug, Clone, Default)]
pub struct PlaybackQueue {
    master: Vec<Arc<PlayerItem>>,
    active: Vec<Arc<PlayerItem>>,
    shuffle_mode: ShuffleMode,
}

impl PlaybackQueue {
    pub fn new(items: Vec<Arc<PlayerItem>>) -> Self {
        Self {
            active: items.clone(),
            master: items,
            shuffle_mode: ShuffleMode::Off,
        }
    }

    /// Append items at the end of both orderings
    pub fn append(&mut self, items: Vec<Arc<PlayerItem>>) {
        self.master.extend(items.iter().cloned());
        self.active.extend(items);
    }

    /// Re-derive the active ordering for `mode`.
    ///
    /// The item at `current` stays the current item; returns its index in the
    /// new ordering. Shuffling keeps it at `current`.
    pub fn set_shuffle_mode(&mut self, mode: ShuffleMode, current: usize) -> usize {
        let pinned = self.active.get(current).cloned();
        self.shuffle_mode = mode;

        match (mode, pinned) {
            (ShuffleMode::Off, pinned) => {
                self.active = self.master.clone();
                pinned
                    .and_then(|item| self.master.iter().position(|m| Arc::ptr_eq(m, &item)))
                    .unwrap_or(current)
            }
            (ShuffleMode::Songs, Some(item)) => {
                self.active = shuffled_around(&self.master, &item, current);
                current
            }
            (ShuffleMode::Songs, None) => {
                let mut all = self.master.clone();
                all.shuffle(&mut rand::rng());
                self.active = all;
                current
            }
        }
    }

    pub fn shuffle_mode(&self) -> ShuffleMode {
        self.shuffle_mode
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Get item by index in the active ordering
    pub fn get(&self, index: usize) -> Option<&Arc<PlayerItem>> {
        self.active.get(index)
    }

    /// Index of `item` in the active ordering
    pub fn position_of(&self, item: &Arc<PlayerItem>) -> Option<usize> {
        self.active.iter().position(|it| Arc::ptr_eq(it, item))
    }

    pub fn active(&self) -> &[Arc<PlayerItem>] {
        &self.active
    }

    pub fn master(&self) -> &[Arc<PlayerItem>] {
        &self.master
    }
}

/// Shuffle every element except `pinned`, which is placed at `index`.
fn shuffled_around(
    items: &[Arc<PlayerItem>],
    pinned: &Arc<PlayerItem>,
    index: usize
) -> Vec<Arc<PlayerItem>> {
    let mut rest = items.to_vec();
    if let Some(at) = rest.iter().position(|item| Arc::ptr_eq(item, pinned)) {
        rest.remove(at);
    }
    rest.shuffle(&mut rand::rng());
    rest.insert(index.min(rest.len()), Arc::clone(pinned));
    rest
}

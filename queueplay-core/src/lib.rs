pub mod admission;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod item;
pub mod loader;
pub mod metadata;
pub mod nowplaying;
pub mod player;
pub mod queue;
pub mod session;
pub mod sim;
pub mod state;
pub mod watchers;

pub(crate) mod executor;

pub use commands::{ Command, CommandSource, PlayerStatus };
pub use config::PlayerConfig;
pub use error::{ PlayerError, PlayerResult };
pub use executor::Backend;
pub use item::PlayerItem;
pub use metadata::ItemMeta;
pub use player::{ Player, PlayerHandle };
pub use queue::{ RepeatMode, ShuffleMode };
pub use state::PlayerState;

/// Install the `env_logger` backend. `RUST_LOG` overrides the default filter.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("queueplay=info")
    ).try_init();
}

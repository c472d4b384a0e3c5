use std::{ sync::Arc, time::Duration };

use tokio::{ sync::{ mpsc, watch }, task::JoinHandle };

use crate::{
    commands::{ Command, CommandSource, PlayerStatus },
    config::PlayerConfig,
    error::{ PlayerError, PlayerResult },
    executor::{ Backend, Core, Msg, Shared },
    item::PlayerItem,
    metadata::{ ItemMeta, display_time },
    nowplaying::{ self, RemoteCommands },
    queue::{ RepeatMode, ShuffleMode },
    state::{ PlayerState, Projection, StatusStream },
    watchers,
};

/// The player actor. Owns the command mailbox and drives the state machine.
pub struct Player {
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<Msg>,
}

/// Communication handle to a running [`Player`]. Cheap to clone.
#[derive(Clone)]
pub struct PlayerHandle {
    shared: Arc<Shared>,
}

impl Player {
    /// Create a player over `items`.
    ///
    /// Fails only if the config is invalid or the audio session cannot be
    /// configured for playback.
    pub fn new(
        items: Vec<PlayerItem>,
        config: PlayerConfig,
        backend: Backend,
    ) -> PlayerResult<(Player, PlayerHandle)> {
        config.validate()?;
        backend.session.activate_for_playback()?;

        let items = items.into_iter().map(Arc::new).collect();
        let core = Core::new(items, &config);
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(core, backend, config, tx));

        let handle = PlayerHandle { shared: Arc::clone(&shared) };
        Ok((Player { shared, rx }, handle))
    }

    /// Spawn the actor together with its session watcher and now-playing publisher.
    pub fn spawn(self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);

        watchers::spawn_session_watcher(
            shared.backend.session.subscribe(),
            shared.mailbox.clone(),
            shared.shutdown.child_token(),
        );

        if let Some(surface) = &shared.backend.transport {
            surface.register(RemoteCommands::new(shared.mailbox.clone()));
            nowplaying::spawn_publisher(
                Arc::clone(surface),
                shared.state_tx.subscribe(),
                shared.shutdown.child_token(),
            );
        }

        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        log::info!("Player started with {} items", self.shared.lock().snapshot().queue.len());

        loop {
            let msg = tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            if matches!(msg, Msg::Shutdown) {
                break;
            }
            self.shared.handle(msg);
        }

        self.shared.teardown();
    }
}

impl PlayerHandle {
    fn post(&self, msg: Msg) -> PlayerResult<()> {
        self.shared
            .mailbox
            .send(msg)
            .map_err(|_| PlayerError::Internal("player is not running".into()))
    }

    /// Submit a command. Its effect shows up on the status stream.
    pub fn send(&self, cmd: Command) -> PlayerResult<()> {
        self.post(Msg::Command(cmd, CommandSource::User))
    }

    pub fn append(&self, items: Vec<PlayerItem>) -> PlayerResult<()> {
        self.post(Msg::Append(items.into_iter().map(Arc::new).collect()))
    }

    pub fn set_shuffle_mode(&self, mode: ShuffleMode) -> PlayerResult<()> {
        self.post(Msg::SetShuffle(mode))
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) -> PlayerResult<()> {
        self.post(Msg::SetRepeat(mode))
    }

    pub fn set_desired_rate(&self, rate: f32) -> PlayerResult<()> {
        self.post(Msg::SetRate(rate))
    }

    /// Sink for injecting transport actions, as a transport surface would.
    pub fn remote(&self) -> RemoteCommands {
        RemoteCommands::new(self.shared.mailbox.clone())
    }

    /// Stop the player and release the engine. Streams end afterwards.
    pub fn shutdown(&self) {
        let _ = self.post(Msg::Shutdown);
    }

    /// Distinct statuses, starting with the current one.
    pub fn status(&self) -> StatusStream {
        let core = self.shared.lock();
        StatusStream::new(
            core.published_status(),
            self.shared.status_tx.subscribe(),
            self.shared.shutdown.clone(),
        )
    }

    pub fn state(&self) -> watch::Receiver<PlayerState> {
        self.shared.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> PlayerState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn can_run(&self, cmd: Command) -> bool {
        self.shared.state_tx.borrow().can_run(&cmd)
    }

    fn project<T: Clone + PartialEq>(
        &self,
        select: impl Fn(&PlayerState) -> T + Send + Sync + 'static,
    ) -> Projection<T> {
        Projection::new(self.state(), self.shared.shutdown.clone(), select)
    }

    pub fn watch_can_run(&self, cmd: Command) -> Projection<bool> {
        self.project(move |state| state.can_run(&cmd))
    }

    pub fn current_item_meta(&self) -> Projection<Option<ItemMeta>> {
        self.project(|state| state.current_meta.clone())
    }

    pub fn current_item_title(&self) -> Projection<Option<String>> {
        self.project(|state| state.current_meta.as_ref().and_then(|m| m.title.clone()))
    }

    pub fn current_item_time(&self) -> Projection<Duration> {
        self.project(|state| state.elapsed)
    }

    pub fn current_item_time_display(&self) -> Projection<String> {
        self.project(|state| display_time(state.elapsed))
    }

    pub fn current_item_duration(&self) -> Projection<Option<Duration>> {
        self.project(|state| state.current_duration())
    }

    pub fn current_item_duration_display(&self) -> Projection<String> {
        self.project(|state| {
            display_time(state.current_duration().unwrap_or_default())
        })
    }

    pub fn current_item_loaded_progress_rate(&self) -> Projection<f32> {
        self.project(|state| state.loaded_progress)
    }

    pub fn player_index(&self) -> Projection<usize> {
        self.project(|state| state.play_index)
    }

    pub fn shuffle_mode(&self) -> Projection<ShuffleMode> {
        self.project(|state| state.shuffle_mode)
    }

    pub fn repeat_mode(&self) -> Projection<RepeatMode> {
        self.project(|state| state.repeat_mode)
    }

    /// Locators of the active queue, in play order.
    pub fn queue(&self) -> Projection<Vec<String>> {
        self.project(|state| state.queue.iter().map(|item| item.url().to_string()).collect())
    }

    pub fn desired_rate(&self) -> Projection<f32> {
        self.project(|state| state.desired_rate)
    }

    pub fn current_status(&self) -> PlayerStatus {
        self.shared.state_tx.borrow().status.clone()
    }
}

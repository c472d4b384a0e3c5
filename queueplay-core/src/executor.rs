//! The playback state machine.
//!
//! All state lives in [`Core`] behind one mutex. Commands are applied by the
//! player actor in arrival order; the slow part of a command (resolving an
//! item, building an engine, seeking) runs in a spawned pipeline that holds a
//! cancellation token. A new command cancels the previous token under the
//! lock, and a pipeline re-checks its token under the same lock before it
//! commits anything, so an obsolete pipeline can never apply its result.

use std::{
    sync::{ Arc, Mutex, MutexGuard, PoisonError },
    time::Duration,
};

use tokio::sync::{ broadcast, mpsc, watch };
use tokio_util::sync::CancellationToken;

use crate::{
    admission,
    commands::{ Command, CommandSource, PlayerStatus },
    config::PlayerConfig,
    engine::{ Engine, EngineEvent, EngineFactory },
    error::PlayerError,
    item::{ ItemResolver, PlayerItem },
    metadata::ItemMeta,
    nowplaying::{ self, TransportAction },
    queue::{ PlaybackQueue, RepeatMode, ShuffleMode },
    session::SessionEvent,
    state::PlayerState,
    watchers::{ self, Reaction },
};

/// Everything the player actor consumes, from every producer.
#[derive(Debug)]
pub(crate) enum Msg {
    Command(Command, CommandSource),
    Remote(TransportAction),
    Engine { generation: u64, event: EngineEvent },
    Session(SessionEvent),
    Append(Vec<Arc<PlayerItem>>),
    SetShuffle(ShuffleMode),
    SetRepeat(RepeatMode),
    SetRate(f32),
    Shutdown,
}

/// The engine currently owned by the player.
struct EngineSlot {
    engine: Arc<dyn Engine>,
    item: Arc<PlayerItem>,
    generation: u64,
    watcher: CancellationToken,
}

/// The command pipeline still in flight.
struct Pipeline {
    token: CancellationToken,
    /// Status to fall back to if the pipeline is cancelled while `Loading`
    restore: Option<PlayerStatus>,
}

pub(crate) struct Core {
    queue: PlaybackQueue,
    status: PlayerStatus,
    published: PlayerStatus,
    play_index: usize,
    repeat_mode: RepeatMode,
    desired_rate: f32,
    engine: Option<EngineSlot>,
    pipeline: Option<Pipeline>,
    next_generation: u64,
    current_meta: Option<ItemMeta>,
    elapsed: Duration,
    loaded_progress: f32,
    refresh_epoch: u64,
    start_paused: bool,
}

impl Core {
    pub(crate) fn new(items: Vec<Arc<PlayerItem>>, config: &PlayerConfig) -> Self {
        let current_meta = items.first().and_then(|item| item.meta());
        Self {
            queue: PlaybackQueue::new(items),
            status: PlayerStatus::Ready,
            published: PlayerStatus::Ready,
            play_index: 0,
            repeat_mode: RepeatMode::None,
            desired_rate: config.initial_rate,
            engine: None,
            pipeline: None,
            next_generation: 0,
            current_meta,
            elapsed: Duration::ZERO,
            loaded_progress: 0.0,
            refresh_epoch: 0,
            start_paused: config.start_paused,
        }
    }

    pub(crate) fn snapshot(&self) -> PlayerState {
        PlayerState {
            status: self.status.clone(),
            play_index: self.play_index,
            queue: self.queue.active().to_vec(),
            shuffle_mode: self.queue.shuffle_mode(),
            repeat_mode: self.repeat_mode,
            desired_rate: self.desired_rate,
            has_engine: self.engine.is_some(),
            current_meta: self.current_meta.clone(),
            elapsed: self.elapsed,
            loaded_progress: self.loaded_progress,
            refresh_epoch: self.refresh_epoch,
        }
    }

    pub(crate) fn published_status(&self) -> PlayerStatus {
        self.published.clone()
    }

    /// Cancel the in-flight pipeline; returns the status its cancellation rolls back to.
    fn preempt(&mut self) -> Option<PlayerStatus> {
        let pipeline = self.pipeline.take()?;
        pipeline.token.cancel();
        log::debug!("Cancelled in-flight pipeline");
        match (&self.status, pipeline.restore) {
            (PlayerStatus::Loading, Some(restore)) => Some(restore),
            _ => None,
        }
    }

    fn begin_pipeline(&mut self, restore: Option<PlayerStatus>) -> CancellationToken {
        let token = CancellationToken::new();
        self.pipeline = Some(Pipeline { token: token.clone(), restore });
        token
    }

    /// Only called by a pipeline whose token is still live, i.e. the current one.
    fn finish_pipeline(&mut self) {
        self.pipeline = None;
    }

    /// Pause and drop the current engine, if any.
    fn discard_engine(&mut self) {
        if let Some(slot) = self.engine.take() {
            slot.engine.pause();
            slot.watcher.cancel();
            log::info!("Released engine #{} for {}", slot.generation, slot.item.url());
        }
    }

    fn resume(&mut self) {
        if let Some(slot) = &self.engine {
            slot.engine.set_rate(self.desired_rate);
            slot.engine.play();
        }
        self.status = PlayerStatus::Playing;
    }
}

/// Collaborators the player drives.
#[derive(Clone)]
pub struct Backend {
    pub resolver: Arc<dyn ItemResolver>,
    pub engines: Arc<dyn EngineFactory>,
    pub session: Arc<dyn crate::session::AudioSession>,
    pub transport: Option<Arc<dyn nowplaying::TransportSurface>>,
}

pub(crate) struct Shared {
    core: Mutex<Core>,
    pub(crate) state_tx: watch::Sender<PlayerState>,
    pub(crate) status_tx: broadcast::Sender<PlayerStatus>,
    pub(crate) backend: Backend,
    pub(crate) mailbox: mpsc::UnboundedSender<Msg>,
    pub(crate) config: PlayerConfig,
    pub(crate) shutdown: CancellationToken,
}

impl Shared {
    pub(crate) fn new(
        core: Core,
        backend: Backend,
        config: PlayerConfig,
        mailbox: mpsc::UnboundedSender<Msg>
    ) -> Self {
        let (state_tx, _) = watch::channel(core.snapshot());
        let (status_tx, _) = broadcast::channel(config.status_capacity);
        Self {
            core: Mutex::new(core),
            state_tx,
            status_tx,
            backend,
            mailbox,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push the current state to observers. Identical statuses are collapsed.
    fn publish(&self, core: &mut Core) {
        if core.status != core.published {
            log::debug!("Status {} -> {}", core.published, core.status);
            core.published = core.status.clone();
            // No receivers is fine: nobody is watching the status yet.
            let _ = self.status_tx.send(core.status.clone());
        }
        self.state_tx.send_replace(core.snapshot());
    }

    pub(crate) fn handle(self: &Arc<Self>, msg: Msg) {
        match msg {
            Msg::Command(cmd, source) => self.execute(cmd, source),
            Msg::Remote(action) => {
                let cmd = nowplaying::command_for(action, &self.lock().snapshot());
                self.execute(cmd, CommandSource::Remote);
            }
            Msg::Engine { generation, event } => self.on_engine_event(generation, event),
            Msg::Session(event) => {
                log::info!("Audio session event {:?}", event);
                let mut core = self.lock();
                let reactions = watchers::react_to_session(&event, &core.snapshot());
                self.apply(&mut core, reactions);
                self.publish(&mut core);
            }
            Msg::Append(items) => {
                let mut core = self.lock();
                log::info!("Appending {} items to the queue", items.len());
                core.queue.append(items);
                self.publish(&mut core);
            }
            Msg::SetShuffle(mode) => {
                let mut core = self.lock();
                let current = core.play_index;
                core.play_index = core.queue.set_shuffle_mode(mode, current);
                log::info!("Shuffle mode set to {:?}", mode);
                self.publish(&mut core);
            }
            Msg::SetRepeat(mode) => {
                let mut core = self.lock();
                core.repeat_mode = mode;
                log::info!("Repeat mode set to {:?}", mode);
                self.publish(&mut core);
            }
            Msg::SetRate(rate) => self.set_rate(rate),
            Msg::Shutdown => {}
        }
    }

    fn set_rate(&self, rate: f32) {
        if !rate.is_finite() || rate < 0.0 {
            log::warn!("Ignoring invalid playback rate {}", rate);
            return;
        }
        let mut core = self.lock();
        core.desired_rate = rate;
        if core.status == PlayerStatus::Playing && rate != 0.0 {
            if let Some(slot) = &core.engine {
                slot.engine.set_rate(rate);
            }
        }
        self.publish(&mut core);
    }

    fn on_engine_event(self: &Arc<Self>, generation: u64, event: EngineEvent) {
        let mut core = self.lock();
        if core.engine.as_ref().map(|slot| slot.generation) != Some(generation) {
            log::trace!("Dropping {:?} from retired engine #{}", event, generation);
            return;
        }
        if !matches!(event, EngineEvent::Progress { .. }) {
            log::debug!("Engine #{} event {:?}", generation, event);
        }
        let reactions = watchers::react_to_engine(&event, &core.snapshot());
        self.apply(&mut core, reactions);
        self.publish(&mut core);
    }

    fn apply(&self, core: &mut Core, reactions: Vec<Reaction>) {
        for reaction in reactions {
            match reaction {
                Reaction::SetStatus(status) => {
                    // A pending load or seek must not start playback behind this.
                    if matches!(status, PlayerStatus::Paused | PlayerStatus::Critical(_)) {
                        core.preempt();
                    }
                    if status == PlayerStatus::Paused {
                        if let Some(slot) = &core.engine {
                            slot.engine.pause();
                            core.elapsed = slot.engine.position();
                        }
                    }
                    core.status = status;
                }
                Reaction::Submit(cmd) => {
                    if self.mailbox.send(Msg::Command(cmd, CommandSource::Auto)).is_err() {
                        log::warn!("Player mailbox closed; dropping auto-command {}", cmd);
                    }
                }
                Reaction::RecoverStall => {
                    if let Some(slot) = &core.engine {
                        log::info!("Engine #{} stalled; kicking playback", slot.generation);
                        slot.engine.pause();
                        if core.status == PlayerStatus::Playing {
                            slot.engine.set_rate(core.desired_rate);
                            slot.engine.play();
                        }
                    }
                }
                Reaction::Progress { elapsed, loaded } => {
                    core.elapsed = elapsed;
                    core.loaded_progress = loaded;
                }
            }
        }
    }

    pub(crate) fn execute(self: &Arc<Self>, cmd: Command, source: CommandSource) {
        let mut guard = self.lock();
        let core = &mut *guard;

        let observed = core.status.clone();
        if let Some(restored) = core.preempt() {
            core.status = restored;
        }
        // Loads are judged as if the preempted load never started.
        let gate_status = if cmd.is_load() { core.status.clone() } else { observed };

        let allowed = admission::can_run(
            &gate_status,
            core.play_index,
            core.queue.len(),
            core.engine.is_some(),
            &cmd
        );
        if !allowed {
            log::warn!("Rejected {} command {} while {}", source, cmd, gate_status);
            core.status = PlayerStatus::Failed(PlayerError::InvalidCommand(cmd));
            self.publish(core);
            return;
        }
        log::debug!("Running {} command {}", source, cmd);

        match cmd {
            Command::Play => {
                let index = core.play_index;
                self.play_at(core, index, cmd);
            }
            Command::PlayAt(index) => self.play_at(core, index, cmd),
            Command::Next => {
                let index = core.play_index + 1;
                self.play_at(core, index, cmd);
            }
            Command::Previous => self.previous(core),
            Command::Pause => {
                if let Some(slot) = &core.engine {
                    slot.engine.pause();
                    core.elapsed = slot.engine.position();
                }
                core.status = PlayerStatus::Paused;
            }
            Command::Stop => {
                core.discard_engine();
                core.elapsed = Duration::ZERO;
                core.loaded_progress = 0.0;
                // The automatic stop after a fatal failure keeps the critical status.
                let after_fatal = source == CommandSource::Auto
                    && matches!(core.status, PlayerStatus::Critical(_));
                if !after_fatal {
                    core.status = PlayerStatus::Ready;
                }
            }
            Command::Seek { seconds, should_play } => {
                self.seek(core, cmd, seconds, should_play, false)
            }
            Command::Prefetch => self.prefetch(core),
        }

        self.publish(core);
    }

    fn play_at(self: &Arc<Self>, core: &mut Core, index: usize, cmd: Command) {
        let Some(item) = core.queue.get(index).cloned() else {
            core.status = PlayerStatus::Failed(PlayerError::InvalidCommand(cmd));
            return;
        };

        let bound_here = core.engine.as_ref().is_some_and(|slot| Arc::ptr_eq(&slot.item, &item));
        if cmd == Command::Play && bound_here && core.status == PlayerStatus::Paused {
            log::debug!("Resuming {}", item.url());
            core.resume();
            return;
        }

        core.discard_engine();
        core.status = PlayerStatus::Loading;
        let token = core.begin_pipeline(Some(PlayerStatus::Ready));

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.load_and_start(token, index, item).await;
        });
    }

    async fn load_and_start(
        self: Arc<Self>,
        token: CancellationToken,
        index: usize,
        item: Arc<PlayerItem>
    ) {
        let resolver = Arc::clone(&self.backend.resolver);
        let loaded = tokio::select! {
            _ = token.cancelled() => {
                log::debug!("Load of {} cancelled during resolution", item.url());
                return;
            }
            loaded = item.load(resolver.as_ref()) => loaded,
        };
        let handle = match loaded {
            Ok(handle) => handle,
            Err(err) => {
                self.fail(&token, err);
                return;
            }
        };

        let created = tokio::select! {
            _ = token.cancelled() => {
                log::debug!("Load of {} cancelled during engine construction", item.url());
                return;
            }
            created = self.backend.engines.create(handle) => created,
        };
        let engine = match created {
            Ok(engine) => engine,
            Err(err) => {
                self.fail(&token, err);
                return;
            }
        };

        let index = {
            let mut core = self.lock();
            if token.is_cancelled() {
                log::debug!("Discarding engine built for obsolete load of {}", item.url());
                return;
            }

            let generation = core.next_generation;
            core.next_generation += 1;
            let watcher = self.shutdown.child_token();
            watchers::spawn_engine_watcher(
                generation,
                engine.subscribe(),
                self.mailbox.clone(),
                watcher.clone()
            );

            engine.set_rate(core.desired_rate);
            if std::mem::take(&mut core.start_paused) {
                core.status = PlayerStatus::Paused;
            } else {
                engine.play();
                core.status = PlayerStatus::Playing;
            }
            // The queue may have been reshuffled while loading.
            let index = core.queue.position_of(&item).unwrap_or(index);
            log::info!("Engine #{} bound to #{} {}", generation, index, item.url());

            core.elapsed = engine.position();
            core.loaded_progress = engine.loaded_progress();
            core.engine = Some(EngineSlot {
                engine,
                item: Arc::clone(&item),
                generation,
                watcher,
            });
            core.play_index = index;
            core.current_meta = item.meta();
            core.finish_pipeline();
            self.publish(&mut core);
            index
        };

        self.preload_around(index);
    }

    /// Resolve the neighbours of `index` in the background. Failures are ignored.
    fn preload_around(&self, index: usize) {
        let neighbours: Vec<Arc<PlayerItem>> = {
            let core = self.lock();
            [index.checked_sub(1), index.checked_add(1)]
                .into_iter()
                .flatten()
                .filter_map(|i| core.queue.get(i).cloned())
                .filter(|item| !item.is_resolved())
                .collect()
        };

        for item in neighbours {
            let resolver = Arc::clone(&self.backend.resolver);
            tokio::spawn(async move {
                match item.load(resolver.as_ref()).await {
                    Ok(_) => log::debug!("Preloaded {}", item.url()),
                    Err(err) => log::debug!("Preload of {} failed: {}", item.url(), err),
                }
            });
        }
    }

    fn previous(self: &Arc<Self>, core: &mut Core) {
        let threshold = self.config.previous_restart_threshold();
        let position = core.engine.as_ref().map(|slot| slot.engine.position());

        match position {
            Some(position) if position > threshold || core.play_index == 0 => {
                let should_play = core.status == PlayerStatus::Playing;
                self.seek(core, Command::Previous, 0.0, should_play, true);
            }
            None if core.play_index == 0 => self.play_at(core, 0, Command::PlayAt(0)),
            _ => {
                let index = core.play_index - 1;
                self.play_at(core, index, Command::PlayAt(index));
            }
        }
    }

    fn seek(
        self: &Arc<Self>,
        core: &mut Core,
        cmd: Command,
        seconds: f64,
        should_play: bool,
        refresh: bool
    ) {
        let Some(engine) = core.engine.as_ref().map(|slot| Arc::clone(&slot.engine)) else {
            core.status = PlayerStatus::Failed(
                PlayerError::Internal(format!("{} admitted without an engine", cmd))
            );
            return;
        };
        let Ok(target) = Duration::try_from_secs_f64(seconds.max(0.0)) else {
            core.status = PlayerStatus::Failed(PlayerError::InvalidCommand(cmd));
            return;
        };

        let token = core.begin_pipeline(None);
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let sought = tokio::select! {
                _ = token.cancelled() => {
                    log::debug!("Seek to {:?} cancelled", target);
                    return;
                }
                sought = engine.seek(target) => sought,
            };
            if let Err(err) = sought {
                shared.fail(&token, err);
                return;
            }

            let mut core = shared.lock();
            if token.is_cancelled() {
                return;
            }
            core.elapsed = target;
            if should_play {
                engine.set_rate(core.desired_rate);
                engine.play();
                core.status = PlayerStatus::Playing;
            }
            if refresh {
                core.refresh_epoch += 1;
            }
            core.finish_pipeline();
            shared.publish(&mut core);
        });
    }

    fn prefetch(self: &Arc<Self>, core: &mut Core) {
        let Some(item) = core.queue.get(core.play_index).cloned() else {
            core.status = PlayerStatus::Failed(PlayerError::InvalidCommand(Command::Prefetch));
            return;
        };

        let previous = core.status.clone();
        core.status = PlayerStatus::Loading;
        let token = core.begin_pipeline(Some(previous));

        let shared = Arc::clone(self);
        let resolver = Arc::clone(&self.backend.resolver);
        tokio::spawn(async move {
            let loaded = tokio::select! {
                _ = token.cancelled() => return,
                loaded = item.load(resolver.as_ref()) => loaded,
            };
            if let Err(err) = loaded {
                shared.fail(&token, err);
                return;
            }

            let mut core = shared.lock();
            if token.is_cancelled() {
                return;
            }
            log::info!("Prefetched {}", item.url());
            core.current_meta = item.meta();
            core.status = PlayerStatus::ReadyToPlay;
            core.finish_pipeline();
            shared.publish(&mut core);
        });
    }

    /// Report a pipeline failure unless the pipeline became obsolete meanwhile.
    fn fail(&self, token: &CancellationToken, err: PlayerError) {
        let mut core = self.lock();
        if token.is_cancelled() {
            return;
        }
        log::warn!("Command failed: {}", err);
        core.status = PlayerStatus::Failed(err);
        core.finish_pipeline();
        self.publish(&mut core);
    }

    /// Release everything the player owns. Called once by the actor on exit.
    pub(crate) fn teardown(&self) {
        let mut core = self.lock();
        core.preempt();
        core.discard_engine();
        self.publish(&mut core);
        self.shutdown.cancel();
        log::info!("Player torn down");
    }
}

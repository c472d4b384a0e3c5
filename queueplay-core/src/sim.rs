//! In-process collaborators driven by the tokio clock.
//!
//! Nothing here produces sound: the engine only advances a play-head and
//! reports it. The command-line player and the tests run on these.

use std::{
    collections::HashMap,
    sync::{ Arc, Mutex, MutexGuard, PoisonError, Weak },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{ sync::broadcast, time::{ Instant, MissedTickBehavior } };
use tokio_util::sync::CancellationToken;

use crate::{
    engine::{ Engine, EngineEvent, EngineFactory },
    error::{ PlayerError, PlayerResult },
    item::{ ItemResolver, PlayableHandle, ResolvedAsset },
    metadata::ItemMeta,
    nowplaying::{ NowPlayingInfo, RemoteCommands, TransportControl, TransportSurface },
    session::{ AudioSession, SessionEvent },
};

const DEFAULT_DURATION: Duration = Duration::from_secs(180);
const EVENT_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Clock {
    /// Play-head at `anchor`
    offset: Duration,
    /// Set while running
    anchor: Option<Instant>,
    rate: f32,
    ended: bool,
}

impl Clock {
    fn position(&self, duration: Duration) -> Duration {
        let running = self.anchor.map_or(Duration::ZERO, |anchor| {
            anchor.elapsed().mul_f32(self.rate.max(0.0))
        });
        (self.offset + running).min(duration)
    }

    /// Fold the running time into `offset`, keeping the running state.
    fn rebase(&mut self, duration: Duration) {
        self.offset = self.position(duration);
        if self.anchor.is_some() {
            self.anchor = Some(Instant::now());
        }
    }
}

/// A clock-driven engine. Reports progress every tick and the end of the
/// track once the play-head reaches the item duration.
pub struct SimulatedEngine {
    url: String,
    duration: Duration,
    clock: Mutex<Clock>,
    events: broadcast::Sender<EngineEvent>,
    seek_delay: Duration,
    ticker: CancellationToken,
}

impl SimulatedEngine {
    fn start(url: String, duration: Duration, tick: Duration, seek_delay: Duration) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let engine = Arc::new(Self {
            url,
            duration,
            clock: Mutex::new(Clock {
                offset: Duration::ZERO,
                anchor: None,
                rate: 1.0,
                ended: false,
            }),
            events,
            seek_delay,
            ticker: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&engine);
        let token = engine.ticker.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                engine.tick();
            }
        });

        engine
    }

    fn tick(&self) {
        let mut clock = lock(&self.clock);
        if clock.anchor.is_none() {
            return;
        }
        let elapsed = clock.position(self.duration);
        let _ = self.events.send(EngineEvent::Progress { elapsed, loaded: 1.0 });

        if elapsed >= self.duration && !clock.ended {
            clock.offset = self.duration;
            clock.anchor = None;
            clock.ended = true;
            log::debug!("Simulated engine reached the end of {}", self.url);
            let _ = self.events.send(EngineEvent::EndOfTrack);
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.clock).anchor.is_some()
    }

    pub fn rate(&self) -> f32 {
        lock(&self.clock).rate
    }

    /// Emit an arbitrary event, as a misbehaving output would.
    pub fn inject(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        self.ticker.cancel();
    }
}

#[async_trait]
impl Engine for SimulatedEngine {
    fn play(&self) {
        let mut clock = lock(&self.clock);
        if clock.anchor.is_none() && !clock.ended {
            clock.anchor = Some(Instant::now());
        }
    }

    fn pause(&self) {
        let mut clock = lock(&self.clock);
        clock.offset = clock.position(self.duration);
        clock.anchor = None;
    }

    fn set_rate(&self, rate: f32) {
        let mut clock = lock(&self.clock);
        clock.rebase(self.duration);
        clock.rate = rate;
    }

    fn position(&self) -> Duration {
        lock(&self.clock).position(self.duration)
    }

    fn loaded_progress(&self) -> f32 {
        1.0
    }

    async fn seek(&self, position: Duration) -> PlayerResult<()> {
        if !self.seek_delay.is_zero() {
            tokio::time::sleep(self.seek_delay).await;
        }
        let mut clock = lock(&self.clock);
        clock.offset = position.min(self.duration);
        clock.ended = false;
        if clock.anchor.is_some() {
            clock.anchor = Some(Instant::now());
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

/// Builds [`SimulatedEngine`]s and remembers what it built.
pub struct SimulatedEngineFactory {
    tick: Duration,
    create_delay: Duration,
    seek_delay: Duration,
    failing: Mutex<HashMap<String, String>>,
    created: Mutex<Vec<(String, Weak<SimulatedEngine>)>>,
}

impl SimulatedEngineFactory {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            create_delay: Duration::ZERO,
            seek_delay: Duration::ZERO,
            failing: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub fn with_seek_delay(mut self, delay: Duration) -> Self {
        self.seek_delay = delay;
        self
    }

    /// Refuse to build an engine for `url`.
    pub fn fail_on(&self, url: &str, message: &str) {
        lock(&self.failing).insert(url.to_string(), message.to_string());
    }

    /// Locators of every engine built so far, in order.
    pub fn created(&self) -> Vec<String> {
        lock(&self.created).iter().map(|(url, _)| url.clone()).collect()
    }

    /// The most recently built engine, if the player still holds it.
    pub fn latest(&self) -> Option<Arc<SimulatedEngine>> {
        lock(&self.created).last().and_then(|(_, engine)| engine.upgrade())
    }

    /// Number of built engines that are still alive.
    pub fn live(&self) -> usize {
        lock(&self.created).iter().filter(|(_, engine)| engine.strong_count() > 0).count()
    }
}

#[async_trait]
impl EngineFactory for SimulatedEngineFactory {
    async fn create(&self, handle: PlayableHandle) -> PlayerResult<Arc<dyn Engine>> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if let Some(message) = lock(&self.failing).get(&handle.url) {
            return Err(PlayerError::ItemPlaybackFailed(message.clone()));
        }

        let duration = handle.meta.duration.unwrap_or(DEFAULT_DURATION);
        let engine = SimulatedEngine::start(handle.url.clone(), duration, self.tick, self.seek_delay);
        lock(&self.created).push((handle.url, Arc::downgrade(&engine)));
        Ok(engine)
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryEntry {
    meta: ItemMeta,
    delay: Duration,
    failure: Option<String>,
}

/// Resolves locators from an in-memory table. Unknown locators resolve to
/// an item titled after the locator.
#[derive(Default)]
pub struct MemoryResolver {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_meta(self, url: &str, meta: ItemMeta) -> Self {
        lock(&self.entries).entry(url.to_string()).or_default().meta = meta;
        self
    }

    pub fn with_duration(self, url: &str, duration: Duration) -> Self {
        lock(&self.entries).entry(url.to_string()).or_default().meta.duration = Some(duration);
        self
    }

    pub fn with_delay(self, url: &str, delay: Duration) -> Self {
        lock(&self.entries).entry(url.to_string()).or_default().delay = delay;
        self
    }

    pub fn set_failure(&self, url: &str, failure: Option<&str>) {
        lock(&self.entries).entry(url.to_string()).or_default().failure =
            failure.map(|f| f.to_string());
    }

    /// How many times `url` was resolved.
    pub fn calls(&self, url: &str) -> usize {
        lock(&self.calls).get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ItemResolver for MemoryResolver {
    async fn resolve(&self, url: &str) -> PlayerResult<ResolvedAsset> {
        *lock(&self.calls).entry(url.to_string()).or_insert(0) += 1;
        let entry = lock(&self.entries).get(url).cloned().unwrap_or_default();

        if !entry.delay.is_zero() {
            tokio::time::sleep(entry.delay).await;
        }
        if let Some(failure) = entry.failure {
            return Err(PlayerError::ItemMetadataResolutionFailed(failure));
        }

        let mut meta = entry.meta;
        if meta.title.is_none() {
            meta.title = Some(url.to_string());
        }
        Ok(ResolvedAsset { meta, asset: Arc::new(url.to_string()) })
    }
}

/// An audio session that is always there, unless told otherwise.
pub struct SimulatedSession {
    available: bool,
    events: broadcast::Sender<SessionEvent>,
}

impl SimulatedSession {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { available: true, events }
    }

    /// A session that refuses to be configured.
    pub fn unavailable() -> Self {
        Self { available: false, ..Self::new() }
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

impl Default for SimulatedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSession for SimulatedSession {
    fn activate_for_playback(&self) -> PlayerResult<()> {
        if self.available {
            Ok(())
        } else {
            Err(PlayerError::SessionUnavailable("no playback category".into()))
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

/// A transport surface that records everything pushed to it.
#[derive(Default)]
pub struct RecordingTransport {
    remote: Mutex<Option<RemoteCommands>>,
    now_playing: Mutex<Vec<Option<NowPlayingInfo>>>,
    enabled: Mutex<HashMap<TransportControl, bool>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The command sink handed over at registration.
    pub fn remote(&self) -> Option<RemoteCommands> {
        lock(&self.remote).clone()
    }

    /// What is displayed right now.
    pub fn now_playing(&self) -> Option<NowPlayingInfo> {
        lock(&self.now_playing).last().cloned().flatten()
    }

    /// Every display update, oldest first.
    pub fn history(&self) -> Vec<Option<NowPlayingInfo>> {
        lock(&self.now_playing).clone()
    }

    pub fn is_enabled(&self, control: TransportControl) -> Option<bool> {
        lock(&self.enabled).get(&control).copied()
    }
}

impl TransportSurface for RecordingTransport {
    fn register(&self, remote: RemoteCommands) {
        *lock(&self.remote) = Some(remote);
    }

    fn set_enabled(&self, control: TransportControl, enabled: bool) {
        lock(&self.enabled).insert(control, enabled);
    }

    fn set_now_playing(&self, info: Option<&NowPlayingInfo>) {
        lock(&self.now_playing).push(info.cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(url: &str, secs: u64) -> PlayableHandle {
        PlayableHandle {
            url: url.into(),
            meta: ItemMeta { duration: Some(Duration::from_secs(secs)), ..Default::default() },
            asset: Arc::new(()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn engine_advances_only_while_playing() {
        let factory = SimulatedEngineFactory::new(Duration::from_millis(250));
        let engine = factory.create(handle("a", 60)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(engine.position(), Duration::ZERO);

        engine.play();
        tokio::time::sleep(Duration::from_secs(5)).await;
        engine.pause();
        let paused_at = engine.position();
        assert!(paused_at >= Duration::from_secs(5), "{:?}", paused_at);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(engine.position(), paused_at);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_reports_end_of_track() {
        let factory = SimulatedEngineFactory::new(Duration::from_millis(250));
        let engine = factory.create(handle("a", 2)).await.unwrap();
        let mut events = engine.subscribe();
        engine.play();

        loop {
            match events.recv().await.unwrap() {
                EngineEvent::EndOfTrack => break,
                EngineEvent::Progress { .. } => {}
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(engine.position(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_engines_are_not_live() {
        let factory = SimulatedEngineFactory::new(Duration::from_millis(250));
        let engine = factory.create(handle("a", 60)).await.unwrap();
        assert_eq!(factory.live(), 1);
        drop(engine);
        assert_eq!(factory.live(), 0);
        assert_eq!(factory.created(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn resolver_counts_calls_and_fails_on_demand() {
        let resolver = MemoryResolver::new().with_duration("a", Duration::from_secs(30));
        let resolved = resolver.resolve("a").await.unwrap();
        assert_eq!(resolved.meta.duration, Some(Duration::from_secs(30)));
        assert_eq!(resolved.meta.title.as_deref(), Some("a"));

        resolver.set_failure("a", Some("gone"));
        assert!(resolver.resolve("a").await.is_err());
        assert_eq!(resolver.calls("a"), 2);
    }
}

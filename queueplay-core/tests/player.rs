use std::{ sync::Arc, time::Duration };

use queueplay_core::{
    Backend,
    Command,
    Player,
    PlayerConfig,
    PlayerError,
    PlayerHandle,
    PlayerItem,
    PlayerState,
    PlayerStatus,
    RepeatMode,
    ShuffleMode,
    engine::{ Engine, EngineEvent },
    nowplaying::{ TransportAction, TransportControl },
    session::{ RouteChangeReason, SessionEvent },
    sim::{ MemoryResolver, RecordingTransport, SimulatedEngineFactory, SimulatedSession },
    state::StatusStream,
};

const LONG: Duration = Duration::from_secs(600);
const TICK: Duration = Duration::from_millis(250);

struct Rig {
    handle: PlayerHandle,
    status: StatusStream,
    resolver: Arc<MemoryResolver>,
    engines: Arc<SimulatedEngineFactory>,
    session: Arc<SimulatedSession>,
    transport: Arc<RecordingTransport>,
}

fn rig_with(
    urls: &[&str],
    resolver: MemoryResolver,
    engines: SimulatedEngineFactory,
    config: PlayerConfig
) -> Rig {
    let resolver = Arc::new(resolver);
    let engines = Arc::new(engines);
    let session = Arc::new(SimulatedSession::new());
    let transport = Arc::new(RecordingTransport::new());
    let backend = Backend {
        resolver: resolver.clone(),
        engines: engines.clone(),
        session: session.clone(),
        transport: Some(transport.clone()),
    };

    let items = urls.iter().map(|url| PlayerItem::new(*url)).collect();
    let (player, handle) = Player::new(items, config, backend).unwrap();
    player.spawn();
    let status = handle.status();

    Rig { handle, status, resolver, engines, session, transport }
}

fn resolver_for(urls: &[&str], duration: Duration) -> MemoryResolver {
    urls.iter().fold(MemoryResolver::new(), |resolver, url| resolver.with_duration(url, duration))
}

fn rig(urls: &[&str]) -> Rig {
    rig_with(urls, resolver_for(urls, LONG), SimulatedEngineFactory::new(TICK), PlayerConfig::default())
}

fn invalid(cmd: Command) -> PlayerStatus {
    PlayerStatus::Failed(PlayerError::InvalidCommand(cmd))
}

impl Rig {
    /// Collect statuses up to and including the first one `done` accepts.
    async fn statuses_until(&mut self, mut done: impl FnMut(&PlayerStatus) -> bool) -> Vec<PlayerStatus> {
        let mut seen = Vec::new();
        let collect = async {
            while let Some(status) = self.status.next().await {
                let finished = done(&status);
                seen.push(status);
                if finished {
                    return;
                }
            }
        };
        let result = tokio::time::timeout(Duration::from_secs(60), collect).await;
        assert!(result.is_ok(), "timed out waiting, saw {:?}", seen);
        seen
    }

    async fn until_status(&mut self, expected: PlayerStatus) -> Vec<PlayerStatus> {
        self.statuses_until(|status| *status == expected).await
    }

    async fn until_state(&self, pred: impl FnMut(&PlayerState) -> bool) -> PlayerState {
        let mut rx = self.handle.state();
        let guard = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(pred))
            .await
            .expect("timed out waiting for state")
            .expect("player is gone");
        PlayerState::clone(&guard)
    }

    fn send(&self, cmd: Command) {
        self.handle.send(cmd).unwrap();
    }
}

/// Let spawned tasks catch up.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn plays_through_the_queue_and_rejects_next_at_the_end() {
    let mut rig = rig(&["a", "b", "c"]);

    rig.send(Command::PlayAt(1));
    assert_eq!(
        rig.until_status(PlayerStatus::Playing).await,
        vec![PlayerStatus::Ready, PlayerStatus::Loading, PlayerStatus::Playing]
    );
    assert_eq!(rig.handle.snapshot().play_index, 1);

    rig.send(Command::Next);
    assert_eq!(
        rig.until_status(PlayerStatus::Playing).await,
        vec![PlayerStatus::Loading, PlayerStatus::Playing]
    );
    assert_eq!(rig.handle.snapshot().play_index, 2);
    assert!(!rig.handle.can_run(Command::Next));

    rig.send(Command::Next);
    assert_eq!(rig.until_status(invalid(Command::Next)).await, vec![invalid(Command::Next)]);
    assert_eq!(rig.engines.created(), vec!["b".to_string(), "c".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn latest_load_wins() {
    let resolver = resolver_for(&["a", "b"], LONG).with_delay("a", Duration::from_secs(5));
    let mut rig = rig_with(&["a", "b"], resolver, SimulatedEngineFactory::new(TICK), PlayerConfig::default());

    rig.send(Command::PlayAt(0));
    rig.send(Command::PlayAt(1));
    assert_eq!(
        rig.until_status(PlayerStatus::Playing).await,
        vec![PlayerStatus::Ready, PlayerStatus::Loading, PlayerStatus::Playing]
    );
    assert_eq!(rig.handle.snapshot().play_index, 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.engines.created(), vec!["b".to_string()]);
    assert_eq!(rig.handle.snapshot().play_index, 1);
    assert_eq!(rig.handle.current_status(), PlayerStatus::Playing);
}

#[tokio::test(start_paused = true)]
async fn slow_engine_construction_is_preempted() {
    let engines = SimulatedEngineFactory::new(TICK).with_create_delay(Duration::from_secs(2));
    let mut rig = rig_with(&["a", "b", "c"], resolver_for(&["a", "b", "c"], LONG), engines, PlayerConfig::default());

    rig.send(Command::Play);
    settle().await;
    rig.send(Command::PlayAt(2));
    rig.until_status(PlayerStatus::Playing).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(rig.handle.snapshot().play_index, 2);
    assert_eq!(rig.engines.live(), 1);
    assert_eq!(rig.engines.latest().map(|e| e.url().to_string()), Some("c".to_string()));
}

#[tokio::test(start_paused = true)]
async fn out_of_range_play_at_is_rejected() {
    let mut rig = rig(&["a", "b"]);
    rig.send(Command::PlayAt(2));
    assert_eq!(
        rig.until_status(invalid(Command::PlayAt(2))).await,
        vec![PlayerStatus::Ready, invalid(Command::PlayAt(2))]
    );
    assert!(rig.engines.created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn pause_then_play_resumes_the_same_engine() {
    let mut rig = rig(&["a"]);

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;
    rig.send(Command::Pause);
    rig.until_status(PlayerStatus::Paused).await;
    assert!(!rig.engines.latest().unwrap().is_playing());

    rig.send(Command::Play);
    assert_eq!(rig.until_status(PlayerStatus::Playing).await, vec![PlayerStatus::Playing]);
    assert!(rig.engines.latest().unwrap().is_playing());
    assert_eq!(rig.engines.created().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn repeat_all_wraps_to_the_first_item() {
    let urls = ["a", "b"];
    let mut rig = rig_with(
        &urls,
        resolver_for(&urls, Duration::from_secs(2)),
        SimulatedEngineFactory::new(TICK),
        PlayerConfig::default()
    );
    rig.handle.set_repeat_mode(RepeatMode::All).unwrap();

    rig.send(Command::PlayAt(1));
    let mut playing = 0;
    let seen = rig.statuses_until(|status| {
        if *status == PlayerStatus::Playing {
            playing += 1;
        }
        playing == 2
    }).await;

    assert_eq!(
        seen,
        vec![
            PlayerStatus::Ready,
            PlayerStatus::Loading,
            PlayerStatus::Playing,
            PlayerStatus::Paused,
            PlayerStatus::Loading,
            PlayerStatus::Playing
        ]
    );
    assert_eq!(rig.handle.snapshot().play_index, 0);
}

#[tokio::test(start_paused = true)]
async fn repeat_one_restarts_in_place() {
    let mut rig = rig_with(
        &["a"],
        resolver_for(&["a"], Duration::from_secs(2)),
        SimulatedEngineFactory::new(TICK),
        PlayerConfig::default()
    );
    rig.handle.set_repeat_mode(RepeatMode::One).unwrap();

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(rig.handle.current_status(), PlayerStatus::Playing);
    assert_eq!(rig.engines.created().len(), 1);
    let engine = rig.engines.latest().unwrap();
    assert!(engine.is_playing());
    assert!(engine.position() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn end_of_queue_stops_without_repeat() {
    let mut rig = rig_with(
        &["a"],
        resolver_for(&["a"], Duration::from_secs(2)),
        SimulatedEngineFactory::new(TICK),
        PlayerConfig::default()
    );

    rig.send(Command::Play);
    let mut ready = 0;
    let seen = rig.statuses_until(|status| {
        if *status == PlayerStatus::Ready {
            ready += 1;
        }
        ready == 2
    }).await;

    assert_eq!(
        seen,
        vec![PlayerStatus::Ready, PlayerStatus::Loading, PlayerStatus::Playing, PlayerStatus::Ready]
    );
    let state = rig.until_state(|state| !state.has_engine).await;
    assert_eq!(state.elapsed, Duration::ZERO);
    assert_eq!(rig.engines.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn seek_while_paused_can_start_playback() {
    let mut rig = rig(&["a"]);

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;
    rig.send(Command::Pause);
    rig.until_status(PlayerStatus::Paused).await;

    rig.send(Command::Seek { seconds: 30.0, should_play: true });
    assert_eq!(rig.until_status(PlayerStatus::Playing).await, vec![PlayerStatus::Playing]);
    assert!(rig.handle.snapshot().elapsed >= Duration::from_secs(30));
    assert!(rig.engines.latest().unwrap().position() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn seek_without_engine_is_rejected() {
    let mut rig = rig(&["a"]);
    let seek = Command::Seek { seconds: 5.0, should_play: false };
    assert!(!rig.handle.can_run(seek));

    rig.send(seek);
    assert_eq!(rig.until_status(invalid(seek)).await, vec![PlayerStatus::Ready, invalid(seek)]);
}

#[tokio::test(start_paused = true)]
async fn fatal_engine_failure_is_critical_and_releases_the_engine() {
    let mut rig = rig(&["a", "b"]);

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;
    rig.engines.latest().unwrap().inject(EngineEvent::Failed("device lost".into()));

    let critical = PlayerStatus::Critical(PlayerError::EngineFailed("device lost".into()));
    assert_eq!(rig.until_status(critical.clone()).await, vec![critical.clone()]);

    let state = rig.until_state(|state| !state.has_engine).await;
    assert_eq!(state.status, critical);
    assert_eq!(rig.engines.live(), 0);

    rig.send(Command::Stop);
    assert_eq!(rig.until_status(PlayerStatus::Ready).await, vec![PlayerStatus::Ready]);
}

#[tokio::test(start_paused = true)]
async fn item_failures_surface_as_failed() {
    let mut rig = rig(&["a"]);

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;
    rig.engines.latest().unwrap().inject(EngineEvent::ErrorLogEntry("decoder hiccup".into()));

    let failed = PlayerStatus::Failed(PlayerError::EngineErrorLogEntry("decoder hiccup".into()));
    rig.until_status(failed).await;
    assert!(rig.handle.snapshot().has_engine);
}

#[tokio::test(start_paused = true)]
async fn failed_resolution_can_be_retried() {
    let mut rig = rig(&["a"]);
    rig.resolver.set_failure("a", Some("404"));

    rig.send(Command::Play);
    let failed = PlayerStatus::Failed(PlayerError::ItemMetadataResolutionFailed("404".into()));
    assert_eq!(
        rig.until_status(failed.clone()).await,
        vec![PlayerStatus::Ready, PlayerStatus::Loading, failed]
    );

    rig.resolver.set_failure("a", None);
    rig.send(Command::Play);
    assert_eq!(
        rig.until_status(PlayerStatus::Playing).await,
        vec![PlayerStatus::Loading, PlayerStatus::Playing]
    );
    assert_eq!(rig.resolver.calls("a"), 2);
}

#[tokio::test(start_paused = true)]
async fn engine_construction_failure_is_reported() {
    let mut rig = rig(&["a"]);
    rig.engines.fail_on("a", "unsupported format");

    rig.send(Command::Play);
    let failed = PlayerStatus::Failed(PlayerError::ItemPlaybackFailed("unsupported format".into()));
    rig.until_status(failed).await;
    assert!(!rig.handle.snapshot().has_engine);
}

#[tokio::test(start_paused = true)]
async fn interruption_pauses_and_resumes() {
    let mut rig = rig(&["a"]);

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;

    rig.session.emit(SessionEvent::InterruptionBegan);
    rig.until_status(PlayerStatus::Paused).await;
    assert!(!rig.engines.latest().unwrap().is_playing());

    rig.session.emit(SessionEvent::InterruptionEnded { should_resume: true });
    assert_eq!(rig.until_status(PlayerStatus::Playing).await, vec![PlayerStatus::Playing]);
    assert!(rig.engines.latest().unwrap().is_playing());
    assert_eq!(rig.engines.created().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn interruption_cancels_a_pending_load() {
    let mut rig = rig_with(
        &["a"],
        resolver_for(&["a"], LONG).with_delay("a", Duration::from_secs(5)),
        SimulatedEngineFactory::new(TICK),
        PlayerConfig::default()
    );

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Loading).await;
    rig.session.emit(SessionEvent::InterruptionBegan);
    rig.until_status(PlayerStatus::Paused).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.handle.current_status(), PlayerStatus::Paused);
    assert!(rig.engines.created().is_empty());

    rig.session.emit(SessionEvent::InterruptionEnded { should_resume: true });
    assert_eq!(
        rig.until_status(PlayerStatus::Playing).await,
        vec![PlayerStatus::Loading, PlayerStatus::Playing]
    );
    assert_eq!(rig.engines.created(), vec!["a".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn interruption_cancels_a_pending_seek() {
    let mut rig = rig_with(
        &["a"],
        resolver_for(&["a"], LONG),
        SimulatedEngineFactory::new(TICK).with_seek_delay(Duration::from_secs(5)),
        PlayerConfig::default()
    );

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;
    rig.send(Command::Seek { seconds: 0.0, should_play: true });
    settle().await;
    rig.session.emit(SessionEvent::InterruptionBegan);
    rig.until_status(PlayerStatus::Paused).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.handle.current_status(), PlayerStatus::Paused);
    assert!(!rig.engines.latest().unwrap().is_playing());
}

#[tokio::test(start_paused = true)]
async fn unplugging_while_loading_does_not_stop_the_load() {
    let mut rig = rig_with(
        &["a"],
        resolver_for(&["a"], LONG).with_delay("a", Duration::from_secs(5)),
        SimulatedEngineFactory::new(TICK),
        PlayerConfig::default()
    );

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Loading).await;
    rig.session.emit(SessionEvent::RouteChanged(RouteChangeReason::OldDeviceUnavailable));

    assert_eq!(rig.until_status(PlayerStatus::Playing).await, vec![PlayerStatus::Playing]);
    assert!(rig.engines.latest().unwrap().is_playing());
}

#[tokio::test(start_paused = true)]
async fn unplugged_output_pauses() {
    let mut rig = rig(&["a"]);

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;

    rig.session.emit(SessionEvent::RouteChanged(RouteChangeReason::NewDeviceAvailable));
    rig.session.emit(SessionEvent::RouteChanged(RouteChangeReason::OldDeviceUnavailable));
    assert_eq!(rig.until_status(PlayerStatus::Paused).await, vec![PlayerStatus::Paused]);
}

#[tokio::test(start_paused = true)]
async fn stalled_engine_keeps_playing() {
    let mut rig = rig(&["a"]);

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;
    let engine = rig.engines.latest().unwrap();
    engine.inject(EngineEvent::Stalled);
    settle().await;

    assert!(engine.is_playing());
    assert_eq!(rig.handle.current_status(), PlayerStatus::Playing);
}

#[tokio::test(start_paused = true)]
async fn rate_is_pushed_only_while_playing() {
    let mut rig = rig(&["a"]);

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;
    rig.handle.set_desired_rate(1.5).unwrap();
    rig.until_state(|state| state.desired_rate == 1.5).await;
    let engine = rig.engines.latest().unwrap();
    assert_eq!(engine.rate(), 1.5);

    rig.send(Command::Pause);
    rig.until_status(PlayerStatus::Paused).await;
    rig.handle.set_desired_rate(2.0).unwrap();
    rig.until_state(|state| state.desired_rate == 2.0).await;
    assert_eq!(engine.rate(), 1.5);

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;
    assert_eq!(engine.rate(), 2.0);
}

#[tokio::test(start_paused = true)]
async fn previous_restarts_then_goes_back() {
    let mut rig = rig(&["a", "b", "c"]);

    rig.send(Command::PlayAt(1));
    rig.until_status(PlayerStatus::Playing).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    rig.send(Command::Previous);
    let state = rig.until_state(|state| state.refresh_epoch == 1).await;
    assert_eq!(state.play_index, 1);
    assert_eq!(state.status, PlayerStatus::Playing);
    assert!(rig.engines.latest().unwrap().position() < Duration::from_secs(1));

    rig.send(Command::Previous);
    assert_eq!(
        rig.until_status(PlayerStatus::Playing).await,
        vec![PlayerStatus::Loading, PlayerStatus::Playing]
    );
    assert_eq!(rig.handle.snapshot().play_index, 0);
    assert_eq!(rig.engines.created(), vec!["b".to_string(), "a".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn previous_on_first_item_restarts_it() {
    let mut rig = rig(&["a", "b"]);

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;

    rig.send(Command::Previous);
    let state = rig.until_state(|state| state.refresh_epoch == 1).await;
    assert_eq!(state.play_index, 0);
    assert_eq!(rig.engines.created().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn prefetch_resolves_without_playing() {
    let mut rig = rig(&["a"]);

    rig.send(Command::Prefetch);
    assert_eq!(
        rig.until_status(PlayerStatus::ReadyToPlay).await,
        vec![PlayerStatus::Ready, PlayerStatus::Loading, PlayerStatus::ReadyToPlay]
    );
    assert_eq!(rig.handle.current_item_title().get().as_deref(), Some("a"));
    assert!(rig.engines.created().is_empty());

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;
    assert_eq!(rig.resolver.calls("a"), 1);
}

#[tokio::test(start_paused = true)]
async fn neighbours_are_preloaded() {
    let mut rig = rig(&["a", "b", "c", "d"]);

    rig.send(Command::PlayAt(1));
    rig.until_status(PlayerStatus::Playing).await;
    settle().await;

    assert_eq!(rig.resolver.calls("a"), 1);
    assert_eq!(rig.resolver.calls("c"), 1);
    assert_eq!(rig.resolver.calls("d"), 0);

    rig.send(Command::Next);
    rig.until_status(PlayerStatus::Playing).await;
    settle().await;
    assert_eq!(rig.resolver.calls("c"), 1);
    assert_eq!(rig.resolver.calls("d"), 1);
}

#[tokio::test(start_paused = true)]
async fn shuffle_keeps_the_current_item_and_round_trips() {
    let urls: Vec<String> = (0..12).map(|i| format!("item-{}", i)).collect();
    let refs: Vec<&str> = urls.iter().map(|s| s.as_str()).collect();
    let rig = rig(&refs);

    rig.handle.set_shuffle_mode(ShuffleMode::Songs).unwrap();
    let state = rig.until_state(|state| state.shuffle_mode == ShuffleMode::Songs).await;
    let shuffled = rig.handle.queue().get();
    assert_eq!(shuffled[0], "item-0");
    assert_eq!(state.play_index, 0);
    let mut sorted = shuffled.clone();
    sorted.sort();
    let mut expected = urls.clone();
    expected.sort();
    assert_eq!(sorted, expected);

    rig.handle.set_shuffle_mode(ShuffleMode::Off).unwrap();
    rig.until_state(|state| state.shuffle_mode == ShuffleMode::Off).await;
    assert_eq!(rig.handle.queue().get(), urls);
}

#[tokio::test(start_paused = true)]
async fn appended_items_become_playable() {
    let mut rig = rig(&["a"]);
    assert!(!rig.handle.can_run(Command::Next));

    rig.handle.append(vec![PlayerItem::new("b")]).unwrap();
    rig.until_state(|state| state.queue.len() == 2).await;
    assert!(rig.handle.can_run(Command::Next));

    rig.send(Command::Next);
    rig.until_status(PlayerStatus::Playing).await;
    assert_eq!(rig.handle.snapshot().play_index, 1);
}

#[tokio::test(start_paused = true)]
async fn start_paused_binds_without_playing() {
    let config = PlayerConfig { start_paused: true, ..Default::default() };
    let mut rig = rig_with(&["a"], resolver_for(&["a"], LONG), SimulatedEngineFactory::new(TICK), config);

    rig.send(Command::Play);
    assert_eq!(
        rig.until_status(PlayerStatus::Paused).await,
        vec![PlayerStatus::Ready, PlayerStatus::Loading, PlayerStatus::Paused]
    );
    assert!(!rig.engines.latest().unwrap().is_playing());

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;
    assert!(rig.engines.latest().unwrap().is_playing());
}

#[tokio::test(start_paused = true)]
async fn remote_actions_drive_the_player() {
    let mut rig = rig(&["a", "b"]);
    settle().await;
    let remote = rig.transport.remote().expect("transport registered");

    assert!(remote.send(TransportAction::TogglePlayPause));
    rig.until_status(PlayerStatus::Playing).await;
    settle().await;
    assert_eq!(rig.transport.is_enabled(TransportControl::Pause), Some(true));
    assert_eq!(rig.transport.is_enabled(TransportControl::Play), Some(false));
    assert_eq!(rig.transport.is_enabled(TransportControl::NextTrack), Some(true));

    let info = rig.transport.now_playing().expect("now playing shown");
    assert_eq!(info.title.as_deref(), Some("a"));
    assert_eq!(info.queue_count, 2);
    assert_eq!(info.rate, 1.0);

    assert!(remote.send(TransportAction::TogglePlayPause));
    rig.until_status(PlayerStatus::Paused).await;
    settle().await;
    assert_eq!(rig.transport.now_playing().unwrap().rate, 0.0);

    assert!(remote.send(TransportAction::ChangePlaybackPosition(Duration::from_secs(20))));
    let state = rig.until_state(|state| state.elapsed == Duration::from_secs(20)).await;
    assert_eq!(state.status, PlayerStatus::Paused);
}

#[tokio::test(start_paused = true)]
async fn projections_follow_the_current_item() {
    let resolver = resolver_for(&["a", "b"], Duration::from_secs(75));
    let mut rig = rig_with(&["a", "b"], resolver, SimulatedEngineFactory::new(TICK), PlayerConfig::default());
    let mut can_pause = rig.handle.watch_can_run(Command::Pause);
    assert_eq!(can_pause.next().await, Some(false));

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;
    assert_eq!(can_pause.next().await, Some(true));
    assert_eq!(rig.handle.current_item_duration().get(), Some(Duration::from_secs(75)));
    assert_eq!(rig.handle.current_item_duration_display().get(), "01:15");
    assert_eq!(rig.handle.current_item_loaded_progress_rate().get(), 1.0);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(rig.handle.current_item_time().get() >= Duration::from_secs(2));
    assert_eq!(rig.handle.player_index().get(), 0);
}

#[tokio::test]
async fn construction_fails_without_an_audio_session() {
    let backend = Backend {
        resolver: Arc::new(MemoryResolver::new()),
        engines: Arc::new(SimulatedEngineFactory::new(TICK)),
        session: Arc::new(SimulatedSession::unavailable()),
        transport: None,
    };
    let err = Player::new(vec![PlayerItem::new("a")], PlayerConfig::default(), backend)
        .err()
        .expect("construction should fail");
    assert!(matches!(err, PlayerError::SessionUnavailable(_)), "{:?}", err);
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_the_engine_and_ends_streams() {
    let mut rig = rig(&["a"]);

    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;
    rig.handle.shutdown();

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while rig.status.next().await.is_some() {}
    }).await;
    assert!(drained.is_ok());
    assert_eq!(rig.engines.live(), 0);

    settle().await;
    assert_eq!(rig.transport.now_playing(), None);
    assert!(rig.handle.send(Command::Play).is_err());
}

#[tokio::test(start_paused = true)]
async fn turning_shuffle_off_follows_the_current_item() {
    let urls: Vec<String> = (0..12).map(|i| format!("item-{}", i)).collect();
    let refs: Vec<&str> = urls.iter().map(|s| s.as_str()).collect();
    let mut rig = rig(&refs);

    rig.handle.set_shuffle_mode(ShuffleMode::Songs).unwrap();
    rig.send(Command::PlayAt(5));
    rig.until_status(PlayerStatus::Playing).await;
    let playing = rig.engines.latest().unwrap().url().to_string();

    rig.handle.set_shuffle_mode(ShuffleMode::Off).unwrap();
    let state = rig.until_state(|state| state.shuffle_mode == ShuffleMode::Off).await;
    assert_eq!(state.current_item().unwrap().url(), playing);
    assert_eq!(format!("item-{}", state.play_index), playing);
}

#[tokio::test(start_paused = true)]
async fn shuffling_during_a_load_keeps_the_index_on_the_loaded_item() {
    let urls: Vec<String> = (0..12).map(|i| format!("item-{}", i)).collect();
    let refs: Vec<&str> = urls.iter().map(|s| s.as_str()).collect();
    let mut rig = rig_with(
        &refs,
        resolver_for(&refs, LONG).with_delay("item-5", Duration::from_secs(5)),
        SimulatedEngineFactory::new(TICK),
        PlayerConfig::default()
    );

    rig.send(Command::PlayAt(5));
    rig.until_status(PlayerStatus::Loading).await;
    rig.handle.set_shuffle_mode(ShuffleMode::Songs).unwrap();
    rig.until_status(PlayerStatus::Playing).await;

    let state = rig.handle.snapshot();
    assert_eq!(state.shuffle_mode, ShuffleMode::Songs);
    assert_eq!(state.current_item().unwrap().url(), "item-5");
    assert_eq!(rig.engines.latest().unwrap().url(), "item-5");

    rig.send(Command::Pause);
    rig.until_status(PlayerStatus::Paused).await;
    rig.send(Command::Play);
    rig.until_status(PlayerStatus::Playing).await;
    assert_eq!(rig.engines.created().len(), 1);
}

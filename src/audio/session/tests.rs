use super::*;
use crate::testing::{FakeResolver, FakeTransport};
use pretty_assertions::assert_eq;

struct Harness {
    controller: Arc<SessionController>,
    transport: Arc<FakeTransport>,
    resolver: Arc<FakeResolver>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::with_options(SessionOptions::default())
    }

    fn with_options(options: SessionOptions) -> Self {
        let transport = Arc::new(FakeTransport::new());
        let resolver = Arc::new(FakeResolver::new());
        let (controller, events) =
            SessionController::start(transport.clone(), resolver.clone(), options);
        Self {
            controller,
            transport,
            resolver,
            events,
        }
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    async fn now_playing(&self) -> Option<String> {
        self.controller
            .now_playing()
            .await
            .unwrap()
            .map(|track| track.reference().to_string())
    }

    async fn upcoming(&self) -> Vec<String> {
        self.controller
            .queue_snapshot(MAX_QUEUE_DISPLAY)
            .await
            .unwrap()
            .upcoming
            .iter()
            .map(|track| track.reference().to_string())
            .collect()
    }
}

fn stream(name: &str) -> String {
    format!("https://stream.test/{}", name)
}

#[tokio::test]
async fn test_submit_starts_playback_when_idle() {
    let mut h = Harness::new();

    let outcome = h.controller.submit("https://youtu.be/a").await.unwrap();

    assert!(matches!(outcome, SubmitOutcome::Started(ref t) if t.reference() == "https://youtu.be/a"));
    assert_eq!(h.transport.plays(), vec![stream("a")]);
    assert_eq!(h.controller.status().await.playback, PlaybackState::Playing);
    assert!(matches!(h.drain_events().as_slice(), [SessionEvent::NowPlaying(_)]));
}

#[tokio::test]
async fn test_submit_while_playing_reports_position() {
    let h = Harness::new();
    h.controller.submit("https://youtu.be/a").await.unwrap();

    let second = h.controller.submit("https://youtu.be/b").await.unwrap();
    let third = h.controller.submit("https://youtu.be/c").await.unwrap();

    assert!(matches!(second, SubmitOutcome::Queued { position: 1, .. }));
    assert!(matches!(third, SubmitOutcome::Queued { position: 2, .. }));
    assert_eq!(h.transport.plays().len(), 1);
}

#[tokio::test]
async fn test_submit_rejects_empty_input() {
    let h = Harness::new();
    assert_eq!(h.controller.submit("   ").await.unwrap_err(), PlaybackError::EmptyQuery);
}

#[tokio::test]
async fn test_unresolvable_track_never_reaches_transport() {
    let h = Harness::new();

    let err = h.controller.submit("https://youtu.be/bad").await.unwrap_err();

    assert!(matches!(err, PlaybackError::UnresolvableMedia(_)));
    assert!(h.transport.plays().is_empty());
    assert_eq!(h.controller.status().await.queued, 0);
}

#[tokio::test]
async fn test_transient_failure_is_reported() {
    let h = Harness::new();
    let err = h.controller.submit("https://youtu.be/flaky").await.unwrap_err();
    assert!(matches!(err, PlaybackError::TransientFetch(_)));
}

#[tokio::test]
async fn test_unsupported_site_is_rejected_without_resolving() {
    let h = Harness::new();

    let err = h.controller.submit("https://example.com/page").await.unwrap_err();

    assert!(matches!(err, PlaybackError::UnresolvableMedia(_)));
    assert!(h.resolver.resolved().is_empty());
}

#[tokio::test]
async fn test_free_text_is_searched() {
    let h = Harness::new();

    h.controller.submit("never gonna").await.unwrap();

    assert_eq!(
        h.resolver.resolved(),
        vec!["https://www.youtube.com/watch?v=never_gonna".to_string()]
    );
}

#[tokio::test]
async fn test_youtube_music_mix_plays_only_the_song() {
    let h = Harness::new();

    h.controller
        .submit("https://music.youtube.com/watch?v=abc&list=RD1")
        .await
        .unwrap();

    assert_eq!(
        h.resolver.resolved(),
        vec!["https://music.youtube.com/watch?v=abc".to_string()]
    );
}

#[tokio::test]
async fn test_playlist_is_expanded_and_started() {
    let h = Harness::new();
    h.resolver.add_playlist(
        "https://www.youtube.com/playlist?list=PL1",
        &["https://youtu.be/p1", "https://youtu.be/p2", "https://youtu.be/p3"],
    );

    let outcome = h
        .controller
        .submit("https://www.youtube.com/playlist?list=PL1")
        .await
        .unwrap();

    assert!(matches!(outcome, SubmitOutcome::PlaylistQueued { count: 3, started: true }));
    assert_eq!(h.transport.plays(), vec![stream("p1")]);
    assert_eq!(h.upcoming().await, vec!["https://youtu.be/p2", "https://youtu.be/p3"]);
}

#[tokio::test]
async fn test_failing_playlist_entry_is_skipped() {
    let mut h = Harness::new();
    h.resolver.add_playlist(
        "https://www.youtube.com/playlist?list=PL2",
        &["https://youtu.be/bad1", "https://youtu.be/good2"],
    );

    h.controller
        .submit("https://www.youtube.com/playlist?list=PL2")
        .await
        .unwrap();

    assert_eq!(h.transport.plays(), vec![stream("good2")]);
    let events = h.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::TrackFailed { track, error: PlaybackError::UnresolvableMedia(_) }
            if track.reference() == "https://youtu.be/bad1"
    )));
}

#[tokio::test]
async fn test_three_tracks_play_out_to_idle() {
    let mut h = Harness::new();
    for name in ["a", "b", "c"] {
        h.controller.submit(&format!("https://youtu.be/{name}")).await.unwrap();
    }
    assert_eq!(h.controller.status().await.queued, 2);

    for _ in 0..3 {
        h.transport.finish(None).await;
    }

    assert_eq!(h.controller.status().await.playback, PlaybackState::Idle);
    assert_eq!(h.controller.history().await.unwrap().len(), 3);
    assert_eq!(h.transport.plays(), vec![stream("a"), stream("b"), stream("c")]);
    assert_eq!(h.controller.recent_titles().await.unwrap(), vec!["a", "b", "c"]);
    assert!(matches!(h.drain_events().last(), Some(SessionEvent::QueueExhausted)));
}

#[tokio::test]
async fn test_loop_replays_current_track() {
    let h = Harness::new();
    h.controller.submit("https://youtu.be/t").await.unwrap();
    h.controller.submit("https://youtu.be/other").await.unwrap();
    assert!(h.controller.toggle_loop().await.unwrap());

    for _ in 0..5 {
        h.transport.finish(None).await;
    }

    assert_eq!(h.transport.plays(), vec![stream("t"); 6]);
    assert_eq!(h.controller.history().await.unwrap().len(), 1);
    assert_eq!(h.upcoming().await, vec!["https://youtu.be/other"]);
}

#[tokio::test]
async fn test_submit_is_locked_while_looping() {
    let h = Harness::new();
    h.controller.submit("https://youtu.be/t").await.unwrap();
    h.controller.toggle_loop().await.unwrap();

    assert_eq!(
        h.controller.submit("https://youtu.be/u").await.unwrap_err(),
        PlaybackError::LoopLocked
    );
}

#[tokio::test]
async fn test_toggle_loop_needs_something_to_play() {
    let h = Harness::new();
    assert_eq!(h.controller.toggle_loop().await.unwrap_err(), PlaybackError::NothingPlaying);
}

#[tokio::test]
async fn test_skip_advances() {
    let h = Harness::new();
    h.controller.submit("https://youtu.be/a").await.unwrap();
    h.controller.submit("https://youtu.be/b").await.unwrap();

    h.controller.skip().await.unwrap();
    h.transport.settle().await;

    assert_eq!(h.now_playing().await.as_deref(), Some("https://youtu.be/b"));
    assert_eq!(h.controller.history().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_skip_disables_loop() {
    let h = Harness::new();
    h.controller.submit("https://youtu.be/a").await.unwrap();
    h.controller.submit("https://youtu.be/b").await.unwrap();
    h.controller.toggle_loop().await.unwrap();

    h.controller.skip().await.unwrap();
    h.transport.settle().await;

    assert_eq!(h.now_playing().await.as_deref(), Some("https://youtu.be/b"));
    assert!(!h.controller.status().await.loop_enabled);
}

#[tokio::test]
async fn test_skip_when_idle_fails() {
    let h = Harness::new();
    assert_eq!(h.controller.skip().await.unwrap_err(), PlaybackError::NothingPlaying);
}

#[tokio::test]
async fn test_stop_clears_everything_and_ignores_stale_end() {
    let h = Harness::new();
    h.controller.submit("https://youtu.be/a").await.unwrap();
    h.controller.submit("https://youtu.be/b").await.unwrap();

    h.controller.stop().await.unwrap();
    h.transport.settle().await;

    let status = h.controller.status().await;
    assert_eq!(status.playback, PlaybackState::Idle);
    assert_eq!(status.queued, 0);
    assert!(h.controller.history().await.unwrap().is_empty());
    assert_eq!(h.transport.plays().len(), 1);
    assert_eq!(h.transport.stops(), 1);
}

#[tokio::test]
async fn test_stop_when_idle_is_a_noop() {
    let h = Harness::new();
    h.controller.stop().await.unwrap();
    assert_eq!(h.transport.stops(), 0);
}

#[tokio::test]
async fn test_previous_while_playing() {
    let h = Harness::new();
    h.controller.submit("https://youtu.be/a").await.unwrap();
    h.controller.submit("https://youtu.be/b").await.unwrap();
    h.transport.finish(None).await;

    let back = h.controller.previous().await.unwrap();
    h.transport.settle().await;

    assert_eq!(back.map(|t| t.reference().to_string()).as_deref(), Some("https://youtu.be/a"));
    assert_eq!(h.now_playing().await.as_deref(), Some("https://youtu.be/a"));
    assert_eq!(h.upcoming().await, vec!["https://youtu.be/b"]);
    assert_eq!(h.transport.plays(), vec![stream("a"), stream("b"), stream("a")]);
}

#[tokio::test]
async fn test_previous_with_no_history_is_a_noop() {
    let h = Harness::new();
    assert!(h.controller.previous().await.unwrap().is_none());
    assert!(h.transport.plays().is_empty());
}

#[tokio::test]
async fn test_previous_after_queue_ran_out_replays_last() {
    let h = Harness::new();
    h.controller.submit("https://youtu.be/a").await.unwrap();
    h.transport.finish(None).await;
    assert_eq!(h.controller.status().await.playback, PlaybackState::Idle);

    h.controller.previous().await.unwrap();

    assert_eq!(h.transport.plays(), vec![stream("a"), stream("a")]);
    assert_eq!(h.controller.status().await.playback, PlaybackState::Playing);
}

#[tokio::test]
async fn test_previous_reports_nothing_when_replay_cannot_start() {
    let h = Harness::new();
    h.controller.submit("https://youtu.be/a").await.unwrap();
    h.transport.finish(None).await;
    h.transport.fail_next_play();

    assert!(h.controller.previous().await.unwrap().is_none());
    assert_eq!(h.transport.plays(), vec![stream("a")]);
    assert_eq!(h.controller.status().await.playback, PlaybackState::Idle);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let h = Harness::new();
    assert_eq!(h.controller.pause().await.unwrap_err(), PlaybackError::NothingPlaying);

    h.controller.submit("https://youtu.be/a").await.unwrap();
    h.controller.pause().await.unwrap();
    assert_eq!(h.controller.status().await.playback, PlaybackState::Paused);

    h.controller.resume().await.unwrap();
    assert_eq!(h.controller.status().await.playback, PlaybackState::Playing);
    assert_eq!((h.transport.pauses(), h.transport.resumes()), (1, 1));
}

#[tokio::test]
async fn test_volume_bounds_and_application() {
    let h = Harness::new();

    assert_eq!(h.controller.set_volume(150).await.unwrap_err(), PlaybackError::InvalidVolume(150));
    assert_eq!(h.controller.set_volume(-1).await.unwrap_err(), PlaybackError::InvalidVolume(-1));

    h.controller.set_volume(40).await.unwrap();
    h.controller.submit("https://youtu.be/a").await.unwrap();

    assert_eq!(h.controller.volume().await.unwrap(), 40);
    assert_eq!(h.transport.volumes(), vec![0.4]);
    assert_eq!(h.transport.last_play_volume(), Some(0.4));
}

#[tokio::test]
async fn test_rejected_volume_change_keeps_old_volume() {
    let h = Harness::new();
    h.controller.submit("https://youtu.be/a").await.unwrap();
    h.transport.fail_next_volume();

    assert!(matches!(
        h.controller.set_volume(30).await.unwrap_err(),
        PlaybackError::Transport(_)
    ));
    assert_eq!(h.controller.volume().await.unwrap(), 100);
}

#[tokio::test]
async fn test_move_and_remove() {
    let h = Harness::new();
    for name in ["a", "b", "c", "d"] {
        h.controller.submit(&format!("https://youtu.be/{name}")).await.unwrap();
    }

    let moved = h.controller.move_track(0, 2).await.unwrap();
    assert_eq!(moved.reference(), "https://youtu.be/b");
    assert_eq!(
        h.upcoming().await,
        vec!["https://youtu.be/c", "https://youtu.be/d", "https://youtu.be/b"]
    );

    assert_eq!(
        h.controller.move_track(0, 3).await.unwrap_err(),
        PlaybackError::IndexOutOfRange { index: 3, len: 3 }
    );

    let removed = h.controller.remove(1).await.unwrap();
    assert_eq!(removed.reference(), "https://youtu.be/d");
    assert_eq!(h.controller.status().await.queued, 2);
}

#[tokio::test]
async fn test_clear_stops_current_and_empties_queue() {
    let h = Harness::new();
    for name in ["a", "b", "c"] {
        h.controller.submit(&format!("https://youtu.be/{name}")).await.unwrap();
    }

    h.controller.clear().await.unwrap();
    h.transport.settle().await;

    let status = h.controller.status().await;
    assert_eq!(status.playback, PlaybackState::Idle);
    assert_eq!(status.queued, 0);
    assert!(status.current.is_none());
    assert!(h.controller.history().await.unwrap().is_empty());
    assert_eq!(h.transport.plays().len(), 1);
}

#[tokio::test]
async fn test_previous_after_clear_has_nothing_to_replay() {
    let h = Harness::new();
    h.controller.submit("https://youtu.be/a").await.unwrap();
    h.controller.submit("https://youtu.be/b").await.unwrap();

    h.controller.clear().await.unwrap();
    h.transport.settle().await;

    assert!(h.controller.previous().await.unwrap().is_none());
    assert_eq!(h.transport.plays(), vec![stream("a")]);
    assert_eq!(h.controller.status().await.playback, PlaybackState::Idle);
}

#[tokio::test]
async fn test_transport_refusal_is_reported() {
    let mut h = Harness::new();
    h.transport.fail_next_play();

    let err = h.controller.submit("https://youtu.be/a").await.unwrap_err();

    assert!(matches!(err, PlaybackError::Transport(_)));
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, SessionEvent::TrackFailed { error: PlaybackError::Transport(_), .. })));
    assert_eq!(h.controller.status().await.playback, PlaybackState::Idle);
}

#[tokio::test]
async fn test_playback_error_moves_on() {
    let mut h = Harness::new();
    h.controller.submit("https://youtu.be/a").await.unwrap();
    h.controller.submit("https://youtu.be/b").await.unwrap();

    h.transport.finish(Some("decoder error")).await;

    assert_eq!(h.now_playing().await.as_deref(), Some("https://youtu.be/b"));
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        SessionEvent::TrackFailed { track, .. } if track.reference() == "https://youtu.be/a"
    )));
}

#[tokio::test]
async fn test_disconnect_closes_the_session() {
    let mut h = Harness::new();
    h.controller.submit("https://youtu.be/a").await.unwrap();

    h.controller.disconnect(DisconnectReason::Requested).await.unwrap();

    assert_eq!(h.transport.disconnects(), 1);
    assert!(!h.controller.is_connected().await);
    assert!(!h.controller.status().await.idle_timer_armed);
    assert!(matches!(
        h.drain_events().last(),
        Some(SessionEvent::Disconnected { reason: DisconnectReason::Requested })
    ));
    assert_eq!(
        h.controller.submit("https://youtu.be/b").await.unwrap_err(),
        PlaybackError::NoActiveSession
    );
    assert_eq!(
        h.controller.disconnect(DisconnectReason::Requested).await.unwrap_err(),
        PlaybackError::NoActiveSession
    );
}

#[tokio::test(start_paused = true)]
async fn test_idle_check_while_playing_rearms() {
    let h = Harness::new();
    h.controller.submit("https://youtu.be/a").await.unwrap();

    tokio::time::sleep(Duration::from_secs(601)).await;

    assert_eq!(h.transport.disconnects(), 0);
    assert!(h.controller.status().await.idle_timer_armed);
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_disconnects() {
    let mut h = Harness::new();

    tokio::time::sleep(Duration::from_secs(601)).await;

    assert_eq!(h.transport.disconnects(), 1);
    assert!(matches!(
        h.drain_events().last(),
        Some(SessionEvent::Disconnected { reason: DisconnectReason::Idle })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_empty_channel_disconnects_even_while_playing() {
    let mut h = Harness::new();
    h.controller.submit("https://youtu.be/a").await.unwrap();
    h.transport.set_listeners(Some(0));

    tokio::time::sleep(Duration::from_secs(601)).await;

    assert_eq!(h.transport.disconnects(), 1);
    assert!(matches!(
        h.drain_events().last(),
        Some(SessionEvent::Disconnected { reason: DisconnectReason::NoListeners })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_idle_timeout_keeps_session() {
    let h = Harness::with_options(SessionOptions {
        idle_timeout_enabled: false,
        ..SessionOptions::default()
    });

    tokio::time::sleep(Duration::from_secs(1801)).await;

    assert_eq!(h.transport.disconnects(), 0);
    assert!(h.controller.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_track_end_restarts_idle_countdown() {
    let h = Harness::new();
    h.controller.submit("https://youtu.be/a").await.unwrap();

    tokio::time::sleep(Duration::from_secs(500)).await;
    h.transport.finish(None).await;
    tokio::time::sleep(Duration::from_secs(500)).await;
    assert_eq!(h.transport.disconnects(), 0);

    tokio::time::sleep(Duration::from_secs(101)).await;
    assert_eq!(h.transport.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_loop_restart_keeps_idle_countdown_running() {
    let mut h = Harness::new();
    h.controller.submit("https://youtu.be/a").await.unwrap();
    h.controller.toggle_loop().await.unwrap();

    tokio::time::sleep(Duration::from_secs(500)).await;
    h.transport.finish(None).await;
    h.transport.set_listeners(Some(0));

    // Still the countdown armed by the submit.
    tokio::time::sleep(Duration::from_secs(101)).await;
    assert_eq!(h.transport.plays(), vec![stream("a"), stream("a")]);
    assert_eq!(h.transport.disconnects(), 1);
    assert!(matches!(
        h.drain_events().last(),
        Some(SessionEvent::Disconnected { reason: DisconnectReason::NoListeners })
    ));
}

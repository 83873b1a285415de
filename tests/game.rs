mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::{C_NOTE, FakeApi, SESSION_ID};
use flappy_piano::game::{Game, GameOptions, Phase};
use flappy_piano::mapper::{MapperConfig, PianoInputMapper};
use flappy_piano::midi::{ConnectionStatus, DeviceEvent};
use flappy_piano::tracking::{TrackingBridge, TrackingSettings};

fn note_on(note: u8) -> DeviceEvent {
    DeviceEvent::Message(vec![0x90, note, 100])
}

fn note_off(note: u8) -> DeviceEvent {
    DeviceEvent::Message(vec![0x80, note, 0])
}

fn tracked_game(api: FakeApi) -> Game {
    let tracker = TrackingBridge::new(Box::new(api), TrackingSettings::default());
    let mut game = Game::new(
        80,
        48,
        PianoInputMapper::new(MapperConfig::default()),
        Some(tracker),
        GameOptions {
            practice: true,
            ..Default::default()
        },
    );
    let deadline = Instant::now() + Duration::from_secs(2);
    while !game.tracker().is_some_and(TrackingBridge::is_ready) {
        assert!(Instant::now() < deadline, "tracker never became ready");
        game.tick(Instant::now());
        thread::sleep(Duration::from_millis(5));
    }
    game
}

#[test]
fn piano_press_during_a_run_is_recorded() {
    let api = FakeApi::default();
    let calls = api.calls.clone();
    let mut game = tracked_game(api);

    game.start();
    assert_eq!(game.phase(), Phase::Playing);
    assert!(game.tracker().unwrap().has_session());

    let now = Instant::now();
    game.handle_device_event(note_on(72), now);
    assert!(game.mapper().up());
    // Holding the key is one attempt, not one per event.
    game.handle_device_event(note_on(84), now);
    game.handle_device_event(note_off(84), now);
    game.handle_device_event(note_off(72), now);
    assert!(!game.mapper().up());

    assert_eq!(game.tracker().unwrap().summary().unwrap().successes, 1);

    game.shutdown(Duration::from_secs(2));
    let summary = game.last_summary().unwrap();
    assert_eq!(summary.score, 10);

    let calls = calls.lock().unwrap();
    let events = calls.all_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].session_id, SESSION_ID);
    assert_eq!(events[0].attempt.played_chord_id, Some(C_NOTE));
    assert_eq!(calls.ends.len(), 1);
}

#[test]
fn presses_outside_a_run_are_not_recorded() {
    let mut game = tracked_game(FakeApi::default());
    game.handle_device_event(note_on(60), Instant::now());
    assert!(game.mapper().up());
    assert!(game.tracker().unwrap().summary().is_none());
}

#[test]
fn restart_closes_the_previous_session() {
    let api = FakeApi::default();
    let calls = api.calls.clone();
    let mut game = tracked_game(api);

    game.start();
    game.handle_device_event(note_on(67), Instant::now());
    game.restart();
    assert_eq!(game.phase(), Phase::Playing);
    assert_eq!(game.last_summary().unwrap().successes, 1);
    assert!(game.tracker().unwrap().summary().is_some_and(|s| s.successes == 0));

    game.shutdown(Duration::from_secs(2));
    let calls = calls.lock().unwrap();
    assert_eq!(calls.starts.len(), 2);
    assert_eq!(calls.ends.len(), 2);
}

#[test]
fn disconnect_releases_held_notes() {
    let mut game = tracked_game(FakeApi::default());
    game.handle_device_event(note_on(60), Instant::now());
    assert!(game.mapper().up());

    game.handle_device_event(
        DeviceEvent::Status(ConnectionStatus::disconnected()),
        Instant::now(),
    );
    assert!(!game.mapper().up());
    assert!(game.mapper().active_notes().is_empty());
}

#[test]
fn practice_run_keeps_flying_while_paused_and_resumed() {
    let mut game = tracked_game(FakeApi::default());
    game.start();
    for _ in 0..300 {
        game.tick(Instant::now());
    }
    assert_eq!(game.phase(), Phase::Playing);

    game.toggle_pause();
    let frozen = game.world().bird().y;
    game.tick(Instant::now());
    assert_eq!(game.world().bird().y, frozen);
    game.toggle_pause();
    assert_eq!(game.phase(), Phase::Playing);
    game.shutdown(Duration::from_secs(1));
}

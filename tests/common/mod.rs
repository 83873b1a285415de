#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use flappy_piano::error::TrackingError;
use flappy_piano::tracking::api::{
    MusicalKey, Progression, ReferenceChord, SessionEnd, SessionStart, SessionStarted,
};
use flappy_piano::tracking::{ChordEvent, TrackingApi, TrackingBridge};

pub const SESSION_ID: i64 = 555;
pub const C_NOTE: i64 = 42;
pub const G_NOTE: i64 = 43;
pub const C_MAJOR: i64 = 100;
pub const G_MAJOR: i64 = 101;

/// Everything the fake service was asked to do.
#[derive(Default)]
pub struct Calls {
    pub starts: Vec<SessionStart>,
    pub single: Vec<ChordEvent>,
    pub batches: Vec<Vec<ChordEvent>>,
    pub ends: Vec<SessionEnd>,
}

impl Calls {
    pub fn all_events(&self) -> Vec<ChordEvent> {
        let mut events = self.single.clone();
        events.extend(self.batches.iter().flatten().cloned());
        events
    }
}

#[derive(Clone, Default)]
pub struct FakeApi {
    pub calls: Arc<Mutex<Calls>>,
    pub start_delay: Duration,
    pub fail_posts: bool,
    pub fail_start: bool,
    pub no_chords: bool,
}

fn entry(id: i64, root: &str, quality: Option<&str>) -> ReferenceChord {
    ReferenceChord {
        id,
        name: format!("{root} {}", quality.unwrap_or("note")),
        root: root.to_string(),
        quality: quality.map(str::to_string),
        inversion: 0,
    }
}

impl TrackingApi for FakeApi {
    fn keys(&self) -> Result<Vec<MusicalKey>, TrackingError> {
        Ok(vec![
            MusicalKey {
                id: 7,
                name: "C".to_string(),
            },
            MusicalKey {
                id: 8,
                name: "G".to_string(),
            },
        ])
    }

    fn chords(&self, key_id: i64) -> Result<Vec<ReferenceChord>, TrackingError> {
        if self.no_chords {
            return Ok(Vec::new());
        }
        assert_eq!(key_id, 7);
        Ok(vec![
            entry(C_NOTE, "C", None),
            entry(G_NOTE, "G", None),
            entry(C_MAJOR, "C", Some("major")),
            entry(G_MAJOR, "G", Some("major")),
        ])
    }

    fn progression_for_level(&self, level_id: i64) -> Result<Progression, TrackingError> {
        Ok(Progression {
            id: level_id,
            key_id: 7,
            name: "level".to_string(),
        })
    }

    fn start_session(&self, request: &SessionStart) -> Result<SessionStarted, TrackingError> {
        thread::sleep(self.start_delay);
        self.calls.lock().unwrap().starts.push(request.clone());
        if self.fail_start {
            return Err(TrackingError::Http {
                endpoint: "/api/sessions/start".to_string(),
                message: "503 Service Unavailable".to_string(),
            });
        }
        Ok(SessionStarted {
            session_id: SESSION_ID,
        })
    }

    fn end_session(&self, request: &SessionEnd) -> Result<(), TrackingError> {
        self.calls.lock().unwrap().ends.push(request.clone());
        Ok(())
    }

    fn post_event(&self, event: &ChordEvent) -> Result<(), TrackingError> {
        if self.fail_posts {
            return Err(TrackingError::Http {
                endpoint: "/api/events/chord".to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.calls.lock().unwrap().single.push(event.clone());
        Ok(())
    }

    fn post_batch(&self, events: &[ChordEvent]) -> Result<(), TrackingError> {
        if self.fail_posts {
            return Err(TrackingError::Http {
                endpoint: "/api/events/batch".to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.calls.lock().unwrap().batches.push(events.to_vec());
        Ok(())
    }
}

/// Polls until `done` holds, for at most two seconds.
pub fn wait_for(bridge: &mut TrackingBridge, done: impl Fn(&TrackingBridge) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        bridge.poll();
        if done(bridge) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

//! Optional practice telemetry.
//!
//! Nothing in here can stop the game. Every call is queued to the worker
//! thread, every failure is logged and then forgotten, and results are only
//! applied if they still belong to a live session.

pub mod api;
pub mod reference;
mod worker;

use std::time::{Duration, Instant};

use crate::mapper::{Action, MapperConfig};

pub use api::{Attempt, ChordEvent, Hand, HttpTrackingApi, TrackingApi};
pub use reference::{ExpectedIds, Played, ReferenceData};

use api::{SessionEnd, SessionStart};
use worker::{Job, Outcome, Worker};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackingSettings {
    pub user_id: i64,
    pub game_id: i64,
    /// When set, the practice key comes from this progression level.
    pub level_id: Option<i64>,
    /// Key name to pick from `/api/keys` when no level is given.
    pub key: Option<String>,
    pub batch_size: usize,
    pub hand: Hand,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            user_id: 1,
            game_id: 1,
            level_id: None,
            key: None,
            batch_size: 10,
            hand: Hand::Right,
        }
    }
}

/// `max(0, 10·successes − 2·errors)`
pub fn session_score(successes: u32, errors: u32) -> u32 {
    (10 * i64::from(successes) - 2 * i64::from(errors)).clamp(0, i64::from(u32::MAX)) as u32
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    pub score: u32,
    pub successes: u32,
    pub errors: u32,
}

#[derive(Clone, Debug)]
struct TrackingSession {
    generation: u64,
    session_id: Option<i64>,
    next_position: u32,
    successes: u32,
    errors: u32,
    expected: ExpectedIds,
    last_prompt: [Option<Instant>; 2],
    queue: Vec<Attempt>,
    /// The server refused the start; only the counters are kept.
    start_failed: bool,
}

impl TrackingSession {
    fn new(generation: u64, expected: ExpectedIds) -> Self {
        Self {
            generation,
            session_id: None,
            next_position: 0,
            successes: 0,
            errors: 0,
            expected,
            last_prompt: [None, None],
            queue: Vec::new(),
            start_failed: false,
        }
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            score: session_score(self.successes, self.errors),
            successes: self.successes,
            errors: self.errors,
        }
    }

    /// Sends everything queued, if the server has given us an id yet.
    fn flush(&mut self, worker: &mut Worker) {
        let Some(session_id) = self.session_id else {
            return;
        };
        if self.queue.is_empty() {
            return;
        }
        let events = self
            .queue
            .drain(..)
            .map(|attempt| ChordEvent {
                session_id,
                attempt,
            })
            .collect();
        if let Err(e) = worker.submit(Job::PostEvents {
            generation: self.generation,
            events,
        }) {
            log::warn!(target: "tracking", "dropping events: {e}");
        }
    }

    fn finish(&mut self, worker: &mut Worker) {
        self.flush(worker);
        let Some(session_id) = self.session_id else {
            return;
        };
        let summary = self.summary();
        let request = SessionEnd {
            session_id,
            final_score: summary.score,
            success_count: summary.successes,
            error_count: summary.errors,
        };
        if let Err(e) = worker.submit(Job::EndSession {
            generation: self.generation,
            request,
        }) {
            log::warn!(target: "tracking", "could not end session {session_id}: {e}");
        }
    }
}

fn slot(action: Action) -> usize {
    match action {
        Action::Up => 0,
        Action::Down => 1,
    }
}

pub struct TrackingBridge {
    settings: TrackingSettings,
    worker: Worker,
    config: MapperConfig,
    reference: Option<ReferenceData>,
    expected: ExpectedIds,
    ready: bool,
    configuring: bool,
    generation: u64,
    session: Option<TrackingSession>,
    /// Ended sessions still waiting for their id from the server.
    closing: Vec<TrackingSession>,
}

impl TrackingBridge {
    pub fn new(api: Box<dyn TrackingApi>, settings: TrackingSettings) -> Self {
        Self {
            settings,
            worker: Worker::spawn(api),
            config: MapperConfig::default(),
            reference: None,
            expected: ExpectedIds::default(),
            ready: false,
            configuring: false,
            generation: 0,
            session: None,
            closing: Vec::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn expected_ids(&self) -> ExpectedIds {
        self.expected
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_id(&self) -> Option<i64> {
        self.session.as_ref().and_then(|s| s.session_id)
    }

    pub fn summary(&self) -> Option<SessionSummary> {
        self.session.as_ref().map(TrackingSession::summary)
    }

    /// Events held back until their session has an id.
    pub fn queued_events(&self) -> usize {
        self.session
            .iter()
            .chain(&self.closing)
            .map(|s| s.queue.len())
            .sum()
    }

    pub fn status_line(&self) -> String {
        match (&self.session, self.ready, self.configuring) {
            (Some(s), _, _) => format!("tracking {}✓ {}✗", s.successes, s.errors),
            (None, true, _) => "tracking ready".to_string(),
            (None, false, true) => "tracking…".to_string(),
            (None, false, false) => "tracking off".to_string(),
        }
    }

    /// Fetches reference data and resolves expected ids for `config`.
    /// Readiness is reported later through [`poll`](Self::poll).
    pub fn configure(&mut self, config: &MapperConfig) {
        self.config = *config;
        self.ready = false;
        let job = Job::FetchReference {
            level_id: self.settings.level_id,
            key: self.settings.key.clone(),
        };
        match self.worker.submit(job) {
            Ok(()) => self.configuring = true,
            Err(e) => log::warn!(target: "tracking", "tracking disabled: {e}"),
        }
    }

    /// Re-resolves expected ids after the mapper config changed.
    pub fn retarget(&mut self, config: &MapperConfig) {
        self.config = *config;
        let Some(reference) = &self.reference else {
            return;
        };
        self.expected = reference.expected_ids(config);
        self.ready = self.expected.is_complete();
        if !self.ready {
            log::warn!(
                target: "tracking",
                "no reference id for {} ({:?}), tracking paused",
                config.describe(),
                self.expected
            );
        }
        if let Some(session) = self.session.as_mut() {
            session.expected = self.expected;
        }
    }

    /// Opens a session for a new run. Returns `false` when tracking isn't
    /// ready, in which case the run simply goes unrecorded.
    pub fn start_session(&mut self) -> bool {
        if self.session.is_some() {
            self.end_session();
        }
        if !self.ready {
            return false;
        }
        let Some(reference) = &self.reference else {
            return false;
        };

        self.generation += 1;
        let request = SessionStart {
            user_id: self.settings.user_id,
            game_id: self.settings.game_id,
            progression_key_id: reference.progression_key_id,
        };
        if let Err(e) = self.worker.submit(Job::StartSession {
            generation: self.generation,
            request,
        }) {
            log::warn!(target: "tracking", "could not start session: {e}");
            return false;
        }
        self.session = Some(TrackingSession::new(self.generation, self.expected));
        true
    }

    /// Flushes, then reports the final score. If the server hasn't answered
    /// the start yet, the end is sent as soon as it does.
    pub fn end_session(&mut self) -> Option<SessionSummary> {
        let mut session = self.session.take()?;
        let summary = session.summary();
        if session.session_id.is_some() {
            session.finish(&mut self.worker);
        } else if !session.start_failed {
            self.closing.push(session);
        }
        log::info!(
            target: "tracking",
            "session over: score {} ({} ok, {} wrong)",
            summary.score,
            summary.successes,
            summary.errors
        );
        Some(summary)
    }

    /// Marks the moment `action` was asked of the player.
    pub fn prompt(&mut self, action: Action, at: Instant) {
        if let Some(session) = self.session.as_mut() {
            session.last_prompt[slot(action)] = Some(at);
        }
    }

    /// Records one detected action. A no-op unless tracking is ready and a
    /// session is open.
    pub fn record_action(&mut self, action: Action, played: &Played, at: Instant) -> Option<Attempt> {
        if !self.ready {
            return None;
        }
        let session = self.session.as_mut()?;
        let expected = session.expected.get(action);
        let played_id = self
            .reference
            .as_ref()
            .and_then(|reference| reference.played_id(played));

        let prompted = session.last_prompt[slot(action)].unwrap_or(at);
        let response_time = at.saturating_duration_since(prompted);

        let is_correct = matches!((expected, played_id), (Some(e), Some(p)) if e == p);
        if is_correct {
            session.successes += 1;
        } else {
            session.errors += 1;
        }

        let attempt = Attempt {
            expected_chord_id: expected,
            played_chord_id: played_id,
            is_correct,
            response_time_ms: response_time.as_millis() as u64,
            sequence_position: session.next_position,
            hand: self.settings.hand,
        };
        session.next_position += 1;
        if !session.start_failed {
            session.queue.push(attempt.clone());
            if session.queue.len() >= self.settings.batch_size.max(1) {
                session.flush(&mut self.worker);
            }
        }
        Some(attempt)
    }

    /// Applies whatever the worker has finished. Call once per frame.
    pub fn poll(&mut self) {
        while let Some(outcome) = self.worker.try_recv() {
            self.apply(outcome);
        }
    }

    /// Blocks until every outstanding call has answered or `timeout` passes.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.worker.in_flight() > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.worker.recv_timeout(deadline - now) {
                Some(outcome) => self.apply(outcome),
                None => return self.worker.in_flight() == 0,
            }
        }
        true
    }

    fn apply(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Reference(Ok(reference)) => {
                self.configuring = false;
                log::info!(
                    target: "tracking",
                    "reference data: key {} with {} entries",
                    reference.progression_key_id,
                    reference.entries.len()
                );
                self.reference = Some(reference);
                let config = self.config;
                self.retarget(&config);
            }
            Outcome::Reference(Err(e)) => {
                self.configuring = false;
                self.ready = false;
                log::warn!(target: "tracking", "reference data unavailable, tracking disabled: {e}");
            }
            Outcome::SessionStarted {
                generation,
                result: Ok(session_id),
            } => self.on_session_started(generation, session_id),
            Outcome::SessionStarted {
                generation,
                result: Err(e),
            } => {
                log::warn!(target: "tracking", "session start failed: {e}");
                if let Some(session) = self
                    .session
                    .as_mut()
                    .filter(|s| s.generation == generation)
                {
                    session.start_failed = true;
                    session.queue.clear();
                }
                self.closing.retain(|s| s.generation != generation);
            }
            Outcome::EventsPosted {
                count,
                result: Err(e),
                ..
            } => log::warn!(target: "tracking", "lost {count} events: {e}"),
            Outcome::EventsPosted { count, .. } => {
                log::debug!(target: "tracking", "posted {count} events")
            }
            Outcome::SessionEnded {
                generation,
                result,
            } => match result {
                Ok(()) => log::debug!(target: "tracking", "session #{generation} closed"),
                Err(e) => log::warn!(target: "tracking", "session end failed: {e}"),
            },
        }
    }

    fn on_session_started(&mut self, generation: u64, session_id: i64) {
        if let Some(session) = self
            .session
            .as_mut()
            .filter(|s| s.generation == generation)
        {
            log::info!(target: "tracking", "session {session_id} started");
            session.session_id = Some(session_id);
            if session.queue.len() >= self.settings.batch_size.max(1) {
                session.flush(&mut self.worker);
            }
            return;
        }
        if let Some(pos) = self.closing.iter().position(|s| s.generation == generation) {
            let mut session = self.closing.swap_remove(pos);
            session.session_id = Some(session_id);
            session.finish(&mut self.worker);
            return;
        }
        log::debug!(target: "tracking", "ignoring stale session {session_id}");
    }
}

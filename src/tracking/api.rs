//! The practice-tracking HTTP service, as seen from the game.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::TrackingError;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicalKey {
    pub id: i64,
    pub name: String,
}

/// One playable chord or single note the service knows for a key.
/// Single notes have no quality.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceChord {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub root: String,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub inversion: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progression {
    pub id: i64,
    pub key_id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStart {
    pub user_id: i64,
    pub game_id: i64,
    pub progression_key_id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStarted {
    pub session_id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnd {
    pub session_id: i64,
    pub final_score: u32,
    pub success_count: u32,
    pub error_count: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    Left,
    #[default]
    Right,
    Both,
}

/// A single detected action, as recorded during play.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub expected_chord_id: Option<i64>,
    pub played_chord_id: Option<i64>,
    pub is_correct: bool,
    pub response_time_ms: u64,
    pub sequence_position: u32,
    pub hand: Hand,
}

/// An [`Attempt`] bound to the session it was played in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChordEvent {
    pub session_id: i64,
    #[serde(flatten)]
    pub attempt: Attempt,
}

#[derive(Serialize)]
struct EventBatch<'a> {
    events: &'a [ChordEvent],
}

/// Calls the game makes against the tracking service.
///
/// Implementations block; they are only ever called from the tracking
/// worker thread.
pub trait TrackingApi: Send {
    fn keys(&self) -> Result<Vec<MusicalKey>, TrackingError>;
    fn chords(&self, key_id: i64) -> Result<Vec<ReferenceChord>, TrackingError>;
    fn progression_for_level(&self, level_id: i64) -> Result<Progression, TrackingError>;
    fn start_session(&self, request: &SessionStart) -> Result<SessionStarted, TrackingError>;
    fn end_session(&self, request: &SessionEnd) -> Result<(), TrackingError>;
    fn post_event(&self, event: &ChordEvent) -> Result<(), TrackingError>;
    fn post_batch(&self, events: &[ChordEvent]) -> Result<(), TrackingError>;
}

pub struct HttpTrackingApi {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpTrackingApi {
    pub fn new(base_url: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(5))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<(&str, String)>,
    ) -> Result<T, TrackingError> {
        let mut request = self.agent.get(&self.url(path));
        if let Some((name, value)) = &query {
            request = request.query(name, value);
        }
        let response = request.call().map_err(|e| http_error(path, e))?;
        response.into_json().map_err(|source| TrackingError::Decode {
            endpoint: path.to_string(),
            source,
        })
    }

    fn post(&self, path: &str, body: impl Serialize) -> Result<ureq::Response, TrackingError> {
        self.agent
            .post(&self.url(path))
            .send_json(body)
            .map_err(|e| http_error(path, e))
    }
}

fn http_error(endpoint: &str, err: ureq::Error) -> TrackingError {
    TrackingError::Http {
        endpoint: endpoint.to_string(),
        message: err.to_string(),
    }
}

impl TrackingApi for HttpTrackingApi {
    fn keys(&self) -> Result<Vec<MusicalKey>, TrackingError> {
        self.get_json("/api/keys", None)
    }

    fn chords(&self, key_id: i64) -> Result<Vec<ReferenceChord>, TrackingError> {
        self.get_json("/api/chords", Some(("keyId", key_id.to_string())))
    }

    fn progression_for_level(&self, level_id: i64) -> Result<Progression, TrackingError> {
        self.get_json(&format!("/api/progressions/level/{level_id}"), None)
    }

    fn start_session(&self, request: &SessionStart) -> Result<SessionStarted, TrackingError> {
        let path = "/api/sessions/start";
        self.post(path, request)?
            .into_json()
            .map_err(|source| TrackingError::Decode {
                endpoint: path.to_string(),
                source,
            })
    }

    fn end_session(&self, request: &SessionEnd) -> Result<(), TrackingError> {
        self.post("/api/sessions/end", request).map(drop)
    }

    fn post_event(&self, event: &ChordEvent) -> Result<(), TrackingError> {
        self.post("/api/events/chord", event).map(drop)
    }

    fn post_batch(&self, events: &[ChordEvent]) -> Result<(), TrackingError> {
        self.post("/api/events/batch", EventBatch { events }).map(drop)
    }
}

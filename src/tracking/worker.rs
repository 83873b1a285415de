//! Runs tracking calls off the frame loop.
//!
//! Jobs go in over one channel, outcomes come back over another and are
//! applied by [`super::TrackingBridge::poll`].

use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::TrackingError;

use super::api::{ChordEvent, SessionEnd, SessionStart, TrackingApi};
use super::reference::ReferenceData;

pub(crate) enum Job {
    FetchReference {
        level_id: Option<i64>,
        key: Option<String>,
    },
    StartSession {
        generation: u64,
        request: SessionStart,
    },
    PostEvents {
        generation: u64,
        events: Vec<ChordEvent>,
    },
    EndSession {
        generation: u64,
        request: SessionEnd,
    },
}

pub(crate) enum Outcome {
    Reference(Result<ReferenceData, TrackingError>),
    SessionStarted {
        generation: u64,
        result: Result<i64, TrackingError>,
    },
    EventsPosted {
        generation: u64,
        count: usize,
        result: Result<(), TrackingError>,
    },
    SessionEnded {
        generation: u64,
        result: Result<(), TrackingError>,
    },
}

pub(crate) struct Worker {
    jobs: Option<Sender<Job>>,
    outcomes: Receiver<Outcome>,
    in_flight: usize,
}

impl Worker {
    pub(crate) fn spawn(api: Box<dyn TrackingApi>) -> Self {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (out_tx, out_rx) = crossbeam_channel::unbounded();

        let spawned = thread::Builder::new()
            .name("tracking".into())
            .spawn(move || {
                for job in job_rx {
                    if out_tx.send(run(api.as_ref(), job)).is_err() {
                        break;
                    }
                }
            });

        let jobs = match spawned {
            Ok(_) => Some(job_tx),
            Err(e) => {
                log::warn!(target: "tracking", "could not start tracking worker: {e}");
                None
            }
        };
        Self {
            jobs,
            outcomes: out_rx,
            in_flight: 0,
        }
    }

    pub(crate) fn submit(&mut self, job: Job) -> Result<(), TrackingError> {
        let jobs = self.jobs.as_ref().ok_or(TrackingError::WorkerGone)?;
        jobs.send(job).map_err(|_| TrackingError::WorkerGone)?;
        self.in_flight += 1;
        Ok(())
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub(crate) fn try_recv(&mut self) -> Option<Outcome> {
        let outcome = self.outcomes.try_recv().ok()?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(outcome)
    }

    pub(crate) fn recv_timeout(&mut self, timeout: Duration) -> Option<Outcome> {
        match self.outcomes.recv_timeout(timeout) {
            Ok(outcome) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Some(outcome)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.in_flight = 0;
                None
            }
        }
    }
}

fn run(api: &dyn TrackingApi, job: Job) -> Outcome {
    match job {
        Job::FetchReference { level_id, key } => {
            Outcome::Reference(fetch_reference(api, level_id, key.as_deref()))
        }
        Job::StartSession {
            generation,
            request,
        } => Outcome::SessionStarted {
            generation,
            result: api.start_session(&request).map(|s| s.session_id),
        },
        Job::PostEvents { generation, events } => {
            let result = match events.as_slice() {
                [single] => api.post_event(single),
                many => api.post_batch(many),
            };
            Outcome::EventsPosted {
                generation,
                count: events.len(),
                result,
            }
        }
        Job::EndSession {
            generation,
            request,
        } => Outcome::SessionEnded {
            generation,
            result: api.end_session(&request),
        },
    }
}

fn fetch_reference(
    api: &dyn TrackingApi,
    level_id: Option<i64>,
    key: Option<&str>,
) -> Result<ReferenceData, TrackingError> {
    let progression_key_id = match level_id {
        Some(level) => api.progression_for_level(level)?.key_id,
        None => {
            let keys = api.keys()?;
            let wanted = key.and_then(|name| {
                keys.iter()
                    .find(|k| k.name.trim().eq_ignore_ascii_case(name.trim()))
            });
            wanted
                .or_else(|| keys.first())
                .map(|k| k.id)
                .ok_or_else(|| TrackingError::Missing("musical keys".to_string()))?
        }
    };
    let entries = api.chords(progression_key_id)?;
    if entries.is_empty() {
        return Err(TrackingError::Missing(format!(
            "chords for key {progression_key_id}"
        )));
    }
    Ok(ReferenceData {
        progression_key_id,
        entries,
    })
}

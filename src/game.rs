//! One game session: the world, its input collaborators and the phase
//! machine that drives them once per frame.

use std::time::{Duration, Instant};

use crate::mapper::{Action, ActionState, MapperConfigPatch, MapperMode, PianoInputMapper};
use crate::midi::DeviceEvent;
use crate::physics::{PhysicsTuning, StepOutcome, World};
use crate::theory::PitchClass;
use crate::tracking::{Played, SessionSummary, TrackingBridge};

pub const SPEED_MIN: f64 = 0.5;
pub const SPEED_MAX: f64 = 2.0;
pub const SPEED_STEP: f64 = 0.1;

/// How long a key press counts as held when the terminal can't report
/// releases. Auto-repeat keeps refreshing it.
pub const KEY_LATCH: Duration = Duration::from_millis(180);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Ready,
    Playing,
    Paused,
    Dying,
    Dead,
}

#[derive(Clone, Debug)]
pub struct GameOptions {
    pub speed: f64,
    pub practice: bool,
    pub tuning: PhysicsTuning,
    pub seed: u64,
    /// `None` when key releases are reported by the terminal.
    pub key_latch: Option<Duration>,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            practice: false,
            tuning: PhysicsTuning::default(),
            seed: 0x5eed,
            key_latch: Some(KEY_LATCH),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum KeyHold {
    #[default]
    Released,
    Held,
    Until(Instant),
}

impl KeyHold {
    fn active(self, now: Instant) -> bool {
        match self {
            KeyHold::Released => false,
            KeyHold::Held => true,
            KeyHold::Until(deadline) => now < deadline,
        }
    }
}

/// Arrow keys mapped onto the same actions as the piano.
#[derive(Clone, Debug, Default)]
pub struct KeyboardState {
    up: KeyHold,
    down: KeyHold,
}

impl KeyboardState {
    fn slot(&mut self, action: Action) -> &mut KeyHold {
        match action {
            Action::Up => &mut self.up,
            Action::Down => &mut self.down,
        }
    }

    pub fn press(&mut self, action: Action, now: Instant, latch: Option<Duration>) {
        *self.slot(action) = match latch {
            Some(latch) => KeyHold::Until(now + latch),
            None => KeyHold::Held,
        };
    }

    pub fn release(&mut self, action: Action) {
        *self.slot(action) = KeyHold::Released;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn actions(&self, now: Instant) -> ActionState {
        ActionState {
            up: self.up.active(now),
            down: self.down.active(now),
        }
    }
}

pub struct Game {
    pw: usize,
    ph: usize,
    world: World,
    mapper: PianoInputMapper,
    tracker: Option<TrackingBridge>,
    keys: KeyboardState,
    phase: Phase,
    speed: f64,
    practice: bool,
    tuning: PhysicsTuning,
    seed: u64,
    runs: u64,
    key_latch: Option<Duration>,
    frame: u64,
    score: u32,
    best: u32,
    dead_timer: u32,
    last_summary: Option<SessionSummary>,
}

impl Game {
    pub fn new(
        pw: usize,
        ph: usize,
        mapper: PianoInputMapper,
        tracker: Option<TrackingBridge>,
        options: GameOptions,
    ) -> Self {
        let mut game = Self {
            pw,
            ph,
            world: World::new(pw, ph, &options.tuning, options.seed),
            mapper,
            tracker,
            keys: KeyboardState::default(),
            phase: Phase::Ready,
            speed: 1.0,
            practice: options.practice,
            tuning: options.tuning,
            seed: options.seed,
            runs: 0,
            key_latch: options.key_latch,
            frame: 0,
            score: 0,
            best: 0,
            dead_timer: 0,
            last_summary: None,
        };
        game.set_speed(options.speed);
        let config = *game.mapper.config();
        if let Some(tracker) = game.tracker.as_mut() {
            tracker.configure(&config);
        }
        game
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn mapper(&self) -> &PianoInputMapper {
        &self.mapper
    }

    pub fn tracker(&self) -> Option<&TrackingBridge> {
        self.tracker.as_ref()
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn practice(&self) -> bool {
        self.practice
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn best(&self) -> u32 {
        self.best
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn dead_timer(&self) -> u32 {
        self.dead_timer
    }

    pub fn last_summary(&self) -> Option<SessionSummary> {
        self.last_summary
    }

    /// Piano and keyboard combined.
    pub fn actions(&self, now: Instant) -> ActionState {
        self.mapper.actions().or(self.keys.actions(now))
    }

    pub fn resize(&mut self, pw: usize, ph: usize) {
        self.pw = pw;
        self.ph = ph;
        self.end_tracking();
        self.world = World::new(pw, ph, &self.tuning, self.seed.wrapping_add(self.runs));
        self.phase = Phase::Ready;
        self.score = 0;
    }

    /// Starts a run from the title or game-over screen.
    pub fn start(&mut self) {
        if !matches!(self.phase, Phase::Ready | Phase::Dead) {
            return;
        }
        self.runs += 1;
        self.world = World::new(
            self.pw,
            self.ph,
            &self.tuning,
            self.seed.wrapping_add(self.runs),
        );
        self.score = 0;
        self.dead_timer = 0;
        self.phase = Phase::Playing;
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.start_session();
        }
        log::info!(
            "run {} started (speed {:.1}, {})",
            self.runs,
            self.speed,
            if self.practice { "practice" } else { "normal" }
        );
    }

    /// Abandons the current run and starts over.
    pub fn restart(&mut self) {
        if matches!(self.phase, Phase::Playing | Phase::Paused | Phase::Dying) {
            self.end_tracking();
            self.phase = Phase::Dead;
        }
        self.start();
    }

    pub fn toggle_pause(&mut self) {
        self.phase = match self.phase {
            Phase::Playing => {
                self.keys.clear();
                Phase::Paused
            }
            Phase::Paused => Phase::Playing,
            other => other,
        };
    }

    pub fn set_speed(&mut self, speed: f64) {
        let clamped = speed.clamp(SPEED_MIN, SPEED_MAX);
        // Keep it on the 0.1 grid so repeated steps don't drift.
        self.speed = (clamped * 10.0).round() / 10.0;
    }

    pub fn adjust_speed(&mut self, steps: i32) {
        self.set_speed(self.speed + f64::from(steps) * SPEED_STEP);
    }

    pub fn toggle_practice(&mut self) {
        self.practice = !self.practice;
    }

    pub fn update_mapper_config(&mut self, patch: &MapperConfigPatch) {
        self.mapper.update_config(patch);
        let config = *self.mapper.config();
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.retarget(&config);
        }
    }

    pub fn toggle_mapper_mode(&mut self) {
        let mode = self.mapper.config().mode.toggled();
        self.update_mapper_config(&MapperConfigPatch {
            mode: Some(mode),
            ..Default::default()
        });
    }

    pub fn key_down(&mut self, action: Action, now: Instant) {
        self.keys.press(action, now, self.key_latch);
    }

    pub fn key_up(&mut self, action: Action) {
        self.keys.release(action);
    }

    /// Feeds one device event to the mapper and reports any newly fired
    /// action to the tracker.
    pub fn handle_device_event(&mut self, event: DeviceEvent, now: Instant) {
        let before = self.mapper.actions();
        self.mapper.handle(event);
        let after = self.mapper.actions();
        if self.phase != Phase::Playing {
            return;
        }
        let Some(tracker) = self.tracker.as_mut() else {
            return;
        };
        for action in after.rising_since(before) {
            let played = match self.mapper.config().mode {
                MapperMode::Note => match self.mapper.last_pressed() {
                    Some(note) => Played::Note(PitchClass::of_note(note)),
                    None => continue,
                },
                MapperMode::Chord => Played::Chord(self.mapper.signature()),
            };
            tracker.record_action(action, &played, now);
        }
    }

    /// One frame. Does nothing to the world while paused.
    pub fn tick(&mut self, now: Instant) {
        self.frame += 1;
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.poll();
        }

        match self.phase {
            Phase::Ready => self.world.hover(self.frame),
            Phase::Playing => self.play_frame(now),
            Phase::Paused => {}
            Phase::Dying => {
                if self.world.fall() {
                    self.phase = Phase::Dead;
                    self.dead_timer = 0;
                }
            }
            Phase::Dead => self.dead_timer += 1,
        }
    }

    fn play_frame(&mut self, now: Instant) {
        let newest = self.world.pipes().last().map(|p| p.id);
        let input = self.actions(now);
        let outcome = self.world.step(input, self.speed, self.practice, now);
        self.score = self.world.passed();

        if let Some(pipe) = self.world.pipes().last().filter(|p| Some(p.id) != newest) {
            let gap_center = (pipe.top_height + pipe.bottom_y) / 2.0;
            let wanted = if gap_center < self.world.bird().y {
                Action::Up
            } else {
                Action::Down
            };
            if let Some(tracker) = self.tracker.as_mut() {
                tracker.prompt(wanted, now);
            }
        }

        if outcome == StepOutcome::Crashed {
            self.crash();
        }
    }

    fn crash(&mut self) {
        self.phase = Phase::Dying;
        let bump = -1.2 * self.world.params().scale;
        self.world.bird_mut().vy = bump;
        self.keys.clear();
        self.best = self.best.max(self.score);
        self.end_tracking();
        log::info!("run {} over with score {}", self.runs, self.score);
    }

    fn end_tracking(&mut self) {
        if let Some(summary) = self.tracker.as_mut().and_then(TrackingBridge::end_session) {
            self.last_summary = Some(summary);
        }
    }

    /// Closes any open session and gives the final flush a moment to land.
    pub fn shutdown(&mut self, grace: Duration) {
        self.best = self.best.max(self.score);
        self.end_tracking();
        if let Some(tracker) = self.tracker.as_mut() {
            if !tracker.wait_idle(grace) {
                log::warn!(target: "tracking", "gave up waiting for the tracking service");
            }
        }
    }
}

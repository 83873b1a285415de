//! Turns held piano keys into the game's two actions.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::midi::{self, ConnectionStatus, DeviceEvent, NoteMessage};
use crate::theory::{self, ChordQuality, PitchClass};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapperMode {
    #[default]
    Note,
    Chord,
}

impl MapperMode {
    pub fn toggled(self) -> Self {
        match self {
            MapperMode::Note => MapperMode::Chord,
            MapperMode::Chord => MapperMode::Note,
        }
    }
}

impl FromStr for MapperMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "note" => Ok(MapperMode::Note),
            "chord" => Ok(MapperMode::Chord),
            other => Err(format!("unknown mapper mode `{other}` (expected note or chord)")),
        }
    }
}

/// Which of the two game actions something refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Up,
    Down,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChordTarget {
    pub root: PitchClass,
    pub quality: ChordQuality,
}

impl ChordTarget {
    pub fn pitch_classes(self) -> BTreeSet<PitchClass> {
        theory::triad(self.root, self.quality).into_iter().collect()
    }
}

impl fmt::Display for ChordTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.root, self.quality)
    }
}

/// Immutable snapshot; replaced wholesale by [`PianoInputMapper::update_config`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapperConfig {
    pub mode: MapperMode,
    pub up_note: PitchClass,
    pub down_note: PitchClass,
    pub up_chord: ChordTarget,
    pub down_chord: ChordTarget,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            mode: MapperMode::Note,
            up_note: PitchClass::C,
            down_note: PitchClass::G,
            up_chord: ChordTarget {
                root: PitchClass::C,
                quality: ChordQuality::Major,
            },
            down_chord: ChordTarget {
                root: PitchClass::G,
                quality: ChordQuality::Major,
            },
        }
    }
}

impl MapperConfig {
    pub fn note_for(&self, action: Action) -> PitchClass {
        match action {
            Action::Up => self.up_note,
            Action::Down => self.down_note,
        }
    }

    pub fn chord_for(&self, action: Action) -> ChordTarget {
        match action {
            Action::Up => self.up_chord,
            Action::Down => self.down_chord,
        }
    }

    /// Returns a copy with every `Some` field of `patch` applied.
    pub fn merged(&self, patch: &MapperConfigPatch) -> Self {
        Self {
            mode: patch.mode.unwrap_or(self.mode),
            up_note: patch.up_note.unwrap_or(self.up_note),
            down_note: patch.down_note.unwrap_or(self.down_note),
            up_chord: ChordTarget {
                root: patch.up_chord.unwrap_or(self.up_chord.root),
                quality: patch.up_chord_type.unwrap_or(self.up_chord.quality),
            },
            down_chord: ChordTarget {
                root: patch.down_chord.unwrap_or(self.down_chord.root),
                quality: patch.down_chord_type.unwrap_or(self.down_chord.quality),
            },
        }
    }

    pub fn describe(&self) -> String {
        match self.mode {
            MapperMode::Note => format!("note mode: up={} down={}", self.up_note, self.down_note),
            MapperMode::Chord => {
                format!("chord mode: up={} down={}", self.up_chord, self.down_chord)
            }
        }
    }
}

/// A partial config update. `None` keeps the current value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct MapperConfigPatch {
    pub mode: Option<MapperMode>,
    pub up_note: Option<PitchClass>,
    pub down_note: Option<PitchClass>,
    pub up_chord: Option<PitchClass>,
    pub up_chord_type: Option<ChordQuality>,
    pub down_chord: Option<PitchClass>,
    pub down_chord_type: Option<ChordQuality>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActionState {
    pub up: bool,
    pub down: bool,
}

impl ActionState {
    pub fn get(self, action: Action) -> bool {
        match action {
            Action::Up => self.up,
            Action::Down => self.down,
        }
    }

    pub fn or(self, other: ActionState) -> ActionState {
        ActionState {
            up: self.up || other.up,
            down: self.down || other.down,
        }
    }

    /// Actions that are on in `self` but were off in `before`.
    pub fn rising_since(self, before: ActionState) -> impl Iterator<Item = Action> {
        [
            (Action::Up, self.up && !before.up),
            (Action::Down, self.down && !before.down),
        ]
        .into_iter()
        .filter_map(|(action, rose)| rose.then_some(action))
    }
}

/// True iff some held note has the target's pitch class, in any octave.
pub fn note_pressed(active: &BTreeSet<u8>, target: PitchClass) -> bool {
    active.iter().any(|&n| PitchClass::of_note(n) == target)
}

/// True iff the held pitch classes are exactly the target triad: nothing
/// missing and nothing extra.
pub fn chord_pressed(active: &BTreeSet<u8>, target: ChordTarget) -> bool {
    let held: BTreeSet<PitchClass> = active.iter().map(|&n| PitchClass::of_note(n)).collect();
    held == target.pitch_classes()
}

/// The action state for a set of held notes under `config`.
pub fn compute_actions(active: &BTreeSet<u8>, config: &MapperConfig) -> ActionState {
    match config.mode {
        MapperMode::Note => ActionState {
            up: note_pressed(active, config.up_note),
            down: note_pressed(active, config.down_note),
        },
        MapperMode::Chord => ActionState {
            up: chord_pressed(active, config.up_chord),
            down: chord_pressed(active, config.down_chord),
        },
    }
}

type StatusListener = Box<dyn FnMut(&ConnectionStatus) + Send>;

pub struct PianoInputMapper {
    active: BTreeSet<u8>,
    config: MapperConfig,
    actions: ActionState,
    last_pressed: Option<u8>,
    status: ConnectionStatus,
    on_status: Option<StatusListener>,
}

impl PianoInputMapper {
    pub fn new(config: MapperConfig) -> Self {
        Self {
            active: BTreeSet::new(),
            config,
            actions: ActionState::default(),
            last_pressed: None,
            status: ConnectionStatus::disconnected(),
            on_status: None,
        }
    }

    /// Registers the callback invoked with every new connection snapshot.
    pub fn on_status_change(&mut self, listener: impl FnMut(&ConnectionStatus) + Send + 'static) {
        self.on_status = Some(Box::new(listener));
    }

    pub fn up(&self) -> bool {
        self.actions.up
    }

    pub fn down(&self) -> bool {
        self.actions.down
    }

    pub fn actions(&self) -> ActionState {
        self.actions
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn config_description(&self) -> String {
        self.config.describe()
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn active_notes(&self) -> &BTreeSet<u8> {
        &self.active
    }

    /// The most recent note-on, even if it has since been released.
    pub fn last_pressed(&self) -> Option<u8> {
        self.last_pressed
    }

    /// Pitch-class signature of the held notes, e.g. `"0-4-7"`.
    pub fn signature(&self) -> String {
        theory::signature(self.active.iter().copied())
    }

    /// Applies one raw MIDI message. Returns `true` if the held set changed.
    pub fn update_from_device_event(&mut self, data: &[u8]) -> bool {
        let changed = match midi::decode(data) {
            Some(NoteMessage::On { note, .. }) => {
                self.last_pressed = Some(note);
                self.active.insert(note)
            }
            Some(NoteMessage::Off { note }) => self.active.remove(&note),
            None => false,
        };
        self.recompute();
        changed
    }

    pub fn handle(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Message(bytes) => {
                self.update_from_device_event(&bytes);
            }
            DeviceEvent::Status(status) => self.set_status(status),
        }
    }

    pub fn set_status(&mut self, status: ConnectionStatus) {
        if !status.connected {
            // A vanished keyboard can't send its note-offs.
            self.active.clear();
        }
        self.status = status;
        self.recompute();
        if let Some(listener) = self.on_status.as_mut() {
            listener(&self.status);
        }
    }

    pub fn update_config(&mut self, patch: &MapperConfigPatch) {
        self.config = self.config.merged(patch);
        self.recompute();
        log::debug!(target: "mapper", "{}", self.config.describe());
    }

    fn recompute(&mut self) {
        self.actions = compute_actions(&self.active, &self.config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn pc(name: &str) -> PitchClass {
        name.parse().unwrap()
    }

    fn chord_config() -> MapperConfig {
        MapperConfig::default().merged(&MapperConfigPatch {
            mode: Some(MapperMode::Chord),
            ..Default::default()
        })
    }

    fn press(mapper: &mut PianoInputMapper, notes: &[u8]) {
        for &n in notes {
            mapper.update_from_device_event(&[0x90, n, 100]);
        }
    }

    #[test]
    fn note_match_ignores_octave_for_every_pitch() {
        for target in 0..12 {
            let target = PitchClass::new(target);
            for n in 0..=127u8 {
                let held = BTreeSet::from([n]);
                assert_eq!(note_pressed(&held, target), n % 12 == target.value(), "n={n}");
            }
        }
    }

    #[test]
    fn chord_match_is_exact_set_equality() {
        let c_major = ChordTarget {
            root: pc("C"),
            quality: ChordQuality::Major,
        };
        // Every subset of one octave plus a doubled root an octave up.
        for mask in 0u32..(1 << 12) {
            let mut held: BTreeSet<u8> = (0..12).filter(|b| mask & (1 << b) != 0).map(|b| 60 + b).collect();
            let expected = mask == (1 << 0) | (1 << 4) | (1 << 7);
            assert_eq!(chord_pressed(&held, c_major), expected, "mask={mask:#b}");
            if mask & 1 != 0 {
                held.insert(72);
                assert_eq!(chord_pressed(&held, c_major), expected);
            }
        }
    }

    #[test]
    fn up_follows_c_in_any_octave() {
        let mut mapper = PianoInputMapper::new(MapperConfig::default());
        press(&mut mapper, &[60]);
        assert!(mapper.up());
        assert!(!mapper.down());

        mapper.update_from_device_event(&[0x80, 60, 0]);
        assert!(!mapper.up());

        press(&mut mapper, &[72]);
        assert!(mapper.up());
    }

    #[test]
    fn velocity_zero_releases() {
        let mut mapper = PianoInputMapper::new(MapperConfig::default());
        press(&mut mapper, &[67]);
        assert!(mapper.down());
        mapper.update_from_device_event(&[0x90, 67, 0]);
        assert!(!mapper.down());
        assert!(mapper.active_notes().is_empty());
    }

    #[test]
    fn extra_note_cancels_chord() {
        let mut mapper = PianoInputMapper::new(chord_config());
        press(&mut mapper, &[60, 64, 67]);
        assert!(mapper.up());
        press(&mut mapper, &[65]);
        assert!(!mapper.up());
        mapper.update_from_device_event(&[0x80, 65, 0]);
        assert!(mapper.up());
    }

    #[test]
    fn partial_chord_does_not_trigger() {
        let mut mapper = PianoInputMapper::new(chord_config());
        press(&mut mapper, &[60, 64]);
        assert!(!mapper.up());
    }

    #[test]
    fn inversions_and_doublings_still_match() {
        let mut mapper = PianoInputMapper::new(chord_config());
        press(&mut mapper, &[55, 59, 62, 67]);
        assert!(mapper.down());
        assert_eq!(mapper.signature(), "2-7-11");
    }

    #[test]
    fn config_change_recomputes_immediately() {
        let mut mapper = PianoInputMapper::new(MapperConfig::default());
        press(&mut mapper, &[62]);
        assert!(!mapper.up());

        mapper.update_config(&MapperConfigPatch {
            up_note: Some(pc("D")),
            ..Default::default()
        });
        assert!(mapper.up());
        assert_eq!(mapper.config_description(), "note mode: up=D down=G");

        mapper.update_config(&MapperConfigPatch {
            mode: Some(MapperMode::Chord),
            up_chord: Some(pc("A")),
            up_chord_type: Some(ChordQuality::Minor),
            ..Default::default()
        });
        assert!(!mapper.up());
        assert_eq!(
            mapper.config_description(),
            "chord mode: up=A minor down=G major"
        );
    }

    #[test]
    fn ignored_messages_leave_state_alone() {
        let mut mapper = PianoInputMapper::new(MapperConfig::default());
        press(&mut mapper, &[60]);
        assert!(!mapper.update_from_device_event(&[0xB0, 64, 127]));
        assert!(mapper.up());
    }

    #[test]
    fn disconnect_releases_held_notes_and_notifies() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut mapper = PianoInputMapper::new(MapperConfig::default());
        mapper.on_status_change(move |s| sink.lock().unwrap().push(s.connected));

        mapper.handle(DeviceEvent::Status(ConnectionStatus {
            connected: true,
            devices: Vec::new(),
        }));
        mapper.handle(DeviceEvent::Message(vec![0x90, 60, 90]));
        assert!(mapper.up());

        mapper.handle(DeviceEvent::Status(ConnectionStatus::disconnected()));
        assert!(!mapper.up());
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn rising_edges() {
        let before = ActionState { up: true, down: false };
        let after = ActionState { up: true, down: true };
        assert_eq!(after.rising_since(before).collect::<Vec<_>>(), vec![Action::Down]);
        assert_eq!(before.rising_since(after).count(), 0);
    }
}

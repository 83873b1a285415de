use crate::mapper::{Action, ChordTarget, MapperConfig, MapperMode};
use crate::theory::{self, ChordQuality, PitchClass};

use super::api::ReferenceChord;

/// What the player is expected to play for each action, as service ids.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExpectedIds {
    pub up: Option<i64>,
    pub down: Option<i64>,
}

impl ExpectedIds {
    pub fn get(&self, action: Action) -> Option<i64> {
        match action {
            Action::Up => self.up,
            Action::Down => self.down,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.up.is_some() && self.down.is_some()
    }
}

/// What the mapper saw when an action fired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Played {
    Note(PitchClass),
    /// Pitch-class signature, see [`theory::signature`].
    Chord(String),
}

/// Chords and notes of the practice key, fetched once per configure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceData {
    pub progression_key_id: i64,
    pub entries: Vec<ReferenceChord>,
}

impl ReferenceData {
    fn root(entry: &ReferenceChord) -> Option<PitchClass> {
        entry.root.parse().ok()
    }

    fn quality(entry: &ReferenceChord) -> Option<ChordQuality> {
        entry
            .quality
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .and_then(ChordQuality::from_alias)
    }

    fn is_note(entry: &ReferenceChord) -> bool {
        entry.quality.as_deref().is_none_or(|q| q.trim().is_empty())
    }

    pub fn note_id(&self, pc: PitchClass) -> Option<i64> {
        self.entries
            .iter()
            .find(|e| Self::is_note(e) && Self::root(e) == Some(pc))
            .map(|e| e.id)
    }

    /// Exact root + canonical quality name in root position first, then any
    /// spelling of the quality in any inversion, then any chord on the root.
    pub fn chord_id(&self, target: ChordTarget) -> Option<i64> {
        let chords = || {
            self.entries
                .iter()
                .filter(|e| !Self::is_note(e) && Self::root(e) == Some(target.root))
        };

        if let Some(e) = chords().find(|e| {
            e.inversion == 0 && e.quality.as_deref() == Some(target.quality.name())
        }) {
            return Some(e.id);
        }
        if let Some(e) = chords().find(|e| Self::quality(e) == Some(target.quality)) {
            log::debug!(target: "tracking", "{target} matched by quality alias ({})", e.name);
            return Some(e.id);
        }
        let fallback = chords().next()?;
        log::warn!(
            target: "tracking",
            "no {target} in reference data, falling back to {} (id {})",
            fallback.name,
            fallback.id
        );
        Some(fallback.id)
    }

    /// The chord whose triad has this pitch-class signature, preferring
    /// root position.
    pub fn chord_id_for_signature(&self, signature: &str) -> Option<i64> {
        let mut candidates: Vec<&ReferenceChord> = self
            .entries
            .iter()
            .filter(|e| {
                let (Some(root), Some(quality)) = (Self::root(e), Self::quality(e)) else {
                    return false;
                };
                let triad = theory::triad(root, quality).map(PitchClass::value);
                theory::signature(triad) == signature
            })
            .collect();
        candidates.sort_by_key(|e| e.inversion);
        candidates.first().map(|e| e.id)
    }

    pub fn played_id(&self, played: &Played) -> Option<i64> {
        match played {
            Played::Note(pc) => self.note_id(*pc),
            Played::Chord(signature) => self.chord_id_for_signature(signature),
        }
    }

    pub fn expected_ids(&self, config: &MapperConfig) -> ExpectedIds {
        let resolve = |action| match config.mode {
            MapperMode::Note => self.note_id(config.note_for(action)),
            MapperMode::Chord => self.chord_id(config.chord_for(action)),
        };
        ExpectedIds {
            up: resolve(Action::Up),
            down: resolve(Action::Down),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, root: &str, quality: Option<&str>, inversion: u8) -> ReferenceChord {
        ReferenceChord {
            id,
            name: format!("{root}{}", quality.unwrap_or("")),
            root: root.to_string(),
            quality: quality.map(str::to_string),
            inversion,
        }
    }

    fn target(root: &str, quality: ChordQuality) -> ChordTarget {
        ChordTarget {
            root: root.parse().unwrap(),
            quality,
        }
    }

    #[test]
    fn exact_root_position_wins() {
        let data = ReferenceData {
            progression_key_id: 1,
            entries: vec![
                entry(1, "C", Some("major"), 1),
                entry(2, "C", Some("maj"), 0),
                entry(3, "C", Some("major"), 0),
            ],
        };
        assert_eq!(data.chord_id(target("C", ChordQuality::Major)), Some(3));
    }

    #[test]
    fn falls_back_to_alias_then_root() {
        let data = ReferenceData {
            progression_key_id: 1,
            entries: vec![entry(7, "A", Some("min"), 0), entry(8, "G", Some("dom7"), 0)],
        };
        assert_eq!(data.chord_id(target("A", ChordQuality::Minor)), Some(7));
        assert_eq!(data.chord_id(target("G", ChordQuality::Major)), Some(8));
        assert_eq!(data.chord_id(target("F", ChordQuality::Major)), None);
    }

    #[test]
    fn notes_and_chords_do_not_mix() {
        let data = ReferenceData {
            progression_key_id: 1,
            entries: vec![entry(1, "C", Some("major"), 0), entry(2, "C", None, 0)],
        };
        assert_eq!(data.note_id(PitchClass::C), Some(2));
        assert_eq!(data.chord_id(target("C", ChordQuality::Major)), Some(1));
    }

    #[test]
    fn signature_lookup() {
        let data = ReferenceData {
            progression_key_id: 1,
            entries: vec![
                entry(4, "A", Some("minor"), 1),
                entry(5, "A", Some("minor"), 0),
                entry(6, "C", Some("major"), 0),
            ],
        };
        assert_eq!(data.played_id(&Played::Chord("0-4-9".into())), Some(5));
        assert_eq!(data.played_id(&Played::Chord("0-4-7".into())), Some(6));
        assert_eq!(data.played_id(&Played::Chord("0-4".into())), None);
    }

    #[test]
    fn expected_ids_follow_mode() {
        let data = ReferenceData {
            progression_key_id: 1,
            entries: vec![
                entry(10, "C", None, 0),
                entry(11, "G", None, 0),
                entry(20, "C", Some("major"), 0),
            ],
        };
        let mut config = MapperConfig::default();
        assert_eq!(
            data.expected_ids(&config),
            ExpectedIds {
                up: Some(10),
                down: Some(11)
            }
        );

        config.mode = MapperMode::Chord;
        let ids = data.expected_ids(&config);
        assert_eq!(ids.up, Some(20));
        assert_eq!(ids.down, None);
        assert!(!ids.is_complete());
    }
}

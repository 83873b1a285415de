//! Note names, pitch classes and triad shapes.
//!
//! Everything here is octave-agnostic: a MIDI note number is reduced to its
//! pitch class (`note % 12`) before it is compared with anything.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TheoryError;

const SHARP_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// One of the twelve note names, independent of octave.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PitchClass(u8);

impl PitchClass {
    pub const C: PitchClass = PitchClass(0);
    pub const G: PitchClass = PitchClass(7);

    /// Wraps any integer into 0..12.
    pub fn new(value: u8) -> Self {
        PitchClass(value % 12)
    }

    pub fn of_note(note: u8) -> Self {
        PitchClass(note % 12)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn name(self) -> &'static str {
        SHARP_NAMES[self.0 as usize]
    }

    pub fn transpose(self, semitones: u8) -> Self {
        PitchClass((self.0 + semitones % 12) % 12)
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PitchClass {
    type Err = TheoryError;

    /// Accepts `C`, `c#`, `Db`, `F♯`, `B♭`, `E#`, `Cb` and so on.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        let letter = chars
            .next()
            .ok_or_else(|| TheoryError::UnknownNote(s.to_string()))?;
        let base: i8 = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(TheoryError::UnknownNote(s.to_string())),
        };
        let mut offset: i8 = 0;
        for accidental in chars {
            match accidental {
                '#' | '♯' => offset += 1,
                'b' | '♭' => offset -= 1,
                _ => return Err(TheoryError::UnknownNote(s.to_string())),
            }
        }
        Ok(PitchClass((base + offset).rem_euclid(12) as u8))
    }
}

impl TryFrom<String> for PitchClass {
    type Error = TheoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PitchClass> for String {
    fn from(pc: PitchClass) -> Self {
        pc.name().to_string()
    }
}

/// Triad qualities the mapper can listen for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
}

impl ChordQuality {
    /// Semitone offsets from the root.
    pub fn intervals(self) -> [u8; 3] {
        match self {
            ChordQuality::Major => [0, 4, 7],
            ChordQuality::Minor => [0, 3, 7],
            ChordQuality::Diminished => [0, 3, 6],
            ChordQuality::Augmented => [0, 4, 8],
        }
    }

    /// Canonical lower-case name, as used by the tracking service.
    pub fn name(self) -> &'static str {
        match self {
            ChordQuality::Major => "major",
            ChordQuality::Minor => "minor",
            ChordQuality::Diminished => "diminished",
            ChordQuality::Augmented => "augmented",
        }
    }

    /// Resolves the many spellings of a quality to its canonical form.
    pub fn from_alias(alias: &str) -> Option<Self> {
        let quality = match alias.trim() {
            "" | "M" | "maj" | "Maj" | "major" | "Major" | "MAJOR" => ChordQuality::Major,
            "m" | "min" | "Min" | "minor" | "Minor" | "MINOR" | "-" => ChordQuality::Minor,
            "dim" | "Dim" | "diminished" | "Diminished" | "DIMINISHED" | "°" | "o" => {
                ChordQuality::Diminished
            }
            "aug" | "Aug" | "augmented" | "Augmented" | "AUGMENTED" | "+" => {
                ChordQuality::Augmented
            }
            _ => return None,
        };
        Some(quality)
    }
}

impl fmt::Display for ChordQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChordQuality {
    type Err = TheoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChordQuality::from_alias(s).ok_or_else(|| TheoryError::UnknownQuality(s.to_string()))
    }
}

impl TryFrom<String> for ChordQuality {
    type Error = TheoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChordQuality> for String {
    fn from(q: ChordQuality) -> Self {
        q.name().to_string()
    }
}

/// The three pitch classes of `quality` built on `root`.
pub fn triad(root: PitchClass, quality: ChordQuality) -> [PitchClass; 3] {
    quality.intervals().map(|i| root.transpose(i))
}

/// Sorted, de-duplicated pitch classes of `notes`, joined with `-`.
///
/// `{67, 60, 64, 72}` and `{0, 4, 7}` both give `"0-4-7"`.
pub fn signature<I>(notes: I) -> String
where
    I: IntoIterator<Item = u8>,
{
    let mut classes: Vec<u8> = notes.into_iter().map(|n| n % 12).collect();
    classes.sort_unstable();
    classes.dedup();
    classes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

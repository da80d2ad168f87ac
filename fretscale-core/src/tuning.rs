//! # Musical Tuning Module
//!
//! Equal temperament note mapping for the detection pipeline.
//! Every conversion between frequencies and pitches goes through the
//! single log2 formula in [`frequency_to_pitch`]; there are no per-note
//! frequency band overrides.
//!
//! ## Features
//! - Pitch classes and octave-qualified pitches (A4 = 440 Hz)
//! - Frequency to pitch mapping and reference frequencies
//! - Cent deviation calculations
//! - Note name parsing for collaborators that speak in strings

use crate::error::ParsePitchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reference frequency of A4 in Hz.
pub const A4_FREQUENCY: f32 = 440.0;

/// Chromatic index of A when counting from C.
const A_INDEX: i32 = 9;

/// One of the twelve octave-independent note names, indexed from C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    /// All pitch classes in chromatic order starting at C.
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Position in the chromatic ordering (C = 0, B = 11).
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Builds a pitch class from any integer, wrapping modulo 12.
    pub fn from_index(index: i32) -> PitchClass {
        Self::ALL[index.rem_euclid(12) as usize]
    }

    /// Moves the pitch class up by `semitones` (negative moves down).
    pub fn transpose(self, semitones: i32) -> PitchClass {
        Self::from_index(self.index() as i32 + semitones)
    }

    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }

    /// Parses a note name such as `"F#"`, `"Bb"` or `"e"`.
    ///
    /// Flats are accepted as enharmonic spellings of the sharp names.
    /// Unknown names give `None`.
    pub fn parse(name: &str) -> Option<PitchClass> {
        let mut chars = name.trim().chars();
        let letter = chars.next()?.to_ascii_uppercase();
        let natural = match letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };
        let accidental = match chars.as_str() {
            "" => 0,
            "#" | "♯" => 1,
            "b" | "♭" => -1,
            _ => return None,
        };
        Some(Self::from_index(natural + accidental))
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A pitch class qualified by its octave, e.g. `E2` or `C#4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pitch {
    pub class: PitchClass,
    pub octave: i32,
}

impl Pitch {
    pub fn new(class: PitchClass, octave: i32) -> Self {
        Self { class, octave }
    }

    /// Signed semitone distance from A4.
    fn semitones_from_a4(self) -> i32 {
        (self.octave - 4) * 12 + self.class.index() as i32 - A_INDEX
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class, self.octave)
    }
}

impl FromStr for Pitch {
    type Err = ParsePitchError;

    /// Parses names like `"A4"`, `"C#3"`, `"Bb2"` or `"F#-1"`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || ParsePitchError {
            input: input.to_string(),
        };
        let s = input.trim();
        let split = s
            .char_indices()
            .find(|(i, c)| *i > 0 && (c.is_ascii_digit() || *c == '-'))
            .map(|(i, _)| i)
            .ok_or_else(invalid)?;
        let class = PitchClass::parse(&s[..split]).ok_or_else(invalid)?;
        let octave = s[split..].parse::<i32>().map_err(|_| invalid())?;
        Ok(Pitch::new(class, octave))
    }
}

/// Maps a frequency to the nearest equal-tempered pitch.
///
/// The semitone offset from A4 is `round(12 * log2(f / 440))`; the pitch class
/// is `(9 + offset) mod 12` and the octave `4 + floor((9 + offset) / 12)`.
///
/// # Returns
/// * `Some(pitch)` - Nearest pitch
/// * `None` - The frequency is not a positive finite number
pub fn frequency_to_pitch(freq: f32) -> Option<Pitch> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }
    let offset = (12.0 * (freq / A4_FREQUENCY).log2()).round() as i32;
    let position = A_INDEX + offset;
    Some(Pitch {
        class: PitchClass::from_index(position),
        octave: 4 + position.div_euclid(12),
    })
}

/// Equal temperament frequency of a pitch in Hz.
pub fn reference_frequency(pitch: Pitch) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf(pitch.semitones_from_a4() as f32 / 12.0)
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Shifts a frequency by a number of cents.
pub fn apply_cents(freq: f32, cents: f32) -> f32 {
    freq * 2.0_f32.powf(cents / 1200.0)
}

//! # Scale Inference Module
//!
//! Infers the scale a performer is most likely playing from the last few
//! detected pitch classes.
//!
//! Every played pitch class is compatible with many (scale, root) pairs: one
//! per role the note could play in each scale shape. Those candidates are
//! tallied over the whole history and the best-supported pair wins, with ties
//! going to the candidate seen first. A replaceable [`TonalityOverride`]
//! policy may then substitute a different winner.
//!
//! ## Features
//! - Static, read-only scale catalog
//! - Candidate generation per pitch class
//! - Insertion-ordered tallying with deterministic tie-breaks
//! - Related scales by fixed scale-degree offsets

use crate::tuning::PitchClass;
use once_cell::sync::Lazy;
use std::collections::{HashMap, VecDeque};
use std::fmt;

pub const NATURAL_MINOR: &str = "Natural Minor";
pub const HARMONIC_MINOR: &str = "Harmonic Minor";

/// A scale shape: semitone offsets from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleDefinition {
    pub name: &'static str,
    /// Distinct ascending offsets in 0..=11, always starting at 0.
    pub intervals: Vec<u8>,
    pub description: &'static str,
}

impl ScaleDefinition {
    fn new(name: &'static str, intervals: &[u8], description: &'static str) -> Self {
        debug_assert!(intervals.first() == Some(&0), "{name} must include the root");
        debug_assert!(
            intervals.windows(2).all(|w| w[0] < w[1]) && intervals.iter().all(|&i| i < 12),
            "{name} intervals must be distinct and within an octave"
        );
        Self {
            name,
            intervals: intervals.to_vec(),
            description,
        }
    }
}

/// The scale catalog. Order matters: it decides tie-breaks.
static CATALOG: Lazy<Vec<ScaleDefinition>> = Lazy::new(|| {
    vec![
        ScaleDefinition::new("Major", &[0, 2, 4, 5, 7, 9, 11], "Ionian mode; the diatonic major scale"),
        ScaleDefinition::new(NATURAL_MINOR, &[0, 2, 3, 5, 7, 8, 10], "Aeolian mode; the relative minor"),
        ScaleDefinition::new(HARMONIC_MINOR, &[0, 2, 3, 5, 7, 8, 11], "Natural minor with a raised seventh"),
        ScaleDefinition::new("Melodic Minor", &[0, 2, 3, 5, 7, 9, 11], "Ascending melodic minor; raised sixth and seventh"),
        ScaleDefinition::new("Major Pentatonic", &[0, 2, 4, 7, 9], "Five-note major scale without fourth and seventh"),
        ScaleDefinition::new("Minor Pentatonic", &[0, 3, 5, 7, 10], "Five-note minor scale, the staple of rock and blues soloing"),
        ScaleDefinition::new("Blues", &[0, 3, 5, 6, 7, 10], "Minor pentatonic with the flat fifth blue note"),
        ScaleDefinition::new("Dorian", &[0, 2, 3, 5, 7, 9, 10], "Minor mode with a major sixth"),
        ScaleDefinition::new("Phrygian", &[0, 1, 3, 5, 7, 8, 10], "Minor mode with a flat second"),
        ScaleDefinition::new("Lydian", &[0, 2, 4, 6, 7, 9, 11], "Major mode with a sharp fourth"),
        ScaleDefinition::new("Mixolydian", &[0, 2, 4, 5, 7, 9, 10], "Major mode with a flat seventh"),
        ScaleDefinition::new("Locrian", &[0, 1, 3, 5, 6, 8, 10], "Diminished mode with flat second and fifth"),
    ]
});

/// The read-only scale catalog, for browsing.
pub fn catalog() -> &'static [ScaleDefinition] {
    &CATALOG
}

/// Looks up a catalog entry by name, case-insensitively.
pub fn find_scale(name: &str) -> Option<&'static ScaleDefinition> {
    CATALOG.iter().find(|s| s.name.eq_ignore_ascii_case(name.trim()))
}

/// A scale shape bound to a root.
#[derive(Debug, Clone, Copy)]
pub struct ScaleMatch {
    pub scale: &'static ScaleDefinition,
    pub root: PitchClass,
}

impl ScaleMatch {
    fn key(&self) -> (PitchClass, &'static str) {
        (self.root, self.scale.name)
    }

    /// The pitch classes of the scale, starting at the root.
    pub fn pitch_classes(&self) -> Vec<PitchClass> {
        self.scale
            .intervals
            .iter()
            .map(|&i| self.root.transpose(i as i32))
            .collect()
    }

    pub fn contains(&self, pitch_class: PitchClass) -> bool {
        let degree = (pitch_class.index() as i32 - self.root.index() as i32).rem_euclid(12) as u8;
        self.scale.intervals.contains(&degree)
    }
}

impl PartialEq for ScaleMatch {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ScaleMatch {}

impl fmt::Display for ScaleMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.root, self.scale.name)
    }
}

/// The winning scale and how many history entries supported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestScaleResult {
    pub scale_match: ScaleMatch,
    pub support_count: u32,
}

/// Every (scale, root) pair in which `pitch_class` is a scale tone.
///
/// One match per interval of every catalog definition, in catalog order and
/// then interval order.
pub fn find_compatible_scales(pitch_class: PitchClass) -> Vec<ScaleMatch> {
    CATALOG
        .iter()
        .flat_map(|scale| {
            scale.intervals.iter().map(move |&interval| ScaleMatch {
                scale,
                root: pitch_class.transpose(-(interval as i32)),
            })
        })
        .collect()
}

/// Candidate counts in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct ScaleTally {
    entries: Vec<BestScaleResult>,
    index: HashMap<(PitchClass, &'static str), usize>,
}

impl ScaleTally {
    pub fn from_history(history: &[PitchClass]) -> Self {
        let mut tally = ScaleTally::default();
        for &pitch_class in history {
            for candidate in find_compatible_scales(pitch_class) {
                tally.add(candidate);
            }
        }
        tally
    }

    fn add(&mut self, candidate: ScaleMatch) {
        match self.index.get(&candidate.key()) {
            Some(&i) => self.entries[i].support_count += 1,
            None => {
                self.index.insert(candidate.key(), self.entries.len());
                self.entries.push(BestScaleResult {
                    scale_match: candidate,
                    support_count: 1,
                });
            }
        }
    }

    /// The tally entry for a root and scale name, if it was ever a candidate.
    pub fn get(&self, root: PitchClass, scale_name: &str) -> Option<BestScaleResult> {
        let scale = find_scale(scale_name)?;
        self.index.get(&(root, scale.name)).map(|&i| self.entries[i])
    }

    /// All entries sharing the maximum count, in first-seen order.
    pub fn leaders(&self) -> Vec<BestScaleResult> {
        let max = self.entries.iter().map(|e| e.support_count).max().unwrap_or(0);
        self.entries
            .iter()
            .filter(|e| e.support_count == max)
            .copied()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A judgment call about musical context that can replace the tallied winner.
pub trait TonalityOverride: Send + Sync {
    fn name(&self) -> &str;

    /// Returns a replacement result, or `None` to keep the tally winner.
    fn apply(&self, history: &[PitchClass], tally: &ScaleTally, leaders: &[BestScaleResult]) -> Option<BestScaleResult>;
}

/// F, F# and G# together are taken as diagnostic of F# minor.
///
/// Prefers F# Natural Minor, then F# Harmonic Minor, among the tied leaders;
/// when neither leads, F# Natural Minor is returned anyway.
#[derive(Debug, Clone, Copy, Default)]
pub struct FSharpMinorOverride;

impl TonalityOverride for FSharpMinorOverride {
    fn name(&self) -> &str {
        "f-sharp-minor"
    }

    fn apply(&self, history: &[PitchClass], tally: &ScaleTally, leaders: &[BestScaleResult]) -> Option<BestScaleResult> {
        let triggered = [PitchClass::F, PitchClass::FSharp, PitchClass::GSharp]
            .iter()
            .all(|pc| history.contains(pc));
        if !triggered {
            return None;
        }

        for scale_name in [NATURAL_MINOR, HARMONIC_MINOR] {
            if let Some(leader) = leaders
                .iter()
                .find(|l| l.scale_match.root == PitchClass::FSharp && l.scale_match.scale.name == scale_name)
            {
                return Some(*leader);
            }
        }

        tally.get(PitchClass::FSharp, NATURAL_MINOR).or_else(|| {
            find_scale(NATURAL_MINOR).map(|scale| BestScaleResult {
                scale_match: ScaleMatch {
                    scale,
                    root: PitchClass::FSharp,
                },
                support_count: 0,
            })
        })
    }
}

/// Best scale for a history using the default override policy.
///
/// Returns `None` for histories shorter than two notes.
pub fn find_best_scale(history: &[PitchClass]) -> Option<BestScaleResult> {
    find_best_scale_with(history, Some(&FSharpMinorOverride))
}

/// Best scale for a history with an explicit (or no) override policy.
pub fn find_best_scale_with(history: &[PitchClass], policy: Option<&dyn TonalityOverride>) -> Option<BestScaleResult> {
    if history.len() < 2 {
        return None;
    }
    let tally = ScaleTally::from_history(history);
    let leaders = tally.leaders();
    let winner = *leaders.first()?;

    if let Some(policy) = policy {
        if let Some(replacement) = policy.apply(history, &tally, &leaders) {
            if replacement != winner {
                log::debug!("{} override: {} replaces {}", policy.name(), replacement.scale_match, winner.scale_match);
            }
            return Some(replacement);
        }
    }
    Some(winner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelatedScaleLabel {
    Subdominant,
    Dominant,
    Submediant,
    Supertonic,
    Mediant,
}

impl RelatedScaleLabel {
    /// Semitones above the root.
    pub fn offset(self) -> i32 {
        match self {
            RelatedScaleLabel::Subdominant => 5,
            RelatedScaleLabel::Dominant => 7,
            RelatedScaleLabel::Submediant => 9,
            RelatedScaleLabel::Supertonic => 2,
            RelatedScaleLabel::Mediant => 4,
        }
    }
}

impl fmt::Display for RelatedScaleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelatedScale {
    pub label: RelatedScaleLabel,
    pub root: PitchClass,
    pub scale: &'static ScaleDefinition,
}

/// Companion scales of the same shape on the IV, V, vi, ii and iii roots.
pub fn find_related_scales(scale_match: &ScaleMatch) -> Vec<RelatedScale> {
    [
        RelatedScaleLabel::Subdominant,
        RelatedScaleLabel::Dominant,
        RelatedScaleLabel::Submediant,
        RelatedScaleLabel::Supertonic,
        RelatedScaleLabel::Mediant,
    ]
    .into_iter()
    .map(|label| RelatedScale {
        label,
        root: scale_match.root.transpose(label.offset()),
        scale: scale_match.scale,
    })
    .collect()
}

/// The most recent detected pitch classes, oldest first.
#[derive(Debug, Clone)]
pub struct NoteHistory {
    notes: VecDeque<PitchClass>,
    capacity: usize,
}

impl NoteHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            notes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a pitch class, evicting the oldest beyond capacity.
    pub fn push(&mut self, pitch_class: PitchClass) {
        self.notes.push_back(pitch_class);
        while self.notes.len() > self.capacity {
            self.notes.pop_front();
        }
    }

    pub fn as_vec(&self) -> Vec<PitchClass> {
        self.notes.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }
}

/// Owns the note history and recomputes the best scale on every update.
pub struct ScaleEngine {
    history: NoteHistory,
    policy: Option<Box<dyn TonalityOverride>>,
}

impl ScaleEngine {
    /// An engine with the default [`FSharpMinorOverride`] policy.
    pub fn new(history_length: usize) -> Self {
        Self::with_override(history_length, Some(Box::new(FSharpMinorOverride)))
    }

    pub fn with_override(history_length: usize, policy: Option<Box<dyn TonalityOverride>>) -> Self {
        Self {
            history: NoteHistory::new(history_length),
            policy,
        }
    }

    /// Records a detected pitch class and returns the fresh best scale.
    pub fn record(&mut self, pitch_class: PitchClass) -> Option<BestScaleResult> {
        self.history.push(pitch_class);
        self.best_scale()
    }

    pub fn best_scale(&self) -> Option<BestScaleResult> {
        find_best_scale_with(&self.history.as_vec(), self.policy.as_deref())
    }

    pub fn history(&self) -> &NoteHistory {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

impl fmt::Debug for ScaleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScaleEngine")
            .field("history", &self.history)
            .field("policy", &self.policy.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PitchClass::*;

    #[test]
    fn catalog_intervals_hold_invariants() {
        assert!(!catalog().is_empty());
        for scale in catalog() {
            assert_eq!(scale.intervals[0], 0, "{}", scale.name);
            let mut sorted = scale.intervals.clone();
            sorted.dedup();
            assert_eq!(sorted.len(), scale.intervals.len(), "{}", scale.name);
            assert!(scale.intervals.iter().all(|&i| i < 12));
        }
    }

    #[test]
    fn one_candidate_per_interval_of_every_scale() {
        let matches = find_compatible_scales(C);
        let expected: usize = catalog().iter().map(|s| s.intervals.len()).sum();
        assert_eq!(matches.len(), expected);

        let major: Vec<_> = matches.iter().filter(|m| m.scale.name == "Major").collect();
        assert_eq!(major.len(), 7);
        let pentatonic = matches.iter().filter(|m| m.scale.name == "Major Pentatonic").count();
        assert_eq!(pentatonic, 5);

        // C is the root of C Major, the 2nd of A# Major, the 3rd of G# Major...
        let roots: Vec<_> = major.iter().map(|m| m.root).collect();
        assert_eq!(roots, vec![C, ASharp, GSharp, G, F, DSharp, CSharp]);
        assert!(matches.iter().all(|m| m.contains(C)));
    }

    #[test]
    fn c_major_triad_selects_c_major() {
        let first = find_best_scale(&[C, E, G]).unwrap();
        assert_eq!(first.scale_match.root, C);
        assert_eq!(first.scale_match.scale.name, "Major");
        assert_eq!(first.support_count, 3);
        for _ in 0..5 {
            assert_eq!(find_best_scale(&[C, E, G]), Some(first));
        }
    }

    #[test]
    fn short_histories_have_no_best_scale() {
        assert_eq!(find_best_scale(&[]), None);
        assert_eq!(find_best_scale(&[A]), None);
    }

    #[test]
    fn ties_go_to_the_first_seen_candidate() {
        // A Major is seen first but lacks C; G Major (A as 2nd, C as 4th)
        // is the first candidate to reach two.
        let best = find_best_scale(&[A, C]).unwrap();
        assert_eq!(best.support_count, 2);
        assert_eq!(best.scale_match.to_string(), "G Major");
    }

    #[test]
    fn f_sharp_minor_override_prefers_harmonic_minor_leader() {
        let plain = find_best_scale_with(&[F, FSharp, GSharp], None).unwrap();
        assert_eq!(plain.scale_match.to_string(), "C# Major");

        let best = find_best_scale(&[F, FSharp, GSharp]).unwrap();
        assert_eq!(best.scale_match.to_string(), "F# Harmonic Minor");
        assert_eq!(best.support_count, 3);
    }

    #[test]
    fn f_sharp_minor_override_falls_back_to_natural_minor() {
        let best = find_best_scale(&[F, FSharp, GSharp, C]).unwrap();
        assert_eq!(best.scale_match.to_string(), "F# Natural Minor");
        assert_eq!(best.support_count, 2);
    }

    #[test]
    fn related_roots_of_c() {
        let c_major = ScaleMatch {
            scale: find_scale("major").unwrap(),
            root: C,
        };
        let related = find_related_scales(&c_major);
        let roots: Vec<_> = related.iter().map(|r| r.root).collect();
        assert_eq!(roots, vec![F, G, A, D, E]);
        assert_eq!(related[0].label, RelatedScaleLabel::Subdominant);
        assert!(related.iter().all(|r| r.scale.name == "Major"));
    }

    #[test]
    fn related_roots_wrap_around_the_octave() {
        let b_minor = ScaleMatch {
            scale: find_scale(NATURAL_MINOR).unwrap(),
            root: B,
        };
        let roots: Vec<_> = find_related_scales(&b_minor).iter().map(|r| r.root).collect();
        assert_eq!(roots, vec![E, FSharp, GSharp, CSharp, DSharp]);
    }

    #[test]
    fn unknown_scale_names_are_absent() {
        assert!(find_scale("Hungarian Gypsy").is_none());
        assert!(ScaleTally::from_history(&[C, E]).get(C, "Nonexistent").is_none());
    }

    #[test]
    fn scale_match_lists_its_tones() {
        let a_minor_pentatonic = ScaleMatch {
            scale: find_scale("Minor Pentatonic").unwrap(),
            root: A,
        };
        assert_eq!(a_minor_pentatonic.pitch_classes(), vec![A, C, D, E, G]);
        assert!(!a_minor_pentatonic.contains(F));
    }

    #[test]
    fn engine_keeps_only_recent_notes() {
        let mut engine = ScaleEngine::new(3);
        assert_eq!(engine.record(C), None);
        assert!(engine.record(E).is_some());
        engine.record(G);
        engine.record(B);
        assert_eq!(engine.history().as_vec(), vec![E, G, B]);
        assert_eq!(engine.history().len(), 3);
    }
}

//! # Note Stabilizer
//!
//! Turns the jittery stream of per-frame estimates into sparse note events.
//! Estimates are smoothed over a short rolling window, gated on clarity,
//! mapped to pitches and debounced: a note is only emitted after the same
//! pitch has been seen for `confidence_threshold` consecutive qualifying
//! frames, and only when it differs from the note already latched.
//!
//! Plucked-string attacks often produce octave or overtone errors for a
//! few frames, so a large frame-to-frame jump puts the stabilizer into a
//! short cooldown during which counters still advance but nothing is emitted.
//!
//! Median smoothing blends steps smaller than its outlier tolerance (a whole
//! tone, for example), which would glide through the semitone in between.
//! Once the raw pitch disagrees with the smoothed pitch for
//! [`RETARGET_FRAMES`] frames in a row, the older frequencies are dropped so
//! the smoothed value jumps straight to the new note.

use crate::config::{SmoothingStrategy, StabilizerConfig};
use crate::pitch::PitchEstimate;
use crate::tuning::{self, Pitch};
use crate::NoteEvent;
use std::collections::VecDeque;
use std::time::Duration;

/// Consecutive frames of raw/smoothed pitch disagreement that retarget the
/// median-weighted frequency window.
pub const RETARGET_FRAMES: usize = 2;

/// Explicit debouncing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilizerState {
    /// Nothing tracked and nothing latched
    Silent,
    /// A candidate is accumulating hits; `latched` is the note still on display
    Tracking {
        candidate: Pitch,
        count: u32,
        latched: Option<Pitch>,
    },
    /// The last emitted note is being held
    Latched(Pitch),
}

impl StabilizerState {
    /// The note most recently emitted, if any.
    pub fn latched(&self) -> Option<Pitch> {
        match *self {
            StabilizerState::Silent => None,
            StabilizerState::Tracking { latched, .. } => latched,
            StabilizerState::Latched(pitch) => Some(pitch),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stabilizer {
    config: StabilizerConfig,
    confidences: VecDeque<f32>,
    frequencies: VecDeque<f32>,
    previous_smoothed: Option<f32>,
    disagreement: usize,
    cooldown: u32,
    state: StabilizerState,
}

impl Stabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        Self {
            confidences: VecDeque::with_capacity(config.confidence_window),
            frequencies: VecDeque::with_capacity(config.frequency_window),
            config,
            previous_smoothed: None,
            disagreement: 0,
            cooldown: 0,
            state: StabilizerState::Silent,
        }
    }

    pub fn state(&self) -> StabilizerState {
        self.state
    }

    /// Forgets all buffered evidence and the latched note.
    pub fn reset(&mut self) {
        self.confidences.clear();
        self.frequencies.clear();
        self.previous_smoothed = None;
        self.disagreement = 0;
        self.cooldown = 0;
        self.state = StabilizerState::Silent;
    }

    /// Feeds one gated estimate. Returns a [`NoteEvent`] when a new note latches.
    ///
    /// Estimates without a frequency are skipped entirely; they neither
    /// advance counters nor clear the latched note.
    pub fn process(&mut self, estimate: &PitchEstimate, timestamp: Duration) -> Option<NoteEvent> {
        let frequency = estimate.frequency_hz?;

        push_bounded(&mut self.confidences, estimate.confidence, self.config.confidence_window);
        push_bounded(&mut self.frequencies, frequency, self.config.frequency_window);

        let (smoothed_frequency, smoothed_confidence) = match self.config.strategy {
            SmoothingStrategy::MovingAverage => (frequency, mean(&self.confidences)),
            SmoothingStrategy::MedianWeighted => (self.median_smoothed(frequency), estimate.confidence),
        };

        if smoothed_confidence <= self.config.min_clarity {
            log::trace!("discarding {:.1} Hz, clarity {:.2}", smoothed_frequency, smoothed_confidence);
            return None;
        }

        let provisional = self.update_jitter_guard(smoothed_frequency);

        let frequency_hz = tuning::apply_cents(smoothed_frequency, self.config.calibration_cents);
        let pitch = tuning::frequency_to_pitch(frequency_hz)?;

        let count = self.advance(pitch);
        if count < self.config.confidence_threshold || self.state.latched() == Some(pitch) {
            return None;
        }
        if provisional {
            log::debug!("{} ready but provisional, cooldown {}", pitch, self.cooldown);
            return None;
        }

        self.state = StabilizerState::Latched(pitch);
        let event = NoteEvent {
            pitch,
            frequency_hz,
            confidence: smoothed_confidence,
            cents_deviation: tuning::cents_deviation(frequency_hz, tuning::reference_frequency(pitch)),
            timestamp,
        };
        log::debug!(
            "latched {} at {:.2} Hz ({:+.1} cents, clarity {:.2})",
            pitch, frequency_hz, event.cents_deviation, smoothed_confidence
        );
        Some(event)
    }

    /// Median-weighted frequency, retargeted to the newest frames once they
    /// persistently map to a different pitch than the smoothed value.
    fn median_smoothed(&mut self, raw: f32) -> f32 {
        let smoothed = median_weighted_mean(&self.frequencies, self.config.outlier_tolerance);
        let cents = self.config.calibration_cents;
        let raw_pitch = tuning::frequency_to_pitch(tuning::apply_cents(raw, cents));
        let smoothed_pitch = tuning::frequency_to_pitch(tuning::apply_cents(smoothed, cents));
        if raw_pitch == smoothed_pitch {
            self.disagreement = 0;
            return smoothed;
        }

        self.disagreement += 1;
        if self.disagreement < RETARGET_FRAMES {
            return smoothed;
        }
        log::trace!("retargeting smoothing window to {:.1} Hz", raw);
        let stale = self.frequencies.len().saturating_sub(self.disagreement);
        self.frequencies.drain(..stale);
        self.disagreement = 0;
        median_weighted_mean(&self.frequencies, self.config.outlier_tolerance)
    }

    /// Returns true while the current frame is inside a jitter cooldown.
    ///
    /// The frame that jumps and the `jitter_cooldown` frames after it are
    /// provisional.
    fn update_jitter_guard(&mut self, smoothed: f32) -> bool {
        let jumped = self
            .previous_smoothed
            .is_some_and(|prev| (smoothed - prev).abs() / prev > self.config.jitter_ratio);
        self.previous_smoothed = Some(smoothed);

        if jumped {
            self.cooldown = self.config.jitter_cooldown;
            self.cooldown > 0
        } else if self.cooldown > 0 {
            self.cooldown -= 1;
            true
        } else {
            false
        }
    }

    /// Records a hit for `pitch` and returns its consecutive hit count.
    fn advance(&mut self, pitch: Pitch) -> u32 {
        let (next, count) = match self.state {
            StabilizerState::Silent => (
                StabilizerState::Tracking {
                    candidate: pitch,
                    count: 1,
                    latched: None,
                },
                1,
            ),
            StabilizerState::Latched(held) if held == pitch => (StabilizerState::Latched(held), 0),
            StabilizerState::Latched(held) => (
                StabilizerState::Tracking {
                    candidate: pitch,
                    count: 1,
                    latched: Some(held),
                },
                1,
            ),
            // Back on the held note: drop the rival candidate.
            StabilizerState::Tracking {
                latched: Some(held), ..
            } if held == pitch => (StabilizerState::Latched(held), 0),
            StabilizerState::Tracking {
                candidate,
                count,
                latched,
            } => {
                let count = if candidate == pitch { count + 1 } else { 1 };
                (
                    StabilizerState::Tracking {
                        candidate: pitch,
                        count,
                        latched,
                    },
                    count,
                )
            }
        };
        self.state = next;
        count
    }
}

impl Default for Stabilizer {
    fn default() -> Self {
        Self::new(StabilizerConfig::default())
    }
}

fn push_bounded(buffer: &mut VecDeque<f32>, value: f32, capacity: usize) {
    buffer.push_back(value);
    while buffer.len() > capacity.max(1) {
        buffer.pop_front();
    }
}

fn mean(values: &VecDeque<f32>) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

fn median(values: &VecDeque<f32>) -> f32 {
    let mut sorted: Vec<f32> = values.iter().copied().collect();
    sorted.sort_by(f32::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.is_empty() {
        0.0
    } else if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Recency-weighted mean of the values within `tolerance` of the median.
///
/// Weights rise linearly from oldest (1) to newest (n). Falls back to the
/// median when every value is rejected.
fn median_weighted_mean(values: &VecDeque<f32>, tolerance: f32) -> f32 {
    let median = median(values);
    if median <= 0.0 {
        return median;
    }
    let (sum, weight_sum) = values
        .iter()
        .enumerate()
        .filter(|(_, v)| ((*v - median).abs() / median) <= tolerance)
        .fold((0.0, 0.0), |(sum, weight_sum), (i, v)| {
            let weight = (i + 1) as f32;
            (sum + v * weight, weight_sum + weight)
        });
    if weight_sum > 0.0 { sum / weight_sum } else { median }
}

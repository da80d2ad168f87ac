//! # Pitch Detection Module
//!
//! Monophonic fundamental frequency estimation for plucked strings.
//! The estimator is the YIN algorithm, optionally followed by a cross-check
//! against the frame's magnitude spectrum for higher notes, where the YIN lag
//! spans only a few dozen samples.
//!
//! ## Features
//! - YIN cumulative mean normalized difference with absolute threshold
//! - First-dip lag selection to avoid octave errors
//! - Parabolic interpolation for sub-sample accuracy
//! - Clarity score derived from the depth of the chosen dip
//! - Optional spectral peak cross-check, skipped near DC where the window
//!   leaks into the peak

use crate::config::EstimatorConfig;
use crate::fft::SpectrumAnalyzer;
use serde::{Deserialize, Serialize};

/// Lowest frequency the estimator will ever report.
const MIN_AUDIBLE_FREQUENCY: f32 = 20.0;

/// Peaks below this bin overlap their own negative-frequency image under the
/// Hann window, biasing the interpolated peak.
const MIN_REFINEMENT_BIN: f32 = 8.0;

/// Largest accepted distance between the YIN and spectral estimates, in bins.
const MAX_REFINEMENT_SHIFT_BINS: f32 = 0.5;

/// Raw per-frame estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchEstimate {
    /// `None` when no fundamental cleared the threshold.
    pub frequency_hz: Option<f32>,
    /// How unambiguous the chosen lag was, in [0, 1].
    pub confidence: f32,
}

impl PitchEstimate {
    pub fn new(frequency_hz: f32, confidence: f32) -> Self {
        Self {
            frequency_hz: Some(frequency_hz),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn absent(confidence: f32) -> Self {
        Self {
            frequency_hz: None,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// YIN estimator with reusable working buffers.
#[derive(Debug)]
pub struct PitchEstimator {
    threshold: f32,
    spectrum: Option<SpectrumAnalyzer>,
    yin_buffer: Vec<f32>,
}

impl PitchEstimator {
    pub fn new(config: &EstimatorConfig) -> Self {
        Self {
            threshold: config.yin_threshold,
            spectrum: config.spectral_refinement.then(SpectrumAnalyzer::new),
            yin_buffer: Vec::new(),
        }
    }

    /// Estimates the fundamental of `signal`.
    ///
    /// Deterministic: identical frames give identical estimates.
    ///
    /// # Returns
    /// A [`PitchEstimate`] whose frequency is `None` when the frame is too
    /// short, has no lag below the threshold, or resolves to an inaudible or
    /// non-finite frequency.
    pub fn estimate(&mut self, signal: &[f32], sample_rate: u32) -> PitchEstimate {
        let half = signal.len() / 2;
        if half < 3 || sample_rate == 0 {
            return PitchEstimate::absent(0.0);
        }

        self.compute_yin_buffer(signal, half);
        let yin = &self.yin_buffer;

        // --- Absolute threshold: first dip, followed down to its local minimum ---
        let mut period = 0;
        for tau in 2..half {
            if yin[tau] < self.threshold {
                let mut t = tau;
                while t + 1 < half && yin[t + 1] < yin[t] {
                    t += 1;
                }
                period = t;
                break;
            }
        }

        if period == 0 {
            let best = yin[1..].iter().copied().fold(1.0_f32, f32::min);
            log::trace!("no lag below threshold {:.2}, best dip {:.3}", self.threshold, best);
            return PitchEstimate::absent(1.0 - best);
        }
        let confidence = 1.0 - yin[period];

        // --- Parabolic interpolation for better precision ---
        let period_float = if period + 1 < half {
            let y1 = yin[period - 1];
            let y2 = yin[period];
            let y3 = yin[period + 1];
            let denominator = y1 - 2.0 * y2 + y3;
            if denominator.abs() > f32::EPSILON {
                period as f32 + (y1 - y3) / (2.0 * denominator)
            } else {
                period as f32
            }
        } else {
            period as f32
        };

        let mut frequency = sample_rate as f32 / period_float;

        if let Some(spectrum) = self.spectrum.as_mut() {
            let magnitudes = spectrum.magnitudes(signal);
            if let Some(refined) = refine_from_spectrum(&magnitudes, signal.len(), frequency, sample_rate) {
                frequency = refined;
            }
        }

        if frequency.is_finite() && frequency > MIN_AUDIBLE_FREQUENCY {
            PitchEstimate::new(frequency, confidence)
        } else {
            PitchEstimate::absent(confidence)
        }
    }

    /// Fills `yin_buffer[0..half]` with the cumulative mean normalized difference.
    fn compute_yin_buffer(&mut self, signal: &[f32], half: usize) {
        self.yin_buffer.clear();
        self.yin_buffer.resize(half, 0.0);
        let yin = &mut self.yin_buffer;

        // --- Difference function ---
        for tau in 1..half {
            let mut diff = 0.0;
            for i in 0..half {
                let delta = signal[i] - signal[i + tau];
                diff += delta * delta;
            }
            yin[tau] = diff;
        }

        // --- Cumulative mean normalization ---
        let mut running_sum = 0.0;
        yin[0] = 1.0;
        for tau in 1..half {
            running_sum += yin[tau];
            if running_sum > 0.0 {
                yin[tau] *= tau as f32 / running_sum;
            } else {
                yin[tau] = 1.0;
            }
        }
    }
}

impl Default for PitchEstimator {
    fn default() -> Self {
        Self::new(&EstimatorConfig::default())
    }
}

/// Refines a frequency estimate using a pre-computed magnitude spectrum.
///
/// Searches two bins either side of the rough estimate for the strongest
/// bin and interpolates a parabola through the log magnitudes around it.
/// Rough estimates below [`MIN_REFINEMENT_BIN`] are left alone, and so are
/// peaks that land more than half a bin away from the rough estimate.
///
/// # Returns
/// * `Some(refined_freq)` - Refined frequency estimate
/// * `None` - Refinement not possible, keep the YIN estimate
pub fn refine_from_spectrum(
    spectrum_magnitudes: &[f32],
    frame_len: usize,
    rough_freq: f32,
    sample_rate: u32,
) -> Option<f32> {
    if rough_freq <= 0.0 || spectrum_magnitudes.len() < 3 || frame_len == 0 {
        return None;
    }
    let target_bin = (rough_freq * frame_len as f32) / sample_rate as f32;
    if target_bin < MIN_REFINEMENT_BIN {
        return None;
    }
    let search_radius = 2.0;
    let start_bin = (target_bin - search_radius).max(0.0) as usize;
    let end_bin = (target_bin + search_radius).min((spectrum_magnitudes.len() - 1) as f32) as usize;
    if start_bin >= end_bin {
        return None;
    }

    let (offset, _) = spectrum_magnitudes[start_bin..=end_bin]
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    let peak_bin = start_bin + offset;

    if peak_bin == 0 || peak_bin >= spectrum_magnitudes.len() - 1 {
        return None;
    }

    let y1 = spectrum_magnitudes[peak_bin - 1].ln();
    let y2 = spectrum_magnitudes[peak_bin].ln();
    let y3 = spectrum_magnitudes[peak_bin + 1].ln();
    if !y1.is_finite() || !y2.is_finite() || !y3.is_finite() {
        return None;
    }

    let denominator = 2.0 * y2 - y1 - y3;
    if denominator.abs() < 1e-6 {
        return None;
    }

    let peak_shift = (y3 - y1) / (2.0 * denominator);
    let refined_bin = peak_bin as f32 + peak_shift;
    if (refined_bin - target_bin).abs() > MAX_REFINEMENT_SHIFT_BINS {
        return None;
    }
    let final_freq = (refined_bin * sample_rate as f32) / frame_len as f32;

    (final_freq.is_finite() && final_freq > 0.0).then_some(final_freq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SR: u32 = 44100;

    fn tone(freq: f32, harmonics: &[f32], len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32 / SR as f32;
                harmonics
                    .iter()
                    .enumerate()
                    .map(|(h, amp)| amp * (2.0 * PI * freq * (h + 1) as f32 * t).sin())
                    .sum()
            })
            .collect()
    }

    fn assert_close(actual: Option<f32>, expected: f32, tolerance_ratio: f32) {
        let actual = actual.expect("expected a frequency");
        assert!(
            (actual - expected).abs() <= expected * tolerance_ratio,
            "expected ~{expected} Hz, got {actual} Hz"
        );
    }

    #[test]
    fn detects_pure_sines_across_guitar_range() {
        let mut estimator = PitchEstimator::default();
        for freq in [82.41, 110.0, 196.0, 329.63, 440.0, 659.26] {
            let estimate = estimator.estimate(&tone(freq, &[0.8], 2048), SR);
            assert_close(estimate.frequency_hz, freq, 0.01);
            assert!(estimate.confidence > 0.9, "{freq} Hz confidence {}", estimate.confidence);
        }
    }

    #[test]
    fn harmonic_rich_tone_reports_fundamental() {
        let mut estimator = PitchEstimator::default();
        let estimate = estimator.estimate(&tone(196.0, &[0.6, 0.3, 0.2], 2048), SR);
        assert_close(estimate.frequency_hz, 196.0, 0.01);
    }

    #[test]
    fn silence_has_no_frequency() {
        let mut estimator = PitchEstimator::default();
        let estimate = estimator.estimate(&[0.0; 2048], SR);
        assert_eq!(estimate.frequency_hz, None);
        assert_eq!(estimate.confidence, 0.0);
    }

    #[test]
    fn noise_has_no_frequency() {
        let mut state: u32 = 12345;
        let noise: Vec<f32> = (0..2048)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
            })
            .collect();
        let mut estimator = PitchEstimator::default();
        assert_eq!(estimator.estimate(&noise, SR).frequency_hz, None);
    }

    #[test]
    fn short_frames_are_absent() {
        let mut estimator = PitchEstimator::default();
        assert_eq!(estimator.estimate(&[0.1, -0.1, 0.1, -0.1], SR).frequency_hz, None);
        assert_eq!(estimator.estimate(&[], SR).frequency_hz, None);
    }

    #[test]
    fn estimates_are_deterministic() {
        let frame = tone(246.94, &[0.7, 0.2], 2048);
        let mut a = PitchEstimator::default();
        let mut b = PitchEstimator::default();
        assert_eq!(a.estimate(&frame, SR), b.estimate(&frame, SR));
        assert_eq!(a.estimate(&frame, SR), b.estimate(&frame, SR));
    }

    #[test]
    fn spectral_refinement_stays_on_target() {
        let mut estimator = PitchEstimator::new(&EstimatorConfig {
            yin_threshold: 0.15,
            spectral_refinement: true,
        });
        let estimate = estimator.estimate(&tone(440.0, &[0.8], 2048), SR);
        assert_close(estimate.frequency_hz, 440.0, 0.01);
    }

    #[test]
    fn spectral_refinement_leaves_low_notes_to_yin() {
        let mut plain = PitchEstimator::default();
        let mut refined = PitchEstimator::new(&EstimatorConfig {
            yin_threshold: 0.15,
            spectral_refinement: true,
        });
        for freq in [82.41, 110.0, 164.81] {
            let frame = tone(freq, &[0.8], 2048);
            assert_eq!(refined.estimate(&frame, SR), plain.estimate(&frame, SR), "{freq} Hz");
        }
    }

    #[test]
    fn refinement_rejects_distant_peaks() {
        // Peak at bin 50, rough estimate at bin 48.5.
        let mut magnitudes = vec![0.01; 1024];
        magnitudes[49] = 0.5;
        magnitudes[50] = 1.0;
        magnitudes[51] = 0.5;
        let bin_hz = SR as f32 / 2048.0;
        assert_eq!(refine_from_spectrum(&magnitudes, 2048, 48.5 * bin_hz, SR), None);

        let refined = refine_from_spectrum(&magnitudes, 2048, 50.2 * bin_hz, SR).unwrap();
        assert!((refined - 50.0 * bin_hz).abs() < 0.01 * bin_hz);
    }

    #[test]
    fn refinement_rejects_degenerate_input() {
        assert_eq!(refine_from_spectrum(&[], 2048, 440.0, SR), None);
        assert_eq!(refine_from_spectrum(&[1.0; 1024], 2048, -5.0, SR), None);
    }
}

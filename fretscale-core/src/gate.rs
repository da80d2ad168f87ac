//! Signal gate: rejects silent frames and implausible fundamentals
//! before an estimate is trusted.

use crate::config::GateConfig;

/// Root-mean-square amplitude of a frame.
pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

#[derive(Debug, Clone)]
pub struct SignalGate {
    silence_threshold: f32,
    min_frequency: f32,
    max_frequency: f32,
}

impl SignalGate {
    pub fn new(config: &GateConfig) -> Self {
        Self {
            silence_threshold: config.silence_threshold,
            min_frequency: config.min_frequency,
            max_frequency: config.max_frequency,
        }
    }

    /// True when the frame's RMS amplitude is below the silence threshold.
    /// An empty frame counts as silence.
    pub fn is_silence(&self, frame: &[f32]) -> bool {
        rms(frame) < self.silence_threshold
    }

    /// True iff `freq` lies within the configured fundamental range, inclusive.
    pub fn is_valid_frequency(&self, freq: f32) -> bool {
        freq >= self.min_frequency && freq <= self.max_frequency
    }
}

impl Default for SignalGate {
    fn default() -> Self {
        Self::new(&GateConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / 44100.0).sin())
            .collect()
    }

    #[test]
    fn zero_frame_is_silence() {
        let gate = SignalGate::default();
        assert!(gate.is_silence(&[0.0; 2048]));
        assert!(gate.is_silence(&[]));
    }

    #[test]
    fn full_scale_sine_is_not_silence() {
        let gate = SignalGate::default();
        assert!(!gate.is_silence(&sine(220.0, 1.0, 2048)));
    }

    #[test]
    fn quiet_sine_falls_under_threshold() {
        // RMS of a sine is amplitude / sqrt(2), so 0.02 peak is ~0.014 RMS.
        let gate = SignalGate::default();
        assert!(gate.is_silence(&sine(220.0, 0.02, 2048)));
    }

    #[test]
    fn frequency_range_is_inclusive() {
        let gate = SignalGate::new(&GateConfig {
            silence_threshold: 0.03,
            min_frequency: 80.0,
            max_frequency: 900.0,
        });
        assert!(gate.is_valid_frequency(80.0));
        assert!(gate.is_valid_frequency(900.0));
        assert!(gate.is_valid_frequency(440.0));
        assert!(!gate.is_valid_frequency(79.9));
        assert!(!gate.is_valid_frequency(1200.0));
        assert!(!gate.is_valid_frequency(f32::NAN));
    }
}

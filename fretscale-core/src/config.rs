//! Configuration parameters for the detection pipeline.
//!
//! Every section has working defaults, and any subset of fields can be given
//! in a JSON file; missing fields fall back to the defaults.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Samples per analysis frame (default: 2048, ~46ms at 44.1kHz)
    pub frame_size: usize,

    /// Preferred capture sample rate in Hz (default: 44100)
    pub sample_rate: u32,

    /// Interval between analysis ticks in milliseconds (default: 16, ~60 FPS)
    pub tick_interval_ms: u64,

    /// Number of recent pitch classes used for scale inference (default: 3)
    pub history_length: usize,

    pub gate: GateConfig,
    pub estimator: EstimatorConfig,
    pub stabilizer: StabilizerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_size: 2048,
            sample_rate: 44100,
            tick_interval_ms: 16,
            history_length: 3,
            gate: GateConfig::default(),
            estimator: EstimatorConfig::default(),
            stabilizer: StabilizerConfig::default(),
        }
    }
}

/// Silence and frequency-range gating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Frames with RMS below this are silence (default: 0.035)
    pub silence_threshold: f32,

    /// Lowest accepted fundamental in Hz (default: 80.0, just under low E)
    pub min_frequency: f32,

    /// Highest accepted fundamental in Hz (default: 900.0)
    pub max_frequency: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.035,
            min_frequency: 80.0,
            max_frequency: 900.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// YIN absolute threshold on the normalized difference (default: 0.15)
    pub yin_threshold: f32,

    /// Refine the YIN estimate against an FFT magnitude spectrum (default: false)
    pub spectral_refinement: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            yin_threshold: 0.15,
            spectral_refinement: false,
        }
    }
}

/// How the stabilizer smooths the per-frame estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SmoothingStrategy {
    /// Moving average of confidence; frequency passes through
    MovingAverage,
    /// Outlier-rejecting, recency-weighted mean of frequency around the median
    MedianWeighted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    pub strategy: SmoothingStrategy,

    /// Confidences kept for the moving average (default: 5)
    pub confidence_window: usize,

    /// Frequencies kept for median weighting (default: 12)
    pub frequency_window: usize,

    /// Relative deviation from the median beyond which a frequency is
    /// excluded from the weighted mean (default: 0.15)
    pub outlier_tolerance: f32,

    /// Smoothed confidence must exceed this to count (default: 0.8)
    pub min_clarity: f32,

    /// Consecutive qualifying frames needed before a note is emitted (default: 4)
    pub confidence_threshold: u32,

    /// Frame-to-frame relative jump that starts a cooldown (default: 0.10)
    pub jitter_ratio: f32,

    /// Frames during which emission is suppressed after a jump (default: 3, 0 disables)
    pub jitter_cooldown: u32,

    /// Constant tuning correction applied before note mapping (default: 0.0)
    pub calibration_cents: f32,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            strategy: SmoothingStrategy::MovingAverage,
            confidence_window: 5,
            frequency_window: 12,
            outlier_tolerance: 0.15,
            min_clarity: 0.8,
            confidence_threshold: 4,
            jitter_ratio: 0.10,
            jitter_cooldown: 3,
            calibration_cents: 0.0,
        }
    }
}

impl PipelineConfig {
    /// Loads and validates a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every value is usable by the pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_size < 64 {
            return Err(ConfigError::invalid("frame_size", format!("{} is below 64 samples", self.frame_size)));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::invalid("sample_rate", "must be positive"));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::invalid("tick_interval_ms", "must be positive"));
        }
        if self.history_length == 0 {
            return Err(ConfigError::invalid("history_length", "must be at least 1"));
        }

        let gate = &self.gate;
        if !(gate.silence_threshold >= 0.0) {
            return Err(ConfigError::invalid("gate.silence_threshold", "must be non-negative"));
        }
        if !(gate.min_frequency > 0.0 && gate.min_frequency < gate.max_frequency) {
            return Err(ConfigError::invalid(
                "gate.min_frequency",
                format!("need 0 < min ({}) < max ({})", gate.min_frequency, gate.max_frequency),
            ));
        }
        if gate.max_frequency >= self.sample_rate as f32 / 2.0 {
            return Err(ConfigError::invalid("gate.max_frequency", "must be below Nyquist"));
        }
        // YIN searches lags up to half a frame and needs one lag past the dip.
        let longest_period = self.sample_rate as f32 / gate.min_frequency;
        if (self.frame_size / 2) as f32 <= longest_period + 1.0 {
            return Err(ConfigError::invalid(
                "frame_size",
                format!(
                    "{} samples cannot resolve {} Hz at {} Hz; need more than {}",
                    self.frame_size,
                    gate.min_frequency,
                    self.sample_rate,
                    2 * (longest_period.ceil() as usize + 1)
                ),
            ));
        }

        if !(self.estimator.yin_threshold > 0.0 && self.estimator.yin_threshold < 1.0) {
            return Err(ConfigError::invalid("estimator.yin_threshold", "must be in (0, 1)"));
        }

        let stab = &self.stabilizer;
        if stab.confidence_window == 0 || stab.frequency_window == 0 {
            return Err(ConfigError::invalid("stabilizer windows", "must be at least 1"));
        }
        if !(0.0..1.0).contains(&stab.min_clarity) {
            return Err(ConfigError::invalid("stabilizer.min_clarity", "must be in [0, 1)"));
        }
        if stab.confidence_threshold == 0 {
            return Err(ConfigError::invalid("stabilizer.confidence_threshold", "must be at least 1"));
        }
        if !(stab.outlier_tolerance > 0.0) || !(stab.jitter_ratio > 0.0) {
            return Err(ConfigError::invalid("stabilizer ratios", "must be positive"));
        }
        if !stab.calibration_cents.is_finite() {
            return Err(ConfigError::invalid("stabilizer.calibration_cents", "must be finite"));
        }
        Ok(())
    }
}

//! # Fast Fourier Transform (FFT) Module
//!
//! Magnitude spectra for the optional spectral refinement of pitch estimates.
//!
//! ## Features
//! - FFT plans cached per frame size
//! - Hann windowing for reduced spectral leakage
//! - DC offset removal

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Removes the DC offset from a signal by making its average value zero.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Applies a Hann window to the input buffer to reduce spectral leakage.
fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

/// Computes windowed magnitude spectra, re-planning only when the frame
/// size changes.
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f32>,
    plan: Option<Arc<dyn Fft<f32>>>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            plan: None,
            scratch: Vec::new(),
        }
    }

    /// Returns the magnitude spectrum up to Nyquist (`signal.len() / 2` bins).
    ///
    /// The signal is DC-corrected and Hann-windowed before the transform.
    pub fn magnitudes(&mut self, signal: &[f32]) -> Vec<f32> {
        let n = signal.len();
        if n == 0 {
            return Vec::new();
        }
        let fft = match &self.plan {
            Some(plan) if plan.len() == n => Arc::clone(plan),
            _ => {
                let plan = self.planner.plan_fft_forward(n);
                self.plan = Some(Arc::clone(&plan));
                plan
            }
        };

        let mut processed = signal.to_vec();
        remove_dc_offset(&mut processed);
        apply_hann_window(&mut processed);

        self.scratch.clear();
        self.scratch
            .extend(processed.into_iter().map(|sample| Complex { re: sample, im: 0.0 }));
        fft.process(&mut self.scratch);

        self.scratch
            .iter()
            .take(n / 2)
            .map(|c| c.norm()) // .norm() is sqrt(re^2 + im^2)
            .collect()
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("planned_len", &self.plan.as_ref().map(|p| p.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn peak_bin_matches_sine_frequency() {
        let sample_rate = 44100.0;
        let n = 2048;
        // Put the tone exactly on bin 40.
        let freq = 40.0 * sample_rate / n as f32;
        let signal: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect();

        let mut analyzer = SpectrumAnalyzer::new();
        let mags = analyzer.magnitudes(&signal);
        assert_eq!(mags.len(), n / 2);
        let peak = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 40);
    }

    #[test]
    fn replans_when_frame_size_changes() {
        let mut analyzer = SpectrumAnalyzer::new();
        assert_eq!(analyzer.magnitudes(&[0.5; 512]).len(), 256);
        assert_eq!(analyzer.magnitudes(&[0.5; 1024]).len(), 512);
        assert!(analyzer.magnitudes(&[]).is_empty());
    }
}

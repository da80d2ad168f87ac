// fretscale-core/src/lib.rs

//! The core logic for live note and scale detection.
//! This crate is responsible for audio capture, pitch detection,
//! note stabilization and scale inference. It is completely headless
//! and contains no rendering code; renderers subscribe to the
//! [`pipeline::PipelineEvent`]s it publishes.

pub mod audio;
pub mod config;
pub mod error;
pub mod fft;
pub mod gate;
pub mod pipeline;
pub mod pitch;
pub mod scales;
pub mod stabilizer;
pub mod tuning;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tuning::Pitch;

/// A stable, changed note confirmed by the stabilizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// The latched pitch.
    pub pitch: Pitch,
    /// The smoothed (and calibrated) frequency in Hz.
    pub frequency_hz: f32,
    /// The smoothed confidence (0.0 to 1.0).
    pub confidence: f32,
    /// Deviation of `frequency_hz` from the pitch's reference, in cents.
    pub cents_deviation: f32,
    /// Stream time of the frame that confirmed the note.
    pub timestamp: Duration,
}

//! # Detection Pipeline
//!
//! Runs one analysis step per tick: gate, estimate, stabilize, map and,
//! when a new note latches, update the note history and recompute the best
//! scale. Results are published to this instance's subscribers only.

use crate::audio::{AudioFrame, FrameSource};
use crate::config::PipelineConfig;
use crate::gate::SignalGate;
use crate::pitch::PitchEstimator;
use crate::scales::{BestScaleResult, NoteHistory, ScaleEngine};
use crate::stabilizer::{Stabilizer, StabilizerState};
use crate::NoteEvent;
use crossbeam_channel::{Receiver, Sender, TrySendError};

/// Events buffered per subscriber. A subscriber that falls this far behind
/// misses new events until it drains its receiver.
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 256;

/// Events published to renderers and other observers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PipelineEvent {
    /// A stable, changed note.
    Note(NoteEvent),
    /// The best scale after a history change; `None` means not enough history yet.
    Scale(Option<BestScaleResult>),
    /// The input just went quiet. Sent once per transition into silence.
    Silence,
}

/// What a single frame amounted to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// Below the silence threshold
    Silent,
    /// The estimator found no fundamental
    NoFundamental,
    /// A fundamental outside the playable range
    OutOfRange(f32),
    /// Accepted by the gate; no new note yet
    Stabilizing,
    /// A new note latched
    Note(NoteEvent),
}

pub struct Pipeline {
    gate: SignalGate,
    estimator: PitchEstimator,
    stabilizer: Stabilizer,
    scales: ScaleEngine,
    subscribers: Vec<Sender<PipelineEvent>>,
    silent: bool,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_scale_engine(config, ScaleEngine::new(config.history_length))
    }

    /// Builds a pipeline around a custom scale engine (e.g. a different override policy).
    pub fn with_scale_engine(config: &PipelineConfig, scales: ScaleEngine) -> Self {
        Self {
            gate: SignalGate::new(&config.gate),
            estimator: PitchEstimator::new(&config.estimator),
            stabilizer: Stabilizer::new(config.stabilizer.clone()),
            scales,
            subscribers: Vec::new(),
            silent: true,
        }
    }

    /// Registers a new observer. Each subscriber receives every event as long
    /// as it drains its receiver; at most [`SUBSCRIBER_QUEUE_DEPTH`] events
    /// are held for it.
    pub fn subscribe(&mut self) -> Receiver<PipelineEvent> {
        let (tx, rx) = crossbeam_channel::bounded(SUBSCRIBER_QUEUE_DEPTH);
        self.subscribers.push(tx);
        rx
    }

    /// Pulls the next frame from `source` and processes it.
    ///
    /// Returns `None` when the source had no new frame this tick.
    pub fn tick(&mut self, source: &mut impl FrameSource) -> Option<FrameOutcome> {
        let frame = source.next_frame()?;
        Some(self.process_frame(&frame))
    }

    /// Runs one frame through the pipeline.
    ///
    /// Never fails: frames that cannot be analysed are skipped and the next
    /// tick starts fresh.
    pub fn process_frame(&mut self, frame: &AudioFrame) -> FrameOutcome {
        if self.gate.is_silence(&frame.samples) {
            if !self.silent {
                self.silent = true;
                self.publish(PipelineEvent::Silence);
            }
            return FrameOutcome::Silent;
        }
        self.silent = false;

        let estimate = self.estimator.estimate(&frame.samples, frame.sample_rate);
        let Some(frequency) = estimate.frequency_hz else {
            return FrameOutcome::NoFundamental;
        };
        if !self.gate.is_valid_frequency(frequency) {
            log::trace!("rejecting {:.1} Hz outside the playable range", frequency);
            return FrameOutcome::OutOfRange(frequency);
        }

        let Some(note) = self.stabilizer.process(&estimate, frame.timestamp()) else {
            return FrameOutcome::Stabilizing;
        };

        log::debug!("note {} at {:?}", note.pitch, note.timestamp);
        self.publish(PipelineEvent::Note(note));
        let best = self.scales.record(note.pitch.class);
        self.publish(PipelineEvent::Scale(best));
        FrameOutcome::Note(note)
    }

    /// Drops all per-session state: stabilizer evidence, the latched note
    /// and the note history. Subscribers are told the scale is unknown.
    pub fn reset(&mut self) {
        self.stabilizer.reset();
        self.scales.clear();
        self.silent = true;
        self.publish(PipelineEvent::Scale(None));
    }

    pub fn stabilizer_state(&self) -> StabilizerState {
        self.stabilizer.state()
    }

    pub fn history(&self) -> &NoteHistory {
        self.scales.history()
    }

    fn publish(&mut self, event: PipelineEvent) {
        // Disconnected observers are forgotten; full ones miss this event.
        self.subscribers.retain(|tx| match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("subscriber queue full, dropping {:?}", event);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stabilizer", &self.stabilizer.state())
            .field("scales", &self.scales)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine_frame(freq: f32, position: u64) -> AudioFrame {
        let samples = (0..2048)
            .map(|i| 0.5 * (2.0 * PI * freq * (position + i) as f32 / 44100.0).sin())
            .collect();
        AudioFrame::new(samples, 44100, position)
    }

    #[test]
    fn silent_frames_are_dropped_before_estimation() {
        let mut pipeline = Pipeline::new(&PipelineConfig::default());
        let events = pipeline.subscribe();
        let outcome = pipeline.process_frame(&AudioFrame::new(vec![0.0; 2048], 44100, 0));
        assert_eq!(outcome, FrameOutcome::Silent);
        // Already silent at start, so nothing is published.
        assert!(events.try_recv().is_err());
        assert_eq!(pipeline.stabilizer_state(), StabilizerState::Silent);
    }

    #[test]
    fn out_of_range_fundamentals_are_rejected() {
        let mut pipeline = Pipeline::new(&PipelineConfig::default());
        let outcome = pipeline.process_frame(&sine_frame(1500.0, 0));
        assert!(matches!(outcome, FrameOutcome::OutOfRange(f) if f > 1400.0));
        assert_eq!(pipeline.stabilizer_state(), StabilizerState::Silent);
    }

    #[test]
    fn silence_is_announced_once_per_transition() {
        let mut pipeline = Pipeline::new(&PipelineConfig::default());
        let events = pipeline.subscribe();
        pipeline.process_frame(&sine_frame(220.0, 0));
        for i in 1..4 {
            pipeline.process_frame(&AudioFrame::new(vec![0.0; 2048], 44100, i * 2048));
        }
        let silences = events
            .try_iter()
            .filter(|e| matches!(e, PipelineEvent::Silence))
            .count();
        assert_eq!(silences, 1);
    }

    #[test]
    fn stalled_subscriber_is_capped_without_starving_others() {
        let mut pipeline = Pipeline::new(&PipelineConfig::default());
        let stalled = pipeline.subscribe();
        let active = pipeline.subscribe();
        let mut received = 0;
        for _ in 0..SUBSCRIBER_QUEUE_DEPTH + 50 {
            pipeline.reset();
            received += active.try_iter().count();
        }
        assert_eq!(received, SUBSCRIBER_QUEUE_DEPTH + 50);
        assert_eq!(stalled.len(), SUBSCRIBER_QUEUE_DEPTH);

        // Draining makes room again.
        stalled.try_iter().for_each(drop);
        pipeline.reset();
        assert_eq!(stalled.try_recv(), Ok(PipelineEvent::Scale(None)));
    }

    #[test]
    fn dropped_subscribers_are_forgotten() {
        let mut pipeline = Pipeline::new(&PipelineConfig::default());
        drop(pipeline.subscribe());
        let kept = pipeline.subscribe();
        pipeline.reset();
        assert_eq!(pipeline.subscribers.len(), 1);
        assert_eq!(kept.try_recv(), Ok(PipelineEvent::Scale(None)));
    }

    #[test]
    fn smallest_valid_frame_still_hears_low_e() {
        let mut config = PipelineConfig::default();
        config.frame_size = 1108;
        assert!(config.validate().is_ok());

        let samples = (0..config.frame_size)
            .map(|i| 0.5 * (2.0 * PI * 82.41 * i as f32 / 44100.0).sin())
            .collect();
        let mut pipeline = Pipeline::new(&config);
        let outcome = pipeline.process_frame(&AudioFrame::new(samples, 44100, 0));
        assert_eq!(outcome, FrameOutcome::Stabilizing);
    }
}

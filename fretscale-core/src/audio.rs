//! # Audio Capture Module
//!
//! Real-time microphone capture using CPAL (Cross-Platform Audio Library).
//! The device callback slices incoming audio into fixed-size mono frames and
//! hands them to the analysis side over a bounded channel; the analysis side
//! pulls the most recent frame once per tick.
//!
//! ## Features
//! - Input device enumeration and selection by name
//! - Closest-rate f32 configuration, mono preferred, multichannel downmixed
//! - At most one live capture session per [`AudioInput`]
//! - Teardown-then-reacquire device switching

use crate::config::PipelineConfig;
use crate::error::CaptureError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use crossbeam_channel::{Receiver, Sender};
use std::time::Duration;

/// Frames buffered between the device callback and the analysis tick.
/// Older frames are dropped when the analysis side falls behind.
const FRAME_QUEUE_DEPTH: usize = 8;

/// A fixed-size block of mono samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Index of the first sample since the capture session started.
    pub position: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, position: u64) -> Self {
        Self {
            samples,
            sample_rate,
            position,
        }
    }

    /// Stream time of the frame's first sample.
    pub fn timestamp(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = self.position as u128 * 1_000_000_000 / self.sample_rate as u128;
        Duration::from_nanos(nanos as u64)
    }
}

/// Anything that can hand the pipeline its next frame.
pub trait FrameSource {
    /// The most recent complete frame, or `None` if nothing new arrived.
    fn next_frame(&mut self) -> Option<AudioFrame>;
}

/// Accumulates interleaved callback data into mono frames.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    channels: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    position: u64,
}

impl FrameAssembler {
    pub fn new(frame_size: usize, channels: usize, sample_rate: u32) -> Self {
        Self {
            frame_size: frame_size.max(1),
            channels: channels.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_size * 2),
            position: 0,
        }
    }

    /// Appends interleaved samples and calls `emit` for every completed frame.
    pub fn push(&mut self, data: &[f32], mut emit: impl FnMut(AudioFrame)) {
        if self.channels == 1 {
            self.pending.extend_from_slice(data);
        } else {
            let channels = self.channels as f32;
            self.pending.extend(
                data.chunks_exact(self.channels)
                    .map(|chunk| chunk.iter().sum::<f32>() / channels),
            );
        }

        while self.pending.len() >= self.frame_size {
            let samples: Vec<f32> = self.pending.drain(..self.frame_size).collect();
            emit(AudioFrame::new(samples, self.sample_rate, self.position));
            self.position += self.frame_size as u64;
        }
    }
}

/// Names of all input devices on the default host.
pub fn list_input_devices() -> Result<Vec<String>, CaptureError> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    for device in host.input_devices()? {
        names.push(device.name()?);
    }
    Ok(names)
}

/// A live input stream. Dropping it stops capture.
pub struct CaptureSession {
    stream: cpal::Stream,
    frames: Receiver<AudioFrame>,
    sample_rate: u32,
    device_name: String,
}

impl CaptureSession {
    /// Opens the named input device, or the default one when `device_name` is `None`.
    ///
    /// # Returns
    /// * `Ok(session)` - Capture is running
    /// * `Err(e)` - No device, no usable format, or the stream could not be built or started
    pub fn open(device_name: Option<&str>, config: &PipelineConfig) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(wanted) => {
                let mut found = None;
                for device in host.input_devices()? {
                    if device.name().is_ok_and(|n| n == wanted) {
                        found = Some(device);
                        break;
                    }
                }
                found.ok_or_else(|| CaptureError::DeviceNotFound { name: wanted.to_string() })?
            }
            None => host.default_input_device().ok_or(CaptureError::NoInputDevice)?,
        };
        let name = device.name()?;
        log::info!("Using audio input device: {}", name);

        let configs = device.supported_input_configs()?.collect::<Vec<_>>();
        let supported = find_supported_config(configs, config.sample_rate)
            .ok_or_else(|| CaptureError::NoSuitableConfig { device: name.clone() })?;

        let rate = config
            .sample_rate
            .clamp(supported.min_sample_rate().0, supported.max_sample_rate().0);
        let supported = supported.with_sample_rate(cpal::SampleRate(rate));
        let channels = supported.channels() as usize;
        let stream_config: cpal::StreamConfig = supported.into();
        log::info!("Selected sample rate: {} Hz, {} channel(s)", rate, channels);

        let (tx, rx) = crossbeam_channel::bounded(FRAME_QUEUE_DEPTH);
        let stream = build_stream(&device, &stream_config, FrameAssembler::new(config.frame_size, channels, rate), tx)?;
        stream.play()?;

        Ok(Self {
            stream,
            frames: rx,
            sample_rate: rate,
            device_name: name,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Drains the queue and returns only the newest frame.
    pub fn latest_frame(&self) -> Option<AudioFrame> {
        self.frames.try_iter().last()
    }

    /// Pauses and releases the stream.
    pub fn stop(self) {
        if let Err(e) = self.stream.pause() {
            log::warn!("Error pausing stream on {}: {}", self.device_name, e);
        }
        log::info!("Released audio input device: {}", self.device_name);
        drop(self.stream);
    }
}

impl FrameSource for CaptureSession {
    fn next_frame(&mut self) -> Option<AudioFrame> {
        self.latest_frame()
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut assembler: FrameAssembler,
    sender: Sender<AudioFrame>,
) -> Result<cpal::Stream, CaptureError> {
    let err_fn = |err| log::error!("An error occurred on the audio stream: {}", err);
    let stream = device.build_input_stream(
        config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // Ignore a full queue; the tick only wants the newest frame.
            assembler.push(data, |frame| {
                let _ = sender.try_send(frame);
            });
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Finds the best supported configuration for the target sample rate.
///
/// Only 32-bit float formats qualify. Fewer channels win, then the range
/// closest to the target rate.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32 && c.channels() > 0)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let distance = if target_rate < min {
                min - target_rate
            } else {
                target_rate.saturating_sub(max)
            };
            (c.channels(), distance)
        })
}

/// Owner of the (at most one) active capture session.
pub struct AudioInput {
    config: PipelineConfig,
    session: Option<CaptureSession>,
}

impl AudioInput {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// Starts capture on a device, releasing any current session first.
    ///
    /// On failure the input is left stopped.
    pub fn start(&mut self, device_name: Option<&str>) -> Result<(), CaptureError> {
        self.stop();
        let session = CaptureSession::open(device_name, &self.config)?;
        self.session = Some(session);
        Ok(())
    }

    /// Teardown-then-reacquire switch to the named device.
    pub fn switch_device(&mut self, device_name: &str) -> Result<(), CaptureError> {
        log::info!("Switching audio input to {}", device_name);
        self.start(Some(device_name))
    }

    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn device_name(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.device_name())
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.sample_rate())
    }
}

impl FrameSource for AudioInput {
    fn next_frame(&mut self) -> Option<AudioFrame> {
        self.session.as_ref()?.latest_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::{SampleFormat, SampleRate, SupportedBufferSize};

    fn range(channels: u16, min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(channels, SampleRate(min), SampleRate(max), SupportedBufferSize::Unknown, format)
    }

    #[test]
    fn assembler_emits_fixed_frames_with_positions() {
        let mut assembler = FrameAssembler::new(4, 1, 8000);
        let mut frames = Vec::new();
        assembler.push(&[0.1; 6], |f| frames.push(f));
        assert_eq!(frames.len(), 1);
        assembler.push(&[0.2; 6], |f| frames.push(f));
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].position, 0);
        assert_eq!(frames[1].position, 4);
        assert_eq!(frames[2].position, 8);
        assert_eq!(frames[1].samples, vec![0.1, 0.1, 0.2, 0.2]);
        assert_eq!(frames[2].timestamp(), Duration::from_millis(1));
    }

    #[test]
    fn assembler_downmixes_interleaved_channels() {
        let mut assembler = FrameAssembler::new(2, 2, 44100);
        let mut frames = Vec::new();
        assembler.push(&[1.0, 0.0, 0.5, 0.5], |f| frames.push(f));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples, vec![0.5, 0.5]);
    }

    #[test]
    fn prefers_mono_float_near_target_rate() {
        let configs = vec![
            range(2, 44100, 48000, SampleFormat::F32),
            range(1, 8000, 22050, SampleFormat::F32),
            range(1, 44100, 96000, SampleFormat::F32),
            range(1, 44100, 44100, SampleFormat::I16),
        ];
        let chosen = find_supported_config(configs, 44100).unwrap();
        assert_eq!(chosen.channels(), 1);
        assert_eq!(chosen.min_sample_rate().0, 44100);
        assert_eq!(chosen.sample_format(), SampleFormat::F32);
    }

    #[test]
    fn falls_back_to_stereo_and_rejects_integer_only() {
        let chosen = find_supported_config(vec![range(2, 48000, 48000, SampleFormat::F32)], 44100).unwrap();
        assert_eq!(chosen.channels(), 2);
        assert!(find_supported_config(vec![range(1, 44100, 44100, SampleFormat::I16)], 44100).is_none());
    }

    #[test]
    fn stopped_input_yields_no_frames() {
        let mut input = AudioInput::new(PipelineConfig::default());
        assert!(!input.is_active());
        assert!(input.next_frame().is_none());
        input.stop();
        assert_eq!(input.device_name(), None);
    }
}

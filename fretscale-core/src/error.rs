//! Error types for capture, configuration and note name parsing.
//!
//! Nothing in the per-frame analysis path returns these. Ambiguous frames and
//! unknown lookups are expressed as `None`; only the capture boundary,
//! configuration loading and `str::parse` can fail.

use thiserror::Error;

/// Failures while starting, switching or running an audio capture session.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The host reports no default input device
    #[error("No input device available")]
    NoInputDevice,

    /// A device was requested by name but is not present
    #[error("Input device not found: {name}")]
    DeviceNotFound { name: String },

    /// The device offers no f32 input configuration we can use
    #[error("No suitable f32 input format found on {device}")]
    NoSuitableConfig { device: String },

    #[error("Failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("Failed to read device name: {0}")]
    DeviceName(#[from] cpal::DeviceNameError),

    #[error("Failed to query supported input configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    /// Permission denied, device busy and similar failures surface here
    #[error("Failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Failed to start input stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

/// Failures while loading or validating a [`crate::config::PipelineConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is outside the range the pipeline can work with
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// A string that is not a pitch name such as `"A4"` or `"Bb2"`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid pitch name: {input:?}")]
pub struct ParsePitchError {
    pub input: String,
}

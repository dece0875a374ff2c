//! # Device Error Module
//!
//! Errors surfaced by the capture and playback devices. Silence, clamped
//! tempo input and "no match" results are ordinary values, never errors.

use thiserror::Error;

/// Convenience alias used across the audio core.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Failure reported by an audio input or output device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The user (or the OS) refused microphone access.
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No default input or output device is present.
    #[error("no audio device available")]
    NoDevice,

    /// The device offers no stream format we can consume.
    #[error("no supported stream configuration")]
    UnsupportedConfig,

    /// Building or starting the stream failed.
    #[error("audio stream failed: {0}")]
    StreamFailed(String),

    /// The device went away while a session was active.
    #[error("audio device disconnected")]
    Disconnected,

    /// A scheduled buffer could not be handed to the output device.
    #[error("playback failed: {0}")]
    PlaybackFailed(String),
}

impl DeviceError {
    /// Returns true only when access to the device was refused.
    pub fn is_permission(&self) -> bool {
        matches!(self, DeviceError::PermissionDenied)
    }

    /// Text suitable for showing to the user next to the start button.
    pub fn user_message(&self) -> String {
        match self {
            DeviceError::PermissionDenied | DeviceError::NoDevice => {
                "Microphone access denied or not available. Please allow microphone access in your settings."
                    .to_string()
            }
            DeviceError::PlaybackFailed(_) => {
                "Audio output stopped unexpectedly. Press start to try again.".to_string()
            }
            other => format!("Audio device error: {other}"),
        }
    }
}

// uke-core/src/lib.rs

//! The audio core for the ukulele practice tools.
//! This crate is responsible for microphone capture, pitch detection,
//! note matching and metronome click scheduling. It is completely
//! headless and contains no terminal or GUI code.
//!
//! Two independent paths share only the audio clock:
//! - tuner: `audio` → `pitch` → `tuning` → `tuner`
//! - metronome: `sequencer` + `synth` → `scheduler` → `playback`

pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod metronome;
pub mod pitch;
pub mod playback;
pub mod scheduler;
pub mod sequencer;
pub mod synth;
pub mod task;
pub mod tuner;
pub mod tuning;

pub use audio::{AudioCaptureSession, AudioFrame, CaptureDevice, CpalCaptureDevice};
pub use clock::{AudioClock, ManualClock, SystemClock};
pub use config::{ClickConfig, MetronomeConfig, SchedulerConfig, ToolsConfig, TunerConfig};
pub use error::DeviceError;
pub use metronome::{Metronome, MetronomeState};
pub use pitch::{PitchDetector, PitchEstimate};
pub use playback::{CpalPlayback, PlaybackDevice};
pub use scheduler::ClickScheduler;
pub use sequencer::{BeatEvent, BeatSequencer, SchedulerState};
pub use tuner::{TunerSnapshot, TunerState, TunerStateMachine};
pub use tuning::{NoteMapper, TargetNote, TuningResult, TuningStatus};

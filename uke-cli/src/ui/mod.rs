//! # UI Module
//!
//! Plain-text renderings of the tuner and metronome state.

pub mod beat_display;
pub mod cent_meter;

//! Beat-of-the-bar indicator for the metronome.

use uke_core::MetronomeState;

/// Renders e.g. ` 1 [2] 3  4   120 BPM`. No beat is highlighted while stopped.
pub fn render(state: &MetronomeState, beats_per_bar: u32) -> String {
    let beats: Vec<String> = (1..=beats_per_bar)
        .map(|beat| {
            if state.running && beat == state.current_beat {
                format!("[{beat}]")
            } else {
                format!(" {beat} ")
            }
        })
        .collect();
    format!("{}  {} BPM", beats.join(""), state.bpm)
}

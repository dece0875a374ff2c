//! # Cent Meter Widget
//!
//! A one-line text meter for tuning accuracy: a centre mark plus a needle
//! whose glyph reflects the accuracy zone.
//!
//! ## Features
//! - Needle clamped to ±100 cents
//! - Zone-coded needle (in tune / close / off)

use uke_core::tuning::{MeterZone, indicator_position};

/// Number of cells on each side of the centre mark.
const HALF_WIDTH: usize = 20;

/// Cent meter widget for displaying tuning accuracy.
pub struct CentMeter {
    /// Current cent deviation (None if no note matched)
    cents: Option<f64>,
}

impl CentMeter {
    pub fn new(cents: Option<f64>) -> Self {
        Self { cents }
    }

    /// Renders the meter as `[----|----]` with the needle drawn over it.
    pub fn render(&self) -> String {
        let mut cells = vec!['-'; HALF_WIDTH * 2 + 1];
        cells[HALF_WIDTH] = '|';

        if let Some(c) = self.cents {
            let position = indicator_position(c);
            let offset = (position / 100.0 * HALF_WIDTH as f64).round() as isize;
            let index = (HALF_WIDTH as isize + offset) as usize;
            cells[index] = match MeterZone::from_cents(c) {
                MeterZone::InTune => '#',
                MeterZone::Close => '+',
                MeterZone::Off => '!',
            };
        }

        format!("[{}]", cells.into_iter().collect::<String>())
    }
}

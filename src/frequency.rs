//! Frequency stepping: physical target points, their device-level sweep
//! frequencies, and the cursor tracking the current step of a run.

use serde::{Deserialize, Serialize};

/// Slack for `(end - start) / step` landing a hair below an integer.
const STEP_EPSILON: f64 = 1e-9;

/// Inclusive frequency range in GHz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRange {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl FrequencyRange {
    pub fn new(start: f64, end: f64, step: f64) -> Self {
        Self { start, end, step }
    }

    /// Number of points visited: `floor((end - start) / step) + 1`.
    pub fn steps(&self) -> usize {
        if !(self.step > 0.0) || self.end < self.start {
            return 0;
        }
        ((self.end - self.start) / self.step + STEP_EPSILON).floor() as usize + 1
    }

    /// The `index`-th point, derived from the index rather than accumulated.
    pub fn point(&self, index: usize) -> f64 {
        self.start + index as f64 * self.step
    }

    pub fn points(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.steps()).map(|i| self.point(i))
    }
}

/// Maps physical output frequencies to what the signal generator is told.
///
/// The analyzer observes the mixed-down product at its center frequency, so
/// the generator runs at `(f + center) / multiplier`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mixer {
    pub multiplier: f64,
    /// Analyzer center frequency in GHz.
    pub analyzer_center: f64,
}

impl Mixer {
    pub fn sweep_frequency(&self, frequency: f64) -> f64 {
        (frequency + self.analyzer_center) / self.multiplier
    }

    pub fn sweep_step(&self, step: f64) -> f64 {
        step / self.multiplier
    }
}

/// Run state of a calibration or sweep: which step we are on.
#[derive(Debug, Clone)]
pub struct StepCursor {
    range: FrequencyRange,
    mixer: Mixer,
    index: usize,
}

impl StepCursor {
    pub fn new(range: FrequencyRange, mixer: Mixer) -> Self {
        Self {
            range,
            mixer,
            index: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn frequency(&self) -> f64 {
        self.range.point(self.index)
    }

    pub fn sweep_frequency(&self) -> f64 {
        self.mixer.sweep_frequency(self.frequency())
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 >= self.range.steps()
    }

    /// Move to the next point. Returns `false`, without moving, on the last one.
    pub fn advance(&mut self) -> bool {
        if self.is_last() {
            return false;
        }
        self.index += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixty_five_to_one_sixty_by_five() {
        let range = FrequencyRange::new(65.0, 160.0, 5.0);
        assert_eq!(range.steps(), 20);
        let points: Vec<f64> = range.points().collect();
        assert_eq!(points.first(), Some(&65.0));
        assert_eq!(points.last(), Some(&160.0));
    }

    #[test]
    fn step_count_floors_partial_steps() {
        for (start, end, step) in [
            (220.0, 300.0, 5.0),
            (0.0, 1.0, 0.1),
            (140.0, 200.0, 7.0),
            (10.0, 10.0, 1.0),
            (1.5, 9.9, 0.3),
        ] {
            let range = FrequencyRange::new(start, end, step);
            let expected = ((end - start) / step + STEP_EPSILON).floor() as usize + 1;
            assert_eq!(range.steps(), expected);
            let last = range.point(range.steps() - 1);
            assert!(last <= end + 1e-9, "{last} beyond {end}");
            assert!(last + step > end, "a further step would still fit");
        }
    }

    #[test]
    fn degenerate_ranges_are_empty() {
        assert_eq!(FrequencyRange::new(10.0, 5.0, 1.0).steps(), 0);
        assert_eq!(FrequencyRange::new(0.0, 5.0, 0.0).steps(), 0);
        assert_eq!(FrequencyRange::new(0.0, 5.0, f64::NAN).steps(), 0);
    }

    #[test]
    fn sweep_frequency_divides_by_multiplier() {
        let mixer = Mixer {
            multiplier: 18.0,
            analyzer_center: 0.065,
        };
        assert!((mixer.sweep_frequency(220.0) - 220.065 / 18.0).abs() < 1e-12);
        assert!((mixer.sweep_step(5.0) - 5.0 / 18.0).abs() < 1e-12);
    }

    #[test]
    fn cursor_stops_at_last_point() {
        let mixer = Mixer {
            multiplier: 1.0,
            analyzer_center: 0.047,
        };
        let mut cursor = StepCursor::new(FrequencyRange::new(65.0, 75.0, 5.0), mixer);
        assert_eq!(cursor.frequency(), 65.0);
        assert!((cursor.sweep_frequency() - 65.047).abs() < 1e-9);
        assert!(cursor.advance());
        assert!(cursor.advance());
        assert!(cursor.is_last());
        assert!(!cursor.advance());
        assert_eq!(cursor.index(), 2);
        assert_eq!(cursor.frequency(), 75.0);
    }
}

//! Exponential smoothing from normalized pointer coordinates to screen pixels.

use serde::Deserialize;

/// Where the filter starts when a session begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorSeed {
    /// Start at (0,0); the first frame moves halfway from the corner.
    #[default]
    Origin,
    /// Start at the first mapped sample, no initial snap.
    FirstSample,
}

#[derive(Debug, Clone)]
pub struct CursorFilter {
    alpha: f32,
    seed: CursorSeed,
    last: Option<(f32, f32)>,
}

impl CursorFilter {
    pub fn new(alpha: f32, seed: CursorSeed) -> Self {
        Self {
            alpha: alpha.clamp(f32::EPSILON, 1.0),
            seed,
            last: None,
        }
    }

    /// Map `raw` (normalized) onto a `screen` of (width, height) and smooth
    /// it against the previously emitted position.
    pub fn filter(&mut self, raw: (f32, f32), screen: (u32, u32)) -> (i32, i32) {
        let target = (
            raw.0.clamp(0.0, 1.0) * screen.0 as f32,
            raw.1.clamp(0.0, 1.0) * screen.1 as f32,
        );
        let prev = match (self.last, self.seed) {
            (Some(p), _) => p,
            (None, CursorSeed::Origin) => (0.0, 0.0),
            (None, CursorSeed::FirstSample) => target,
        };
        let next = (
            prev.0 + (target.0 - prev.0) * self.alpha,
            prev.1 + (target.1 - prev.1) * self.alpha,
        );
        self.last = Some(next);
        (next.0.round() as i32, next.1.round() as i32)
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCREEN: (u32, u32) = (1920, 1080);

    #[test]
    fn test_origin_seed_snaps_halfway() {
        let mut f = CursorFilter::new(0.5, CursorSeed::Origin);
        assert_eq!(f.filter((0.5, 0.5), SCREEN), (480, 270));
    }

    #[test]
    fn test_first_sample_seed_starts_on_target() {
        let mut f = CursorFilter::new(0.5, CursorSeed::FirstSample);
        assert_eq!(f.filter((0.5, 0.5), SCREEN), (960, 540));
    }

    #[test]
    fn test_converges_monotonically_without_overshoot() {
        let mut f = CursorFilter::new(0.5, CursorSeed::Origin);
        let target = (1440, 810);
        let mut prev = (0, 0);
        let mut steps = 0;
        while prev != target {
            let next = f.filter((0.75, 0.75), SCREEN);
            assert!(next.0 >= prev.0 && next.0 <= target.0, "x overshoot at {next:?}");
            assert!(next.1 >= prev.1 && next.1 <= target.1, "y overshoot at {next:?}");
            prev = next;
            steps += 1;
            assert!(steps <= 16, "did not converge, stuck at {prev:?}");
        }
    }

    #[test]
    fn test_deterministic_and_resettable() {
        let samples = [(0.1, 0.2), (0.4, 0.4), (0.9, 0.1)];
        let mut a = CursorFilter::new(0.5, CursorSeed::Origin);
        let first: Vec<_> = samples.iter().map(|s| a.filter(*s, SCREEN)).collect();

        a.reset();
        let second: Vec<_> = samples.iter().map(|s| a.filter(*s, SCREEN)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_out_of_frame_samples_are_clamped() {
        let mut f = CursorFilter::new(1.0, CursorSeed::Origin);
        assert_eq!(f.filter((1.3, -0.2), SCREEN), (1920, 0));
    }
}

/// An exponential moving average.
///
/// Each new sample moves the mean towards itself by `1 / inverted_gain` of
/// the difference. Until `inverted_gain` samples were seen the gain is larger,
/// so that the first samples are not skewed towards the zero starting value.
#[derive(Clone, Copy, Debug)]
pub struct SlidingAvg {
    /// The current running average, effectively the mean.
    mean: f64,
    /// The number of samples received, capped at `inverted_gain`.
    sample_count: usize,
    /// The weight of new samples is `1 / inverted_gain`.
    inverted_gain: usize,
}

impl SlidingAvg {
    pub fn new(inverted_gain: usize) -> Self {
        debug_assert!(inverted_gain > 0);
        Self {
            mean: 0.0,
            sample_count: 0,
            inverted_gain,
        }
    }

    pub fn update(&mut self, sample: f64) {
        if self.sample_count < self.inverted_gain {
            self.sample_count += 1;
        }

        let n = self.sample_count as f64;
        self.mean += (sample - self.mean) / n;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Returns true if no sample was received yet.
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}

impl Default for SlidingAvg {
    fn default() -> Self {
        Self::new(20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_is_the_mean() {
        let mut avg = SlidingAvg::new(10);
        assert!(avg.is_empty());
        avg.update(100.0);
        assert!(!avg.is_empty());
        assert_eq!(avg.mean(), 100.0);
    }

    #[test]
    fn averages_until_gain_is_reached() {
        let mut avg = SlidingAvg::new(4);
        for sample in [10.0, 20.0, 30.0, 40.0] {
            avg.update(sample);
        }
        assert_eq!(avg.mean(), 25.0);

        // from now on every sample has a weight of a quarter
        avg.update(125.0);
        assert_eq!(avg.mean(), 50.0);
    }
}

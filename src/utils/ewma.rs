/// Exponentially weighted moving average that seeds itself from the first sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Ewma {
    value: Option<f64>,
}

impl Ewma {
    pub fn new() -> Self {
        Self { value: None }
    }

    /// Folds `sample` in with weight `alpha`; the first sample becomes the mean.
    pub fn update(&mut self, sample: f64, alpha: f64) -> f64 {
        let next = match self.value {
            None => sample,
            Some(avg) => alpha * sample + (1.0 - alpha) * avg,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn is_initialized(&self) -> bool {
        self.value.is_some()
    }
}

/// Smoothing factor for an EWMA that should span `window_minutes` of samples
/// taken every `interval_secs`: `2 / (N + 1)`, clamped to `[0.01, 0.5]`.
pub fn dynamic_alpha(interval_secs: f64, window_minutes: f64) -> f64 {
    if interval_secs <= 0.0 {
        return 0.5;
    }
    let readings_in_window = (60.0 / interval_secs) * window_minutes;
    (2.0 / (readings_in_window + 1.0)).clamp(0.01, 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds() {
        let mut avg = Ewma::new();
        assert!(!avg.is_initialized());
        assert_eq!(avg.update(7.0, 0.1), 7.0);
        assert_eq!(avg.value(), Some(7.0));
    }

    #[test]
    fn test_update_blends() {
        let mut avg = Ewma::new();
        avg.update(10.0, 0.5);
        assert_eq!(avg.update(20.0, 0.5), 15.0);
    }

    #[test]
    fn test_dynamic_alpha_five_minute_window() {
        // 5 s interval -> 60 readings -> 2/61
        let alpha = dynamic_alpha(5.0, 5.0);
        assert!((alpha - 2.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_dynamic_alpha_clamped() {
        assert_eq!(dynamic_alpha(600.0, 5.0), 0.5);
        assert_eq!(dynamic_alpha(0.1, 60.0), 0.01);
        assert_eq!(dynamic_alpha(0.0, 5.0), 0.5);
    }
}

//! Signal authenticity classifier
//!
//! Decides from a short window of calm/focus samples whether the headset is
//! worn and streaming physiological signal, or whether the stream is stuck,
//! synthetic or otherwise fabricated. Five checks run in a fixed order and
//! the first failure decides the verdict:
//!
//! 1. variance: both metrics nearly constant
//! 2. range: too many probabilities outside `[0.05, 0.95]`
//! 3. cadence: timestamps going backwards, too fast, stalled
//! 4. correlation: calm and focus move in lockstep
//! 5. suspicious values: exact extremes, repetition, arithmetic or periodic sequences

use std::collections::VecDeque;
use std::fmt;

use cw_protocol::Verdict;
use tracing::debug;

use crate::constants::authenticity::*;

/// Metrics tracked by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Calm,
    Focus,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Calm, Metric::Focus];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Calm => "calm",
            Metric::Focus => "focus",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-capacity FIFO of recent probabilities and their arrival timestamps
#[derive(Debug, Clone)]
pub struct SampleWindow {
    values: VecDeque<f64>,
    timestamps: VecDeque<i64>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            timestamps: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64, timestamp_ms: i64) {
        if self.capacity == 0 {
            return;
        }
        if self.values.len() == self.capacity {
            self.values.pop_front();
            self.timestamps.pop_front();
        }
        self.values.push_back(value);
        self.timestamps.push_back(timestamp_ms);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn values(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.timestamps.iter().copied().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CadenceFault {
    Backwards,
    TooFast,
    Stalled,
    NoNormalInterval,
}

impl fmt::Display for CadenceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CadenceFault::Backwards => write!(f, "timestamps not increasing"),
            CadenceFault::TooFast => write!(f, "unrealistic frequency (>200Hz)"),
            CadenceFault::Stalled => write!(f, "gaps over two minutes between samples"),
            CadenceFault::NoNormalInterval => write!(f, "no interval in the normal range"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SuspiciousPattern {
    ExactExtremes { count: usize, total: usize },
    Repetitive { metric: Metric, distinct: usize },
    Arithmetic { metric: Metric },
    Periodic { metric: Metric, period: usize },
}

impl fmt::Display for SuspiciousPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuspiciousPattern::ExactExtremes { count, total } => {
                write!(f, "{}/{} samples exactly 0.0 or 1.0", count, total)
            }
            SuspiciousPattern::Repetitive { metric, distinct } => {
                write!(f, "{} has only {} distinct values", metric, distinct)
            }
            SuspiciousPattern::Arithmetic { metric } => {
                write!(f, "{} is an arithmetic progression", metric)
            }
            SuspiciousPattern::Periodic { metric, period } => {
                write!(f, "{} repeats with period {}", metric, period)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Rejection {
    InsufficientData,
    LowVariance { calm: f64, focus: f64 },
    Distribution { metric: Metric, ratio: f64 },
    Cadence { metric: Metric, fault: CadenceFault },
    Correlated { correlation: f64 },
    Suspicious(SuspiciousPattern),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::InsufficientData => write!(f, "insufficient data"),
            Rejection::LowVariance { calm, focus } => write!(
                f,
                "data too constant (variance calm={:.6}, focus={:.6})",
                calm, focus
            ),
            Rejection::Distribution { metric, ratio } => write!(
                f,
                "artificial distribution ({}: {:.0}% of samples in [{}, {}])",
                metric,
                ratio * 100.0,
                RANGE_LOW,
                RANGE_HIGH
            ),
            Rejection::Cadence { metric, fault } => {
                write!(f, "severe timestamp problem on {}: {}", metric, fault)
            }
            Rejection::Correlated { correlation } => write!(
                f,
                "non-biological pattern (calm/focus correlation {:.3})",
                correlation
            ),
            Rejection::Suspicious(pattern) => write!(f, "clearly simulated data ({})", pattern),
        }
    }
}

/// Rolling calm/focus windows plus the five-check evaluation
#[derive(Debug, Clone)]
pub struct AuthenticityClassifier {
    calm: SampleWindow,
    focus: SampleWindow,
    min_samples: usize,
}

impl Default for AuthenticityClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthenticityClassifier {
    pub fn new() -> Self {
        Self::with_limits(WINDOW_CAPACITY, MIN_SAMPLES)
    }

    pub fn with_limits(capacity: usize, min_samples: usize) -> Self {
        Self {
            calm: SampleWindow::new(capacity),
            focus: SampleWindow::new(capacity),
            min_samples,
        }
    }

    pub fn add_sample(&mut self, metric: Metric, probability: f64, timestamp_ms: i64) {
        self.window_mut(metric).push(probability, timestamp_ms);
    }

    pub fn window(&self, metric: Metric) -> &SampleWindow {
        match metric {
            Metric::Calm => &self.calm,
            Metric::Focus => &self.focus,
        }
    }

    fn window_mut(&mut self, metric: Metric) -> &mut SampleWindow {
        match metric {
            Metric::Calm => &mut self.calm,
            Metric::Focus => &mut self.focus,
        }
    }

    /// Samples usable by a verdict: the shorter of the two windows
    pub fn data_points(&self) -> usize {
        self.calm.len().min(self.focus.len())
    }

    /// Recompute the verdict from the current windows. Does not mutate state.
    pub fn evaluate(&self) -> Verdict {
        match self.check() {
            Ok(()) => Verdict::authentic(),
            Err(rejection) => {
                debug!(
                    "Authenticity rejected after {} samples: {}",
                    self.data_points(),
                    rejection
                );
                Verdict::rejected(rejection.to_string())
            }
        }
    }

    fn check(&self) -> Result<(), Rejection> {
        if self.calm.len() < self.min_samples || self.focus.len() < self.min_samples {
            return Err(Rejection::InsufficientData);
        }

        let calm = self.calm.values();
        let focus = self.focus.values();

        check_variance(&calm, &focus)?;
        check_range(Metric::Calm, &calm)?;
        check_range(Metric::Focus, &focus)?;
        for metric in Metric::ALL {
            check_cadence(&self.window(metric).timestamps())
                .map_err(|fault| Rejection::Cadence { metric, fault })?;
        }
        check_correlation(&calm, &focus)?;
        check_suspicious(&calm, &focus).map_err(Rejection::Suspicious)
    }
}

/// Sample variance (n-1 denominator); zero for fewer than two values
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
}

/// Pearson correlation, population form. Returns 0 for mismatched or short
/// inputs and when the denominator vanishes.
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return 0.0;
    }
    let n = x.len() as f64;
    let sum_x: f64 = x.iter().sum();
    let sum_y: f64 = y.iter().sum();
    let sum_xy: f64 = x.iter().zip(y).map(|(a, b)| a * b).sum();
    let sum_x2: f64 = x.iter().map(|a| a * a).sum();
    let sum_y2: f64 = y.iter().map(|b| b * b).sum();

    let denominator = ((n * sum_x2 - sum_x * sum_x) * (n * sum_y2 - sum_y * sum_y)).sqrt();
    if !(denominator > 0.0) {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denominator
}

fn check_variance(calm: &[f64], focus: &[f64]) -> Result<(), Rejection> {
    let calm_var = sample_variance(calm);
    let focus_var = sample_variance(focus);
    if calm_var < VARIANCE_FLOOR && focus_var < VARIANCE_FLOOR {
        return Err(Rejection::LowVariance {
            calm: calm_var,
            focus: focus_var,
        });
    }
    Ok(())
}

fn check_range(metric: Metric, values: &[f64]) -> Result<(), Rejection> {
    let in_range = values
        .iter()
        .filter(|v| (RANGE_LOW..=RANGE_HIGH).contains(*v))
        .count();
    let ratio = if values.is_empty() {
        0.0
    } else {
        in_range as f64 / values.len() as f64
    };
    if ratio < RANGE_RATIO {
        return Err(Rejection::Distribution { metric, ratio });
    }
    Ok(())
}

fn check_cadence(timestamps: &[i64]) -> Result<(), CadenceFault> {
    if timestamps.len() < 2 {
        return Ok(());
    }
    // Saturate so wild timestamps keep their direction instead of wrapping.
    let intervals: Vec<i64> = timestamps
        .windows(2)
        .map(|w| w[1].saturating_sub(w[0]))
        .collect();
    let total = intervals.len() as f64;

    if intervals.iter().any(|&i| i <= 0) {
        return Err(CadenceFault::Backwards);
    }
    let too_fast = intervals.iter().filter(|&&i| i < MIN_INTERVAL_MS).count();
    if too_fast as f64 > total * TOO_FAST_RATIO {
        return Err(CadenceFault::TooFast);
    }
    let too_slow = intervals.iter().filter(|&&i| i > MAX_INTERVAL_MS).count();
    if too_slow as f64 > total * TOO_SLOW_RATIO {
        return Err(CadenceFault::Stalled);
    }
    let normal = intervals
        .iter()
        .filter(|&&i| (MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&i))
        .count();
    if normal == 0 {
        return Err(CadenceFault::NoNormalInterval);
    }
    Ok(())
}

fn check_correlation(calm: &[f64], focus: &[f64]) -> Result<(), Rejection> {
    // Windows may differ in length; compare the most recent overlapping tail.
    let n = calm.len().min(focus.len());
    let correlation = pearson_correlation(&calm[calm.len() - n..], &focus[focus.len() - n..]);
    if correlation.abs() >= CORRELATION_CEILING {
        return Err(Rejection::Correlated { correlation });
    }
    Ok(())
}

fn check_suspicious(calm: &[f64], focus: &[f64]) -> Result<(), SuspiciousPattern> {
    let total = calm.len() + focus.len();
    if total == 0 {
        return Ok(());
    }

    let extremes = calm
        .iter()
        .chain(focus)
        .filter(|&&v| v == 0.0 || v == 1.0)
        .count();
    if extremes as f64 / total as f64 > EXTREME_RATIO {
        return Err(SuspiciousPattern::ExactExtremes {
            count: extremes,
            total,
        });
    }

    for (metric, values) in [(Metric::Calm, calm), (Metric::Focus, focus)] {
        let distinct = distinct_count(values);
        if values.len() > REPETITION_MIN_LEN && distinct <= MAX_REPEATED_DISTINCT {
            return Err(SuspiciousPattern::Repetitive { metric, distinct });
        }
    }

    for (metric, values) in [(Metric::Calm, calm), (Metric::Focus, focus)] {
        if is_arithmetic(values) {
            return Err(SuspiciousPattern::Arithmetic { metric });
        }
        if let Some(period) = repeating_period(values) {
            return Err(SuspiciousPattern::Periodic { metric, period });
        }
    }

    Ok(())
}

fn distinct_count(values: &[f64]) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup();
    sorted.len()
}

fn is_arithmetic(values: &[f64]) -> bool {
    if values.len() < ARITHMETIC_MIN_LEN {
        return false;
    }
    let step = values[1] - values[0];
    values.windows(2).all(|w| w[1] - w[0] == step)
}

fn repeating_period(values: &[f64]) -> Option<usize> {
    if values.len() < PERIODIC_MIN_LEN {
        return None;
    }
    [2, 3]
        .into_iter()
        .find(|&p| values.iter().enumerate().all(|(i, v)| *v == values[i % p]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALM: [f64; 10] = [0.42, 0.55, 0.38, 0.61, 0.47, 0.52, 0.35, 0.58, 0.44, 0.50];
    const FOCUS: [f64; 10] = [0.30, 0.33, 0.45, 0.28, 0.51, 0.36, 0.40, 0.62, 0.31, 0.47];

    fn feed(calm: &[f64], focus: &[f64], step_ms: i64) -> AuthenticityClassifier {
        let mut classifier = AuthenticityClassifier::new();
        for (i, v) in calm.iter().enumerate() {
            classifier.add_sample(Metric::Calm, *v, i as i64 * step_ms);
        }
        for (i, v) in focus.iter().enumerate() {
            classifier.add_sample(Metric::Focus, *v, i as i64 * step_ms);
        }
        classifier
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = SampleWindow::new(3);
        for i in 0..5 {
            window.push(i as f64, i * 10);
        }
        assert_eq!(window.values(), vec![2.0, 3.0, 4.0]);
        assert_eq!(window.timestamps(), vec![20, 30, 40]);
    }

    #[test]
    fn test_authentic_stream() {
        let verdict = feed(&CALM, &FOCUS, 100).evaluate();
        assert_eq!(verdict, Verdict::authentic());
    }

    #[test]
    fn test_insufficient_data() {
        let verdict = feed(&CALM[..4], &FOCUS, 100).evaluate();
        assert!(!verdict.is_authentic);
        assert_eq!(verdict.reason, "insufficient data");
    }

    #[test]
    fn test_constant_stream_rejected_by_variance() {
        let verdict = feed(&[0.5; 10], &[0.5; 10], 100).evaluate();
        assert!(!verdict.is_authentic);
        assert!(verdict.reason.starts_with("data too constant"), "{}", verdict.reason);
    }

    #[test]
    fn test_one_constant_metric_passes_variance() {
        // Only both-below-floor fails; a flat calm with lively focus moves on.
        assert!(check_variance(&[0.5; 10], &FOCUS).is_ok());
    }

    #[test]
    fn test_saturated_metric_rejected_by_range() {
        let calm = [0.99, 0.97, 0.99, 0.98, 0.99, 0.96, 0.99, 0.97, 0.99, 0.98];
        let verdict = feed(&calm, &FOCUS, 100).evaluate();
        assert!(verdict.reason.starts_with("artificial distribution (calm"), "{}", verdict.reason);
    }

    #[test]
    fn test_range_ratio_boundary() {
        // 7 of 10 inside the band is exactly the 70% floor.
        let values = [0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.99, 0.99, 0.99];
        assert!(check_range(Metric::Calm, &values).is_ok());
        let values = [0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.99, 0.99, 0.99, 0.99];
        assert!(check_range(Metric::Calm, &values).is_err());
    }

    #[test]
    fn test_backwards_timestamp_rejected() {
        let mut classifier = feed(&CALM[..9], &FOCUS, 100);
        classifier.add_sample(Metric::Calm, CALM[9], 500);
        let verdict = classifier.evaluate();
        assert!(verdict.reason.contains("timestamps not increasing"), "{}", verdict.reason);
    }

    #[test]
    fn test_too_fast_rejected() {
        let verdict = feed(&CALM, &FOCUS, 2).evaluate();
        assert!(verdict.reason.contains(">200Hz"), "{}", verdict.reason);
    }

    #[test]
    fn test_stalled_rejected() {
        let verdict = feed(&CALM, &FOCUS, 150_000).evaluate();
        assert!(verdict.reason.contains("gaps over two minutes"), "{}", verdict.reason);
    }

    #[test]
    fn test_cadence_thresholds() {
        // 5 of 9 intervals too fast is over half.
        let ts = [0, 1, 2, 3, 4, 5, 105, 205, 305, 405];
        assert_eq!(check_cadence(&ts), Err(CadenceFault::TooFast));
        // 4 of 9 is tolerated.
        let ts = [0, 1, 2, 3, 4, 104, 204, 304, 404, 504];
        assert_eq!(check_cadence(&ts), Ok(()));
        // 3 of 9 stalled is over 30%.
        let ts = [0, 100, 200, 300, 400, 500, 200_500, 400_500, 600_500, 600_600];
        assert_eq!(check_cadence(&ts), Err(CadenceFault::Stalled));
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        // Wrapping to i64::MIN after i64::MAX - 1 is a backwards step.
        let ts = [i64::MAX - 4, i64::MAX - 3, i64::MAX - 2, i64::MAX - 1, i64::MIN];
        assert_eq!(check_cadence(&ts), Err(CadenceFault::Backwards));

        let mut classifier = AuthenticityClassifier::new();
        for (i, t) in ts.iter().enumerate() {
            classifier.add_sample(Metric::Calm, CALM[i], *t);
            classifier.add_sample(Metric::Focus, FOCUS[i], *t);
        }
        let verdict = classifier.evaluate();
        assert!(verdict.reason.contains("timestamps not increasing"), "{}", verdict.reason);

        // A forward jump across the whole range counts as a stall.
        let ts = [i64::MIN, 0, i64::MAX];
        assert_eq!(check_cadence(&ts), Err(CadenceFault::Stalled));
    }

    #[test]
    fn test_arithmetic_needs_identical_steps() {
        assert!(is_arithmetic(&[0.25, 0.5, 0.75, 1.0]));
        assert!(!is_arithmetic(&[0.25, 0.5, 0.75, 1.0 + 1e-12]));
    }

    #[test]
    fn test_fifty_ms_cadence_is_not_too_fast() {
        let ts = [0, 50, 100, 150, 200, 250];
        assert_eq!(check_cadence(&ts), Ok(()));
        let verdict = feed(&CALM[..6], &FOCUS[..6], 50).evaluate();
        assert!(verdict.is_authentic, "{}", verdict.reason);
    }

    #[test]
    fn test_mirrored_metrics_rejected_by_correlation() {
        let verdict = feed(&CALM, &CALM, 100).evaluate();
        assert!(verdict.reason.starts_with("non-biological pattern"), "{}", verdict.reason);
    }

    #[test]
    fn test_inverse_metrics_rejected_by_correlation() {
        let inverse: Vec<f64> = CALM.iter().map(|v| 1.0 - v).collect();
        let verdict = feed(&CALM, &inverse, 100).evaluate();
        assert!(verdict.reason.starts_with("non-biological pattern"), "{}", verdict.reason);
    }

    #[test]
    fn test_alternating_stream_rejected() {
        let alternating = [0.2, 0.8, 0.2, 0.8, 0.2, 0.8, 0.2, 0.8, 0.2, 0.8];
        let verdict = feed(&alternating, &alternating, 100).evaluate();
        assert!(!verdict.is_authentic);
    }

    #[test]
    fn test_alternating_calm_is_suspicious() {
        let alternating = [0.2, 0.8, 0.2, 0.8, 0.2, 0.8, 0.2, 0.8, 0.2, 0.8];
        let verdict = feed(&alternating, &FOCUS, 100).evaluate();
        assert!(verdict.reason.starts_with("clearly simulated data"), "{}", verdict.reason);
    }

    #[test]
    fn test_period_three_is_suspicious() {
        let cycle = [0.3, 0.5, 0.7, 0.3, 0.5, 0.7, 0.3, 0.5, 0.7, 0.3];
        let verdict = feed(&cycle, &FOCUS, 100).evaluate();
        assert!(verdict.reason.contains("period 3"), "{}", verdict.reason);
    }

    #[test]
    fn test_arithmetic_progression_is_suspicious() {
        let ramp: Vec<f64> = (0..10).map(|i| 0.125 + 0.0625 * i as f64).collect();
        let verdict = feed(&ramp, &FOCUS, 100).evaluate();
        assert!(verdict.reason.contains("arithmetic progression"), "{}", verdict.reason);
    }

    #[test]
    fn test_exact_extremes_are_suspicious() {
        let calm = [0.0, 1.0, 0.0, 1.0, 0.0];
        let focus = [1.0, 0.0, 1.0, 0.4, 0.6];
        assert!(matches!(
            check_suspicious(&calm, &focus),
            Err(SuspiciousPattern::ExactExtremes { count: 8, total: 10 })
        ));
    }

    #[test]
    fn test_pearson_zero_denominator() {
        assert_eq!(pearson_correlation(&[0.5; 6], &FOCUS[..6]), 0.0);
        assert_eq!(pearson_correlation(&CALM, &FOCUS[..5]), 0.0);
    }

    #[test]
    fn test_correlation_uses_recent_tail() {
        let mut classifier = feed(&CALM, &FOCUS, 100);
        // A shorter focus window must not panic or misalign.
        classifier.focus = SampleWindow::new(10);
        for (i, v) in FOCUS[..6].iter().enumerate() {
            classifier.add_sample(Metric::Focus, *v, i as i64 * 100);
        }
        assert_eq!(classifier.data_points(), 6);
        assert!(classifier.evaluate().is_authentic);

        // Focus repeating the newest calm values is caught despite the length gap.
        let verdict = feed(&CALM, &CALM[4..], 100).evaluate();
        assert!(verdict.reason.starts_with("non-biological pattern"), "{}", verdict.reason);
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let classifier = feed(&CALM, &FOCUS, 100);
        assert_eq!(classifier.evaluate(), classifier.evaluate());
    }
}

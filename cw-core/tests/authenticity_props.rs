//! Property tests for the authenticity classifier

use cw_core::authenticity::{
    pearson_correlation, sample_variance, AuthenticityClassifier, Metric, SampleWindow,
};
use proptest::prelude::*;

fn feed(calm: &[f64], focus: &[f64], calm_ts: &[i64], focus_ts: &[i64]) -> AuthenticityClassifier {
    let mut classifier = AuthenticityClassifier::new();
    for (value, ts) in calm.iter().zip(calm_ts) {
        classifier.add_sample(Metric::Calm, *value, *ts);
    }
    for (value, ts) in focus.iter().zip(focus_ts) {
        classifier.add_sample(Metric::Focus, *value, *ts);
    }
    classifier
}

fn cadence(len: usize, step: i64) -> Vec<i64> {
    (0..len as i64).map(|i| 1_700_000_000_000 + i * step).collect()
}

fn distinct(values: &[f64]) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup();
    sorted.len()
}

proptest! {
    #[test]
    fn short_windows_never_authentic(
        calm in prop::collection::vec(0.0f64..=1.0, 0..5),
        focus in prop::collection::vec(0.0f64..=1.0, 0..12),
    ) {
        let classifier = feed(&calm, &focus, &cadence(calm.len(), 100), &cadence(focus.len(), 100));
        let verdict = classifier.evaluate();
        prop_assert!(!verdict.is_authentic);
        prop_assert_eq!(verdict.reason, "insufficient data");
    }

    #[test]
    fn constant_streams_rejected(value in 0.0f64..=1.0, len in 5usize..=10) {
        let values = vec![value; len];
        let ts = cadence(len, 100);
        prop_assert!(!feed(&values, &values, &ts, &ts).evaluate().is_authentic);
    }

    #[test]
    fn mirrored_streams_rejected(values in prop::collection::vec(0.1f64..=0.9, 5..=10)) {
        prop_assume!(sample_variance(&values) >= 0.001);
        let ts = cadence(values.len(), 100);
        prop_assert!(!feed(&values, &values, &ts, &ts).evaluate().is_authentic);
    }

    #[test]
    fn independent_ten_hertz_streams_accepted(
        calm in prop::collection::vec(0.1f64..=0.9, 5..=10),
        focus in prop::collection::vec(0.1f64..=0.9, 5..=10),
    ) {
        prop_assume!(distinct(&calm) >= 3 && distinct(&focus) >= 3);
        prop_assume!(sample_variance(&calm) >= 0.001 || sample_variance(&focus) >= 0.001);
        let n = calm.len().min(focus.len());
        let correlation = pearson_correlation(&calm[calm.len() - n..], &focus[focus.len() - n..]);
        prop_assume!(correlation.abs() < 0.95);

        let classifier = feed(&calm, &focus, &cadence(calm.len(), 100), &cadence(focus.len(), 100));
        let verdict = classifier.evaluate();
        prop_assert!(verdict.is_authentic, "rejected: {}", verdict.reason);
    }

    #[test]
    fn backwards_timestamps_always_rejected(
        calm in prop::collection::vec(0.1f64..=0.9, 5..=10),
        focus in prop::collection::vec(0.1f64..=0.9, 5..=10),
        at in 1usize..10,
        back in 0i64..500,
    ) {
        let mut calm_ts = cadence(calm.len(), 100);
        let i = at.min(calm.len() - 1);
        calm_ts[i] = calm_ts[i - 1] - back;

        let classifier = feed(&calm, &focus, &calm_ts, &cadence(focus.len(), 100));
        prop_assert!(!classifier.evaluate().is_authentic);
    }

    #[test]
    fn arbitrary_timestamps_never_panic(
        calm in prop::collection::vec(0.1f64..=0.9, 5..=10),
        focus in prop::collection::vec(0.1f64..=0.9, 5..=10),
        calm_ts in prop::collection::vec(any::<i64>(), 10),
        focus_ts in prop::collection::vec(any::<i64>(), 10),
    ) {
        let classifier = feed(&calm, &focus, &calm_ts, &focus_ts);
        let verdict = classifier.evaluate();

        let calm_ts = &calm_ts[..calm.len()];
        let increasing = calm_ts.windows(2).all(|w| w[1] > w[0]);
        if !increasing {
            prop_assert!(!verdict.is_authentic);
        }
    }

    #[test]
    fn evaluate_is_idempotent(
        calm in prop::collection::vec(0.0f64..=1.0, 0..15),
        focus in prop::collection::vec(0.0f64..=1.0, 0..15),
        step in 1i64..1000,
    ) {
        let calm_ts = cadence(calm.len(), step);
        let focus_ts = cadence(focus.len(), step);
        let classifier = feed(&calm, &focus, &calm_ts, &focus_ts);
        prop_assert_eq!(classifier.evaluate(), classifier.evaluate());
    }

    #[test]
    fn window_keeps_most_recent(values in prop::collection::vec(0.0f64..=1.0, 0..40)) {
        let mut window = SampleWindow::new(10);
        for (i, v) in values.iter().enumerate() {
            window.push(*v, i as i64);
        }
        let kept = values.len().min(10);
        prop_assert_eq!(window.len(), kept);
        prop_assert_eq!(window.values(), values[values.len() - kept..].to_vec());
    }
}

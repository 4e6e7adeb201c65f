//! Raw brainwave payload reduction
//!
//! The worker never forwards raw band arrays; each band is reduced to
//! summary statistics before it goes on the event stream.

use cw_error::{CrownwatchError, Result};
use cw_protocol::{BandStats, BandSummaries};
use tracing::warn;

use crate::sdk::RawBrainwaves;

/// Summarize every band present in a raw payload.
///
/// Fails when the payload carries none of the five bands. Non-finite values
/// are dropped; absent bands are reported as empty summaries.
pub fn summarize(raw: &RawBrainwaves) -> Result<BandSummaries> {
    let bands = [&raw.delta, &raw.theta, &raw.alpha, &raw.beta, &raw.gamma];
    if bands.iter().all(|band| band.is_none()) {
        return Err(CrownwatchError::InvalidData(
            "brainwave payload has no frequency bands".to_string(),
        ));
    }

    Ok(BandSummaries {
        delta: band_stats("delta", &raw.delta),
        theta: band_stats("theta", &raw.theta),
        alpha: band_stats("alpha", &raw.alpha),
        beta: band_stats("beta", &raw.beta),
        gamma: band_stats("gamma", &raw.gamma),
    })
}

fn band_stats(name: &str, values: &Option<Vec<f64>>) -> BandStats {
    let Some(values) = values else {
        return BandStats::default();
    };
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() != values.len() {
        warn!(
            "Dropped {} non-finite {} values",
            values.len() - finite.len(),
            name
        );
    }
    BandStats::from_values(&finite)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_rejected() {
        assert!(matches!(
            summarize(&RawBrainwaves::default()),
            Err(CrownwatchError::InvalidData(_))
        ));
    }

    #[test]
    fn test_partial_payload() {
        let raw = RawBrainwaves {
            alpha: Some(vec![1.0, 2.0, 3.0, 4.0]),
            ..RawBrainwaves::default()
        };
        let summary = summarize(&raw).unwrap();

        assert_eq!(summary.alpha.mean, 2.5);
        assert_eq!(summary.alpha.min, 1.0);
        assert_eq!(summary.alpha.max, 4.0);
        // population std of 1..4
        assert!((summary.alpha.std - 1.25_f64.sqrt()).abs() < 1e-12);
        assert_eq!(summary.alpha.samples, 4);
        assert_eq!(summary.delta, BandStats::default());
    }

    #[test]
    fn test_non_finite_values_dropped() {
        let raw = RawBrainwaves {
            beta: Some(vec![f64::NAN, 2.0, f64::INFINITY, 4.0]),
            ..RawBrainwaves::default()
        };
        let summary = summarize(&raw).unwrap();
        assert_eq!(summary.beta.samples, 2);
        assert_eq!(summary.beta.mean, 3.0);
    }
}

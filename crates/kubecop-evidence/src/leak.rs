//! Bounded-growth leak check

use tracing::{info, warn};

use kubecop_common::Error;

use crate::metrics::MetricSeries;

/// Pass iff the last sample is at most `tolerance` above the first.
///
/// Only the endpoints are compared, so spikes in between never fail the
/// check. An empty series is [`Error::NoData`].
pub fn check_bounded_growth(series: &MetricSeries, tolerance: f64) -> Result<(), Error> {
    let (Some(&(_, first)), Some(&(_, last))) = (series.points.first(), series.points.last())
    else {
        return Err(Error::no_data("leak check on empty series"));
    };

    let delta = last - first;
    if last <= first + tolerance {
        info!(first, last, delta, tolerance, "Growth within bounds");
        return Ok(());
    }

    warn!(first, last, delta, tolerance, "Unbounded growth");
    Err(Error::LeakDetected {
        delta,
        first,
        last,
        tolerance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> MetricSeries {
        MetricSeries::new(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (i as f64, *v))
                .collect(),
        )
    }

    #[test]
    fn noisy_but_bounded_passes() {
        check_bounded_growth(&series(&[100.0, 105.0, 98.0, 103.0]), 10.0).unwrap();
    }

    #[test]
    fn growth_beyond_tolerance_reports_delta() {
        match check_bounded_growth(&series(&[100.0, 150.0]), 10.0) {
            Err(Error::LeakDetected { delta, .. }) => assert_eq!(delta, 50.0),
            other => panic!("expected leak, got {other:?}"),
        }
    }

    #[test]
    fn transient_spike_is_ignored() {
        check_bounded_growth(&series(&[100.0, 900.0, 100.0]), 0.0).unwrap();
    }

    #[test]
    fn zero_tolerance_allows_equal_endpoints() {
        check_bounded_growth(&series(&[42.0, 42.0]), 0.0).unwrap();
        assert!(check_bounded_growth(&series(&[42.0, 42.5]), 0.0).is_err());
    }

    #[test]
    fn single_sample_passes() {
        check_bounded_growth(&series(&[7.0]), 0.0).unwrap();
    }

    #[test]
    fn empty_series_is_no_data() {
        assert!(matches!(
            check_bounded_growth(&MetricSeries::default(), 10.0),
            Err(Error::NoData { .. })
        ));
    }
}

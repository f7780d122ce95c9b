//! Detection of flat utilization intervals.
//!
//! A link is "flat" while its rolling utilization stays inside a valid band
//! and barely moves. Suspect samples are grown back by one window and merged
//! with the previous interval while the combined range stays under the
//! flatness limit; intervals shorter than one window are discarded.

use crate::frame::Frame;
use crate::stats::{
    DEFAULT_LINK_COLUMN, DataKind, LinkSpeedLookup, LinkStats, UTILIZATION_COLUMN,
    compute_link_bandwidth, compute_link_utilization, compute_stats, min_resolution, resample,
    sampling_period,
};
use crate::{DfCacheError, Result, Timestamp};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A closed time interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Interval {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Flat intervals per link. Every analyzed link has an entry, possibly empty.
pub type FlatnessResult = BTreeMap<String, Vec<Interval>>;

/// Sum of interval durations.
pub fn total_flat_duration(intervals: &[Interval]) -> TimeDelta {
    intervals
        .iter()
        .fold(TimeDelta::zero(), |acc, interval| acc + interval.duration())
}

/// Parameters of a flatness analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatnessConfig {
    pub link_column: String,
    pub data_column: String,
    pub data_kind: DataKind,
    /// Rolling window; also the minimum length of a reported interval.
    pub window: Duration,
    /// Minimum non-NaN samples for a rolling window to count.
    pub min_periods: usize,
    /// Utilization band (percent, exclusive) outside of which a sample is not suspect.
    pub min_valid: f64,
    pub max_valid: f64,
    /// Largest `max - min` utilization spread still considered flat.
    pub flatness_limit: f64,
    /// Resample to the smallest observed resolution when sampling is uneven.
    pub resample: bool,
}

impl Default for FlatnessConfig {
    fn default() -> Self {
        Self {
            link_column: DEFAULT_LINK_COLUMN.to_string(),
            data_column: "bytes".to_string(),
            data_kind: DataKind::Bytes,
            window: Duration::from_secs(3600),
            min_periods: 1,
            min_valid: 0.0,
            max_valid: 100.0,
            flatness_limit: 1.0,
            resample: false,
        }
    }
}

impl FlatnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link_column(mut self, column: impl Into<String>) -> Self {
        self.link_column = column.into();
        self
    }

    pub fn with_data_column(mut self, column: impl Into<String>, kind: DataKind) -> Self {
        self.data_column = column.into();
        self.data_kind = kind;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_min_periods(mut self, min_periods: usize) -> Self {
        self.min_periods = min_periods;
        self
    }

    /// Sets the exclusive utilization band for suspect samples.
    pub fn with_valid_range(mut self, min_valid: f64, max_valid: f64) -> Self {
        self.min_valid = min_valid;
        self.max_valid = max_valid;
        self
    }

    pub fn with_flatness_limit(mut self, limit: f64) -> Self {
        self.flatness_limit = limit;
        self
    }

    pub fn with_resample(mut self, enabled: bool) -> Self {
        self.resample = enabled;
        self
    }

    /// Checks the parameters and returns the window as a `TimeDelta`.
    pub fn validate(&self) -> Result<TimeDelta> {
        let window = TimeDelta::from_std(self.window)
            .ok()
            .filter(|w| *w > TimeDelta::zero())
            .ok_or_else(|| {
                DfCacheError::InvalidConfiguration(format!(
                    "window {:?} must be positive",
                    self.window
                ))
            })?;

        if !(self.min_valid < self.max_valid) {
            return Err(DfCacheError::InvalidConfiguration(format!(
                "valid range ({}, {}) is empty",
                self.min_valid, self.max_valid
            )));
        }
        if !(self.flatness_limit > 0.0) {
            return Err(DfCacheError::InvalidConfiguration(format!(
                "flatness limit {} must be positive",
                self.flatness_limit
            )));
        }
        if self.link_column.is_empty() || self.data_column.is_empty() {
            return Err(DfCacheError::InvalidConfiguration(
                "link and data column names are required".to_string(),
            ));
        }

        Ok(window)
    }
}

struct Candidate {
    start: Timestamp,
    end: Timestamp,
    low: f64,
    high: f64,
}

fn analyze_link(stats: &LinkStats, config: &FlatnessConfig, window: TimeDelta) -> Vec<Interval> {
    let mut order: Vec<usize> = (0..stats.len()).collect();
    order.sort_by_key(|&i| stats.index[i]);

    let mut accepted: Vec<Candidate> = Vec::new();
    let mut left = 0;

    for (pos, &i) in order.iter().enumerate() {
        let t = stats.index[i];
        if let Some(lower) = t.checked_sub_signed(window) {
            while stats.index[order[left]] < lower {
                left += 1;
            }
        }

        let (Some(mean), Some(low), Some(high)) = (stats.mean[i], stats.min[i], stats.max[i])
        else {
            continue;
        };
        let suspect = mean > config.min_valid
            && mean < config.max_valid
            && high - low < config.flatness_limit;
        if !suspect {
            continue;
        }

        let start = stats.index[order[left.min(pos)]];

        if let Some(last) = accepted.last_mut()
            && last.end >= start
            && last.high.max(high) - last.low.min(low) < config.flatness_limit
        {
            last.end = t;
            last.low = last.low.min(low);
            last.high = last.high.max(high);
        } else {
            accepted.push(Candidate {
                start,
                end: t,
                low,
                high,
            });
        }
    }

    accepted
        .into_iter()
        .map(|c| Interval::new(c.start, c.end))
        .filter(|interval| interval.duration() >= window)
        .collect()
}

/// Finds flat intervals in precomputed rolling statistics.
pub fn analyze_flatness(
    stats: &BTreeMap<String, LinkStats>,
    config: &FlatnessConfig,
) -> Result<FlatnessResult> {
    let window = config.validate()?;

    let mut result = FlatnessResult::new();
    for (link, link_stats) in stats {
        let n = link_stats.len();
        for (name, len) in [
            ("mean", link_stats.mean.len()),
            ("min", link_stats.min.len()),
            ("max", link_stats.max.len()),
        ] {
            if len != n {
                return Err(DfCacheError::ColumnLength {
                    column: format!("{link}.{name}"),
                    expected: n,
                    actual: len,
                });
            }
        }

        let intervals = analyze_link(link_stats, config, window);
        if !intervals.is_empty() {
            debug!(link = %link, intervals = intervals.len(), "flat_intervals_found");
        }
        result.insert(link.clone(), intervals);
    }

    Ok(result)
}

/// Runs the full pipeline on a long-format frame: bandwidth, utilization,
/// rolling statistics and interval detection.
pub fn flatness_analysis(
    frame: &Frame,
    speeds: &dyn LinkSpeedLookup,
    config: &FlatnessConfig,
) -> Result<FlatnessResult> {
    let window = config.validate()?;
    let link_column = config.link_column.as_str();
    let data_column = config.data_column.as_str();

    frame.text_column(link_column)?;
    frame.float_column(data_column)?;

    let mut frame = frame.sort_by_index();

    if config.resample {
        match sampling_period(frame.index()) {
            Ok(_) => {}
            Err(DfCacheError::NonUniformSampling { min, max }) => {
                warn!(
                    "Sampling is not uniform (gaps from {} to {}); resampling to {}",
                    min, max, min
                );
                let resolution = min_resolution(frame.index()).unwrap_or(min);
                frame = resample(&frame, link_column, data_column, resolution, config.data_kind)?;
            }
            Err(e) => return Err(e),
        }
    }

    let frame = compute_link_bandwidth(&frame, link_column, data_column, config.data_kind)?;
    let frame = compute_link_utilization(&frame, link_column, speeds)?;
    let stats = compute_stats(
        &frame,
        link_column,
        UTILIZATION_COLUMN,
        window,
        config.min_periods,
    )?;
    let result = analyze_flatness(&stats, config)?;

    let intervals: usize = result.values().map(Vec::len).sum();
    info!(links = result.len(), intervals, "flatness_analysis_complete");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn ts(secs: i64) -> Timestamp {
        DateTime::from_timestamp(secs, 0).unwrap().fixed_offset()
    }

    fn stats_with(points: &[(i64, Option<(f64, f64, f64)>)]) -> LinkStats {
        let mut stats = LinkStats::default();
        for (t, values) in points {
            stats.index.push(ts(*t));
            stats.mean.push(values.map(|v| v.0));
            stats.min.push(values.map(|v| v.1));
            stats.max.push(values.map(|v| v.2));
        }
        stats
    }

    fn config(window_secs: u64) -> FlatnessConfig {
        FlatnessConfig::new()
            .with_window(Duration::from_secs(window_secs))
            .with_valid_range(0.0, 100.0)
            .with_flatness_limit(1.0)
    }

    #[test]
    fn test_adjacent_suspect_extends_interval() {
        let flat = Some((50.0, 49.8, 50.2));
        let busy = Some((50.0, 10.0, 90.0));
        let stats = stats_with(&[
            (50, busy),
            (60, busy),
            (70, busy),
            (80, busy),
            (90, busy),
            (100, flat),
            (110, busy),
            (120, flat),
        ]);

        let mut input = BTreeMap::new();
        input.insert("a".to_string(), stats);
        let result = analyze_flatness(&input, &config(50)).unwrap();

        assert_eq!(result["a"], vec![Interval::new(ts(50), ts(120))]);
    }

    #[test]
    fn test_merge_rejected_when_combined_range_too_wide() {
        let stats = stats_with(&[
            (0, Some((50.0, 49.9, 50.1))),
            (10, Some((50.0, 49.9, 50.1))),
            (20, Some((51.0, 50.8, 51.2))),
        ]);

        let mut input = BTreeMap::new();
        input.insert("a".to_string(), stats);
        let result = analyze_flatness(&input, &config(10)).unwrap();

        // [0,10] stands alone; [10,20] would widen the range to 1.3
        assert_eq!(
            result["a"],
            vec![Interval::new(ts(0), ts(10)), Interval::new(ts(10), ts(20))]
        );
    }

    #[test]
    fn test_window_beyond_time_range_finds_nothing() {
        let flat = Some((50.0, 49.9, 50.1));
        let stats = stats_with(&[(0, flat), (10, flat), (20, flat)]);

        let mut input = BTreeMap::new();
        input.insert("a".to_string(), stats);
        let result = analyze_flatness(&input, &config(365 * 86_400 * 1_000_000)).unwrap();

        assert!(result["a"].is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let input = BTreeMap::new();
        let bad = config(60).with_valid_range(10.0, 10.0);
        assert!(matches!(
            analyze_flatness(&input, &bad),
            Err(DfCacheError::InvalidConfiguration(_))
        ));

        let bad = config(0);
        assert!(matches!(
            analyze_flatness(&input, &bad),
            Err(DfCacheError::InvalidConfiguration(_))
        ));
    }
}

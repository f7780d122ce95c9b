//! Derived link metrics: bandwidth, utilization and rolling statistics.
//!
//! All stages take a long-format frame: one row per `(timestamp, link)` with
//! a text link column and numeric data columns.

use crate::frame::Frame;
use crate::{DfCacheError, Result, Timestamp};
use chrono::{DurationRound, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

pub const DEFAULT_LINK_COLUMN: &str = "link";
pub const BANDWIDTH_COLUMN: &str = "bps";
pub const UTILIZATION_COLUMN: &str = "utilization";

/// What the data column measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataKind {
    /// Byte counts accumulated over each sampling period.
    Bytes,
    /// Rates in bits per second.
    BitsPerSecond,
}

/// Source of installed link capacity.
pub trait LinkSpeedLookup {
    /// Returns capacity in bits/s for each link. Unknown links map to NaN.
    fn link_speeds(&self, links: &[String]) -> HashMap<String, f64>;
}

impl LinkSpeedLookup for HashMap<String, f64> {
    fn link_speeds(&self, links: &[String]) -> HashMap<String, f64> {
        links
            .iter()
            .map(|link| (link.clone(), self.get(link).copied().unwrap_or(f64::NAN)))
            .collect()
    }
}

impl LinkSpeedLookup for BTreeMap<String, f64> {
    fn link_speeds(&self, links: &[String]) -> HashMap<String, f64> {
        links
            .iter()
            .map(|link| (link.clone(), self.get(link).copied().unwrap_or(f64::NAN)))
            .collect()
    }
}

/// Builds the `"<device>:<interface>"` link identifier.
pub fn link_id(device: &str, interface: &str) -> String {
    format!("{device}:{interface}")
}

/// Adds a link column built from device and interface columns.
pub fn derive_link_column(
    frame: &Frame,
    device_column: &str,
    interface_column: &str,
    link_column: &str,
) -> Result<Frame> {
    let devices = frame.text_column(device_column)?;
    let interfaces = frame.text_column(interface_column)?;

    let links: Vec<String> = devices
        .iter()
        .zip(interfaces)
        .map(|(device, interface)| link_id(device, interface))
        .collect();

    frame.clone().with_column(link_column, links)
}

fn gaps(index: &[Timestamp]) -> Vec<TimeDelta> {
    let distinct: BTreeSet<Timestamp> = index.iter().copied().collect();
    let distinct: Vec<Timestamp> = distinct.into_iter().collect();
    distinct.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Smallest gap between distinct timestamps.
pub fn min_resolution(index: &[Timestamp]) -> Option<TimeDelta> {
    gaps(index).into_iter().min()
}

/// The sampling period of a uniformly sampled index.
///
/// Returns `None` with fewer than two distinct timestamps and
/// `NonUniformSampling` when gaps differ.
pub fn sampling_period(index: &[Timestamp]) -> Result<Option<TimeDelta>> {
    let gaps = gaps(index);
    let (Some(min), Some(max)) = (gaps.iter().min().copied(), gaps.iter().max().copied()) else {
        return Ok(None);
    };

    if min != max {
        return Err(DfCacheError::NonUniformSampling { min, max });
    }
    Ok(Some(min))
}

/// Resamples every link onto a uniform grid of `resolution`.
///
/// Byte counts are summed per bucket (empty buckets become 0); rates are
/// averaged (empty buckets become NaN). NaN samples are skipped. The output
/// holds only the link and data columns, ordered by time then link.
pub fn resample(
    frame: &Frame,
    link_column: &str,
    data_column: &str,
    resolution: TimeDelta,
    kind: DataKind,
) -> Result<Frame> {
    if resolution <= TimeDelta::zero() {
        return Err(DfCacheError::InvalidConfiguration(format!(
            "resample resolution {resolution} must be positive"
        )));
    }

    let links = frame.text_column(link_column)?;
    let values = frame.float_column(data_column)?;

    let mut buckets: BTreeMap<(Timestamp, &str), (f64, usize)> = BTreeMap::new();
    for ((t, link), v) in frame.index().iter().zip(links).zip(values) {
        let bucket = t.duration_trunc(resolution).map_err(|e| {
            DfCacheError::InvalidConfiguration(format!("cannot bucket {t} by {resolution}: {e}"))
        })?;
        let slot = buckets.entry((bucket, link.as_str())).or_insert((0.0, 0));
        if !v.is_nan() {
            slot.0 += v;
            slot.1 += 1;
        }
    }

    let (Some(first), Some(last)) = (
        buckets.keys().map(|(t, _)| *t).min(),
        buckets.keys().map(|(t, _)| *t).max(),
    ) else {
        return Frame::new(Vec::new())
            .with_index_name(frame.index_name())
            .with_column(link_column, Vec::<String>::new())?
            .with_column(data_column, Vec::<f64>::new());
    };
    let link_set: BTreeSet<&str> = buckets.keys().map(|(_, link)| *link).collect();

    let mut index = Vec::new();
    let mut out_links = Vec::new();
    let mut out_values = Vec::new();

    let mut t = first;
    while t <= last {
        for link in &link_set {
            let value = match (buckets.get(&(t, *link)), kind) {
                (Some((sum, n)), DataKind::Bytes) if *n > 0 => *sum,
                (Some((sum, n)), DataKind::BitsPerSecond) if *n > 0 => *sum / *n as f64,
                (Some(_), _) => f64::NAN,
                (None, DataKind::Bytes) => 0.0,
                (None, DataKind::BitsPerSecond) => f64::NAN,
            };
            index.push(t);
            out_links.push(link.to_string());
            out_values.push(value);
        }
        match t.checked_add_signed(resolution) {
            Some(next) => t = next,
            None => break,
        }
    }

    debug!(
        rows_in = frame.len(),
        rows_out = index.len(),
        links = link_set.len(),
        "resampled"
    );

    Frame::new(index)
        .with_index_name(frame.index_name())
        .with_column(link_column, out_links)?
        .with_column(data_column, out_values)
}

/// Adds a bits-per-second column.
///
/// Byte counts are converted with the sampling period inferred from the
/// index, which must be uniform; rates are copied unchanged.
pub fn compute_link_bandwidth(
    frame: &Frame,
    link_column: &str,
    data_column: &str,
    kind: DataKind,
) -> Result<Frame> {
    frame.text_column(link_column)?;
    let values = frame.float_column(data_column)?;

    let bps: Vec<f64> = match kind {
        DataKind::BitsPerSecond => values.to_vec(),
        DataKind::Bytes => {
            let period = match sampling_period(frame.index()) {
                Ok(Some(period)) => period,
                Ok(None) => {
                    return Err(DfCacheError::InvalidConfiguration(
                        "cannot infer a sampling period from fewer than two timestamps"
                            .to_string(),
                    ));
                }
                Err(e) => {
                    warn!("Byte counters are not uniformly sampled: {}", e);
                    return Err(e);
                }
            };

            let seconds = period.num_nanoseconds().unwrap_or(i64::MAX) as f64 / 1e9;
            values.iter().map(|v| v * 8.0 / seconds).collect()
        }
    };

    frame.clone().with_column(BANDWIDTH_COLUMN, bps)
}

/// Adds a utilization column: bandwidth as a percentage of installed capacity.
///
/// Links with unknown or non-positive capacity get NaN utilization.
pub fn compute_link_utilization(
    frame: &Frame,
    link_column: &str,
    speeds: &dyn LinkSpeedLookup,
) -> Result<Frame> {
    let links = frame.text_column(link_column)?;
    let bps = frame.float_column(BANDWIDTH_COLUMN)?;

    let distinct: Vec<String> = links
        .iter()
        .cloned()
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect();
    let speeds = speeds.link_speeds(&distinct);

    let mut usable: HashMap<&str, f64> = HashMap::with_capacity(distinct.len());
    for link in &distinct {
        match speeds.get(link).copied() {
            Some(speed) if speed.is_finite() && speed > 0.0 => {
                usable.insert(link.as_str(), speed);
            }
            speed => warn!(
                "Link {} has unknown or zero speed ({:?}); utilization is undefined",
                link, speed
            ),
        }
    }

    let mut over: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    let utilization: Vec<f64> = links
        .iter()
        .zip(bps)
        .map(|(link, v)| match usable.get(link.as_str()) {
            Some(speed) => {
                let u = v * 100.0 / speed;
                if u > 100.0 {
                    let slot = over.entry(link.as_str()).or_insert((0, u));
                    slot.0 += 1;
                    slot.1 = slot.1.max(u);
                }
                u
            }
            None => f64::NAN,
        })
        .collect();

    for (link, (samples, peak)) in over {
        warn!(link, samples, peak, "utilization above 100%");
    }

    frame.clone().with_column(UTILIZATION_COLUMN, utilization)
}

/// Rolling statistics for one link.
///
/// Entry `i` covers the samples in `(index[i] - window, index[i]]`; it is
/// `None` when that window holds fewer than the minimum number of samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkStats {
    pub index: Vec<Timestamp>,
    pub mean: Vec<Option<f64>>,
    pub min: Vec<Option<f64>>,
    pub max: Vec<Option<f64>>,
}

impl LinkStats {
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// `max - min` at entry `i`.
    pub fn range(&self, i: usize) -> Option<f64> {
        Some(self.max.get(i).copied().flatten()? - self.min.get(i).copied().flatten()?)
    }

    fn push(&mut self, t: Timestamp, window: &[f64], min_periods: usize) {
        self.index.push(t);
        if window.len() < min_periods || window.is_empty() {
            self.mean.push(None);
            self.min.push(None);
            self.max.push(None);
            return;
        }

        let sum: f64 = window.iter().sum();
        self.mean.push(Some(sum / window.len() as f64));
        self.min.push(window.iter().copied().reduce(f64::min));
        self.max.push(window.iter().copied().reduce(f64::max));
    }
}

/// Computes per-link rolling mean, min and max of `value_column`.
///
/// NaN samples do not count towards `min_periods`.
pub fn compute_stats(
    frame: &Frame,
    link_column: &str,
    value_column: &str,
    window: TimeDelta,
    min_periods: usize,
) -> Result<BTreeMap<String, LinkStats>> {
    if window <= TimeDelta::zero() {
        return Err(DfCacheError::InvalidConfiguration(format!(
            "rolling window {window} must be positive"
        )));
    }

    let links = frame.text_column(link_column)?;
    let values = frame.float_column(value_column)?;
    let index = frame.index();

    let mut rows_by_link: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (row, link) in links.iter().enumerate() {
        rows_by_link.entry(link.as_str()).or_default().push(row);
    }

    let mut out = BTreeMap::new();
    for (link, mut rows) in rows_by_link {
        rows.sort_by_key(|&r| index[r]);

        let mut stats = LinkStats::default();
        let mut left = 0;
        let mut window_values = Vec::new();

        for (i, &row) in rows.iter().enumerate() {
            let t = index[row];
            // Without a representable lower bound every earlier row is in the window.
            if let Some(lower) = t.checked_sub_signed(window) {
                while index[rows[left]] <= lower {
                    left += 1;
                }
            }

            window_values.clear();
            window_values.extend(
                rows[left..=i]
                    .iter()
                    .map(|&r| values[r])
                    .filter(|v| !v.is_nan()),
            );
            stats.push(t, &window_values, min_periods);
        }

        out.insert(link.to_string(), stats);
    }

    debug!(links = out.len(), rows = frame.len(), "rolling_stats_computed");
    Ok(out)
}

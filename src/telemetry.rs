// src/telemetry.rs - Telemetry series, frame alignment and the data source seam
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};

use crate::alarms::{AlarmBase, AlarmPriorityMatrix};
use crate::value::Value;

/// Identifier of a telemetry channel, unique per device
pub type Tag = String;

/// Frame timestamp
pub type Timestamp = DateTime<Utc>;

/// Convert fractional seconds from configuration into a chrono duration
pub(crate) fn seconds(secs: f64) -> Duration {
    Duration::microseconds((secs * 1_000_000.0).round() as i64)
}

/// Time-ordered readings of a single tag
///
/// A `None` reading means the tag had no value in that frame, which is
/// distinct from a reading of zero or `false`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySeries {
    points: Vec<(Timestamp, Option<Value>)>,
}

impl TelemetrySeries {
    /// Build a series, sorting points by time
    pub fn new(mut points: Vec<(Timestamp, Option<Value>)>) -> Self {
        points.sort_by_key(|(time, _)| *time);
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[(Timestamp, Option<Value>)] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Timestamp, Option<Value>)> {
        self.points.iter()
    }

    /// Timestamp of the newest point
    pub fn last_time(&self) -> Option<Timestamp> {
        self.points.last().map(|(time, _)| *time)
    }
}

impl FromIterator<(Timestamp, Option<Value>)> for TelemetrySeries {
    fn from_iter<I: IntoIterator<Item = (Timestamp, Option<Value>)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Narrow view of the stored telemetry and device configuration
///
/// Parsing, storage and presentation live behind this trait; the alarm
/// core only reads through it.
#[cfg_attr(test, mockall::automock)]
pub trait DataSource: Send + Sync {
    /// Readings for `tag` within `[start, end]`, ascending by time
    fn get_series(&self, tag: &str, start: Option<Timestamp>, end: Option<Timestamp>) -> TelemetrySeries;

    /// Every tag known for the device
    fn all_tags(&self) -> BTreeSet<Tag>;

    /// Configured alarm bases
    fn alarm_bases(&self) -> Vec<AlarmBase>;

    /// Priority escalation matrix
    fn priority_matrix(&self) -> AlarmPriorityMatrix;

    /// Time of the newest stored frame, if any
    fn newest_frame_time(&self) -> Option<Timestamp>;
}

/// Frame-aligned telemetry for a set of tags
///
/// Frames are the union of every timestamp seen across the loaded tags, so
/// evaluators for different tags share one index space. A tag without a
/// reading at a frame holds `None` there.
#[derive(Debug, Clone, Default)]
pub struct TelemetryWindow {
    times: Vec<Timestamp>,
    columns: HashMap<Tag, Vec<Option<Value>>>,
    blank: Vec<Option<Value>>,
}

impl TelemetryWindow {
    /// Load `tags` from `source`, starting at `start` (inclusive)
    pub fn load<'a, I>(source: &dyn DataSource, tags: I, start: Option<Timestamp>) -> Self
    where
        I: IntoIterator<Item = &'a Tag>,
    {
        Self::from_series(
            tags.into_iter()
                .map(|tag| (tag.clone(), source.get_series(tag, start, None))),
        )
    }

    /// Align already fetched series
    pub fn from_series<I>(series: I) -> Self
    where
        I: IntoIterator<Item = (Tag, TelemetrySeries)>,
    {
        let series: Vec<(Tag, TelemetrySeries)> = series.into_iter().collect();

        let times: Vec<Timestamp> = series
            .iter()
            .flat_map(|(_, s)| s.iter().map(|(time, _)| *time))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut columns = HashMap::with_capacity(series.len());
        for (tag, s) in series {
            let mut column = vec![None; times.len()];
            for (time, value) in s.iter() {
                if let Ok(index) = times.binary_search(time) {
                    column[index] = *value;
                }
            }
            columns.insert(tag, column);
        }

        let blank = vec![None; times.len()];
        Self { times, columns, blank }
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[Timestamp] {
        &self.times
    }

    pub fn time(&self, index: usize) -> Option<Timestamp> {
        self.times.get(index).copied()
    }

    /// Per-frame readings of `tag`; all `None` when the tag was not loaded
    pub fn column(&self, tag: &str) -> &[Option<Value>] {
        self.columns.get(tag).map(Vec::as_slice).unwrap_or(&self.blank)
    }
}

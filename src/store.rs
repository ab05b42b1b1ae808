// src/store.rs - In-memory telemetry store
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info};

use crate::alarms::{AlarmBase, AlarmPriorityMatrix};
use crate::config::Config;
use crate::error::Result;
use crate::telemetry::{DataSource, Tag, TelemetrySeries, Timestamp};
use crate::value::Value;

/// Concurrent telemetry store backing [`DataSource`]
///
/// Readings are kept sorted per tag; ingesting a reading at an existing
/// timestamp replaces it.
///
/// # Examples
///
/// ```rust
/// use chrono::Utc;
/// use vigil::{DataSource, TelemetryStore, Value};
///
/// let store = TelemetryStore::new("DEVICE_A");
/// let now = Utc::now();
/// store.ingest("A3", now, Some(Value::Float(21.5)));
///
/// assert_eq!(store.get_series("A3", None, None).len(), 1);
/// assert_eq!(store.newest_frame_time(), Some(now));
/// ```
#[derive(Debug)]
pub struct TelemetryStore {
    device: String,
    series: DashMap<Tag, Vec<(Timestamp, Option<Value>)>>,
    alarm_bases: RwLock<Vec<AlarmBase>>,
    matrix: RwLock<AlarmPriorityMatrix>,
}

/// JSON snapshot layout: tag to `[timestamp, reading]` pairs
type Snapshot = HashMap<Tag, Vec<(Timestamp, Option<Value>)>>;

impl TelemetryStore {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            series: DashMap::new(),
            alarm_bases: RwLock::new(Vec::new()),
            matrix: RwLock::new(AlarmPriorityMatrix::reference()),
        }
    }

    /// Store configured with the device's alarm bases and priority matrix
    pub fn with_config(config: &Config) -> Self {
        let store = Self::new(config.device.clone());
        store.set_alarm_bases(config.alarms.clone());
        store.set_priority_matrix(config.priority_matrix.clone());
        store
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn set_alarm_bases(&self, alarm_bases: Vec<AlarmBase>) {
        *self.alarm_bases.write() = alarm_bases;
    }

    pub fn set_priority_matrix(&self, matrix: AlarmPriorityMatrix) {
        *self.matrix.write() = matrix;
    }

    /// Record one reading; `None` marks a frame without a value
    pub fn ingest(&self, tag: &str, time: Timestamp, value: Option<Value>) {
        let mut points = self.series.entry(tag.to_string()).or_default();
        match points.binary_search_by_key(&time, |(t, _)| *t) {
            Ok(index) => points[index].1 = value,
            Err(index) => points.insert(index, (time, value)),
        }
    }

    /// Record many readings of one tag
    pub fn ingest_series<I>(&self, tag: &str, points: I) -> usize
    where
        I: IntoIterator<Item = (Timestamp, Option<Value>)>,
    {
        let mut count = 0;
        for (time, value) in points {
            self.ingest(tag, time, value);
            count += 1;
        }
        count
    }

    /// Ingest a JSON snapshot such as `{"A3": [["2024-01-01T00:00:00Z", 1.5], ...]}`
    pub fn load_json(&self, json: &str) -> Result<usize> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        let mut count = 0;
        for (tag, points) in snapshot {
            count += self.ingest_series(&tag, points);
        }
        debug!("Ingested {} reading(s) into '{}'", count, self.device);
        Ok(count)
    }

    /// Ingest a JSON snapshot file
    pub fn load_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let count = self.load_json(&json)?;
        info!("Loaded {} reading(s) from {}", count, path.as_ref().display());
        Ok(count)
    }

    /// Total stored readings across all tags
    pub fn reading_count(&self) -> usize {
        self.series.iter().map(|entry| entry.value().len()).sum()
    }
}

impl DataSource for TelemetryStore {
    fn get_series(&self, tag: &str, start: Option<Timestamp>, end: Option<Timestamp>) -> TelemetrySeries {
        let Some(points) = self.series.get(tag) else {
            return TelemetrySeries::default();
        };
        let from = start.map_or(0, |start| points.partition_point(|(t, _)| *t < start));
        let to = end.map_or(points.len(), |end| points.partition_point(|(t, _)| *t <= end));
        TelemetrySeries::new(points[from..to.max(from)].to_vec())
    }

    fn all_tags(&self) -> BTreeSet<Tag> {
        self.series.iter().map(|entry| entry.key().clone()).collect()
    }

    fn alarm_bases(&self) -> Vec<AlarmBase> {
        self.alarm_bases.read().clone()
    }

    fn priority_matrix(&self) -> AlarmPriorityMatrix {
        self.matrix.read().clone()
    }

    fn newest_frame_time(&self) -> Option<Timestamp> {
        self.series
            .iter()
            .filter_map(|entry| entry.value().last().map(|(time, _)| *time))
            .max()
    }
}

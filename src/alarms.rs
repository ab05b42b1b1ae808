// File: src/alarms.rs
// Event and alarm data model for vigil
//
// Event bases describe the conditions to detect, alarm bases pair them with a
// criticality, and confirmed detections become events wrapped in alarms whose
// priority escalates over time according to the priority matrix.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, VigilError};
use crate::telemetry::{Tag, Timestamp};
use crate::value::Value;

// ==========================================
// SECTION 1: CRITICALITY AND PRIORITY
// ==========================================

/// Intrinsic severity of an alarm's defining condition
///
/// Totally ordered: `Warning < Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmCriticality {
    /// Operator awareness only
    Warning,
    /// Low urgency
    Low,
    /// Operator action required
    Medium,
    /// Prompt operator action required
    High,
    /// Immediate operator action required
    Critical,
}

/// Displayed urgency; shares the criticality scale
pub type AlarmPriority = AlarmCriticality;

impl AlarmCriticality {
    /// Every level, ascending
    pub const ALL: [AlarmCriticality; 5] = [
        AlarmCriticality::Warning,
        AlarmCriticality::Low,
        AlarmCriticality::Medium,
        AlarmCriticality::High,
        AlarmCriticality::Critical,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AlarmCriticality::Warning => "WARNING",
            AlarmCriticality::Low => "LOW",
            AlarmCriticality::Medium => "MEDIUM",
            AlarmCriticality::High => "HIGH",
            AlarmCriticality::Critical => "CRITICAL",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for AlarmCriticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ==========================================
// SECTION 2: EVENT BASES
// ==========================================

/// Longest persistence, rate window or sequence interval accepted, in seconds (100 years)
pub const MAX_DURATION_SECONDS: f64 = 100.0 * 365.25 * 86_400.0;

fn duration_in_range(secs: f64) -> bool {
    secs.is_finite() && (0.0..=MAX_DURATION_SECONDS).contains(&secs)
}

/// Allowed delay between two consecutive confirmations in a sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, Option<f64>)", into = "(f64, Option<f64>)")]
pub struct SequenceInterval {
    /// Minimum seconds after the previous confirmation
    pub min_seconds: f64,
    /// Maximum seconds after the previous confirmation; unbounded if `None`
    pub max_seconds: Option<f64>,
}

impl From<(f64, Option<f64>)> for SequenceInterval {
    fn from((min_seconds, max_seconds): (f64, Option<f64>)) -> Self {
        Self { min_seconds, max_seconds }
    }
}

impl From<SequenceInterval> for (f64, Option<f64>) {
    fn from(interval: SequenceInterval) -> Self {
        (interval.min_seconds, interval.max_seconds)
    }
}

/// A condition to detect in telemetry
///
/// Configured as a flat mapping: `type` selects the condition, the shared
/// `persistence` and `description` keys sit next to the condition's own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBase {
    /// Seconds the condition must hold before confirmation; `None` confirms immediately
    #[serde(default)]
    pub persistence: Option<f64>,

    /// Human-readable description
    pub description: String,

    /// What to detect
    #[serde(flatten)]
    pub condition: EventCondition,
}

/// Event base variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventCondition {
    /// Rate of change over `time_window` seconds rises above / falls below a threshold
    RateOfChange {
        tag: Tag,
        #[serde(default)]
        rate_of_fall_threshold: Option<f64>,
        #[serde(default)]
        rate_of_rise_threshold: Option<f64>,
        time_window: f64,
    },

    /// Reading unchanged from the previous frame
    Static { tag: Tag },

    /// Reading below `lower_threshold` or above `upper_threshold`
    Threshold {
        tag: Tag,
        #[serde(default)]
        lower_threshold: Option<f64>,
        #[serde(default)]
        upper_threshold: Option<f64>,
    },

    /// Reading exactly equal to `setpoint`
    Setpoint { tag: Tag, setpoint: Value },

    /// Children confirmed in order, each within its interval of the previous
    SequenceOfEvents {
        #[serde(rename = "events")]
        event_bases: Vec<EventBase>,
        intervals: Vec<SequenceInterval>,
    },

    /// Every child active in the same frame
    #[serde(rename = "logical_and")]
    All {
        #[serde(rename = "events")]
        event_bases: Vec<EventBase>,
    },

    /// Any child active in the frame
    #[serde(rename = "logical_or")]
    Any {
        #[serde(rename = "events")]
        event_bases: Vec<EventBase>,
    },
}

impl EventBase {
    pub fn new(condition: EventCondition, persistence: Option<f64>, description: impl Into<String>) -> Self {
        Self {
            persistence,
            description: description.into(),
            condition,
        }
    }

    /// Required persistence in seconds, zero when unset
    pub fn persistence_secs(&self) -> f64 {
        self.persistence.unwrap_or(0.0)
    }

    /// Display name of the variant
    pub fn kind(&self) -> &'static str {
        match &self.condition {
            EventCondition::RateOfChange { .. } => "Rate of change",
            EventCondition::Static { .. } => "Static",
            EventCondition::Threshold { .. } => "Threshold",
            EventCondition::Setpoint { .. } => "Setpoint",
            EventCondition::SequenceOfEvents { .. } => "SOE",
            EventCondition::All { .. } => "Logical AND",
            EventCondition::Any { .. } => "Logical OR",
        }
    }

    /// Child event bases of composite variants
    pub fn children(&self) -> &[EventBase] {
        match &self.condition {
            EventCondition::SequenceOfEvents { event_bases, .. }
            | EventCondition::All { event_bases }
            | EventCondition::Any { event_bases } => event_bases,
            _ => &[],
        }
    }

    /// Every tag referenced anywhere in this event base
    pub fn tags(&self) -> BTreeSet<Tag> {
        let mut tags = BTreeSet::new();
        self.collect_tags(&mut tags);
        tags
    }

    fn collect_tags(&self, tags: &mut BTreeSet<Tag>) {
        match &self.condition {
            EventCondition::RateOfChange { tag, .. }
            | EventCondition::Static { tag }
            | EventCondition::Threshold { tag, .. }
            | EventCondition::Setpoint { tag, .. } => {
                tags.insert(tag.clone());
            }
            _ => {
                for child in self.children() {
                    child.collect_tags(tags);
                }
            }
        }
    }

    /// Check that this event base can be evaluated
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(VigilError::invalid(&self.description, reason));

        if let Some(persistence) = self.persistence {
            if !duration_in_range(persistence) {
                return fail(format!(
                    "persistence must be between 0 and {} seconds, got {}",
                    MAX_DURATION_SECONDS, persistence
                ));
            }
        }

        match &self.condition {
            EventCondition::RateOfChange {
                rate_of_fall_threshold,
                rate_of_rise_threshold,
                time_window,
                ..
            } => {
                if rate_of_fall_threshold.is_none() && rate_of_rise_threshold.is_none() {
                    return fail("rate of change needs a rise or fall threshold".to_string());
                }
                if !duration_in_range(*time_window) || *time_window == 0.0 {
                    return fail(format!(
                        "time_window must be positive and at most {} seconds, got {}",
                        MAX_DURATION_SECONDS, time_window
                    ));
                }
            }
            EventCondition::Threshold {
                lower_threshold,
                upper_threshold,
                ..
            } => {
                if lower_threshold.is_none() && upper_threshold.is_none() {
                    return fail("threshold needs a lower or upper bound".to_string());
                }
            }
            EventCondition::Static { .. } | EventCondition::Setpoint { .. } => {}
            EventCondition::SequenceOfEvents { event_bases, intervals } => {
                if event_bases.is_empty() {
                    return fail("sequence has no events".to_string());
                }
                if intervals.len() + 1 != event_bases.len() {
                    return fail(format!(
                        "sequence of {} events needs {} intervals, got {}",
                        event_bases.len(),
                        event_bases.len() - 1,
                        intervals.len()
                    ));
                }
                for interval in intervals {
                    let bad_max = interval
                        .max_seconds
                        .map_or(false, |max| !duration_in_range(max) || max < interval.min_seconds);
                    if !duration_in_range(interval.min_seconds) || bad_max {
                        return fail(format!(
                            "invalid interval ({}, {:?})",
                            interval.min_seconds, interval.max_seconds
                        ));
                    }
                }
            }
            EventCondition::All { event_bases } | EventCondition::Any { event_bases } => {
                if event_bases.is_empty() {
                    return fail(format!("{} has no events", self.kind()));
                }
            }
        }

        self.children().iter().try_for_each(EventBase::validate)
    }
}

/// An event base paired with the criticality of its alarms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmBase {
    pub criticality: AlarmCriticality,
    pub event: EventBase,
}

// ==========================================
// SECTION 3: EVENTS AND ALARMS
// ==========================================

/// Unique, monotonically increasing event identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A confirmed detection of an event base
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub base: Arc<EventBase>,
    pub id: EventId,
    /// First frame of the continuous run that led to confirmation
    pub register_time: Timestamp,
    /// First frame where persistence was satisfied
    pub confirm_time: Timestamp,
    /// Escalation epoch
    pub creation_time: Timestamp,
    pub description: String,
}

impl Event {
    /// General type of the underlying event base
    pub fn kind(&self) -> &'static str {
        self.base.kind()
    }
}

/// A live alarm held by the registry
///
/// Alarms are identified by their event id.
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub event: Event,
    pub criticality: AlarmCriticality,
    pub priority: AlarmPriority,
    /// Set once by the operator, never cleared
    pub acknowledged: bool,
}

impl Alarm {
    pub fn new(event: Event, criticality: AlarmCriticality) -> Self {
        Self {
            event,
            criticality,
            priority: criticality,
            acknowledged: false,
        }
    }

    pub fn id(&self) -> EventId {
        self.event.id
    }
}

// ==========================================
// SECTION 4: PRIORITY MATRIX
// ==========================================

/// Elapsed-time checkpoint to criticality-to-priority mapping
///
/// Checkpoints ascend strictly from zero and every checkpoint maps every
/// criticality, so lookups never fail once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PriorityMatrixRow>", into = "Vec<PriorityMatrixRow>")]
pub struct AlarmPriorityMatrix {
    checkpoints: Vec<Duration>,
    priorities: Vec<[AlarmPriority; 5]>,
}

/// Serialized form of one matrix checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityMatrixRow {
    pub after_minutes: u32,
    pub priorities: BTreeMap<AlarmCriticality, AlarmPriority>,
}

impl AlarmPriorityMatrix {
    /// Build from `(checkpoint, mapping)` rows in any order
    pub fn new(mut rows: Vec<(Duration, BTreeMap<AlarmCriticality, AlarmPriority>)>) -> Result<Self> {
        rows.sort_by_key(|(checkpoint, _)| *checkpoint);

        match rows.first() {
            Some((first, _)) if first.is_zero() => {}
            _ => {
                return Err(VigilError::Config(
                    "priority matrix must contain a zero-minute checkpoint".to_string(),
                ))
            }
        }

        let mut checkpoints = Vec::with_capacity(rows.len());
        let mut priorities = Vec::with_capacity(rows.len());
        for (checkpoint, mapping) in rows {
            if checkpoints.last() == Some(&checkpoint) {
                return Err(VigilError::Config(format!(
                    "duplicate priority matrix checkpoint at {} minutes",
                    checkpoint.num_minutes()
                )));
            }
            let mut row = [AlarmPriority::Warning; 5];
            for criticality in AlarmCriticality::ALL {
                row[criticality.index()] = *mapping.get(&criticality).ok_or_else(|| {
                    VigilError::Config(format!(
                        "priority matrix checkpoint at {} minutes is missing {}",
                        checkpoint.num_minutes(),
                        criticality
                    ))
                })?;
            }
            checkpoints.push(checkpoint);
            priorities.push(row);
        }

        Ok(Self { checkpoints, priorities })
    }

    /// The 0/5/15/30 minute matrix used by default
    pub fn reference() -> Self {
        use AlarmCriticality::*;
        let row = |w, l, m, h, c| [w, l, m, h, c];
        Self {
            checkpoints: vec![
                Duration::minutes(0),
                Duration::minutes(5),
                Duration::minutes(15),
                Duration::minutes(30),
            ],
            priorities: vec![
                row(Warning, Low, Low, Medium, Critical),
                row(Warning, Low, Medium, High, Critical),
                row(Warning, Low, Medium, High, Critical),
                row(Warning, Medium, High, Critical, Critical),
            ],
        }
    }

    /// Ascending checkpoints, starting at zero
    pub fn checkpoints(&self) -> &[Duration] {
        &self.checkpoints
    }

    /// Index of the latest checkpoint not after `elapsed`
    ///
    /// Negative elapsed time (alarm from the future) maps to the zero checkpoint.
    pub fn checkpoint_index(&self, elapsed: Duration) -> usize {
        self.checkpoints
            .partition_point(|checkpoint| *checkpoint <= elapsed)
            .saturating_sub(1)
    }

    /// Priority at checkpoint `index` (clamped to the last checkpoint)
    pub fn priority_at(&self, index: usize, criticality: AlarmCriticality) -> AlarmPriority {
        let index = index.min(self.priorities.len() - 1);
        self.priorities[index][criticality.index()]
    }

    /// Priority for an alarm that has been active for `elapsed`
    pub fn priority_for(&self, elapsed: Duration, criticality: AlarmCriticality) -> AlarmPriority {
        self.priority_at(self.checkpoint_index(elapsed), criticality)
    }
}

impl Default for AlarmPriorityMatrix {
    fn default() -> Self {
        Self::reference()
    }
}

impl TryFrom<Vec<PriorityMatrixRow>> for AlarmPriorityMatrix {
    type Error = VigilError;

    fn try_from(rows: Vec<PriorityMatrixRow>) -> Result<Self> {
        Self::new(
            rows.into_iter()
                .map(|row| (Duration::minutes(i64::from(row.after_minutes)), row.priorities))
                .collect(),
        )
    }
}

impl From<AlarmPriorityMatrix> for Vec<PriorityMatrixRow> {
    fn from(matrix: AlarmPriorityMatrix) -> Self {
        matrix
            .checkpoints
            .iter()
            .zip(matrix.priorities.iter())
            .map(|(checkpoint, row)| PriorityMatrixRow {
                after_minutes: checkpoint.num_minutes() as u32,
                priorities: AlarmCriticality::ALL
                    .iter()
                    .map(|criticality| (*criticality, row[criticality.index()]))
                    .collect(),
            })
            .collect()
    }
}

// ==========================================
// SECTION 5: TESTS
// ==========================================

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold(tag: &str) -> EventBase {
        EventBase::new(
            EventCondition::Threshold {
                tag: tag.to_string(),
                lower_threshold: Some(0.0),
                upper_threshold: None,
            },
            None,
            format!("{} low", tag),
        )
    }

    #[test]
    fn test_criticality_ordering() {
        assert!(AlarmCriticality::Warning < AlarmCriticality::Low);
        assert!(AlarmCriticality::Low < AlarmCriticality::Medium);
        assert!(AlarmCriticality::Medium < AlarmCriticality::High);
        assert!(AlarmCriticality::High < AlarmCriticality::Critical);
        assert_eq!(AlarmCriticality::Critical.to_string(), "CRITICAL");
    }

    #[test]
    fn test_event_base_from_yaml() {
        let yaml = r#"
type: sequence_of_events
description: "pump start sequence"
persistence: 5
events:
  - type: setpoint
    tag: "VALVE"
    setpoint: true
    description: "valve open"
  - type: threshold
    tag: "FLOW"
    upper_threshold: 10
    description: "flow high"
intervals:
  - [0, 60]
"#;
        let base: EventBase = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(base.persistence, Some(5.0));
        assert_eq!(base.kind(), "SOE");
        assert_eq!(base.children().len(), 2);
        assert_eq!(
            base.tags().into_iter().collect::<Vec<_>>(),
            vec!["FLOW".to_string(), "VALVE".to_string()]
        );
        match &base.condition {
            EventCondition::SequenceOfEvents { intervals, .. } => {
                assert_eq!(intervals[0], SequenceInterval { min_seconds: 0.0, max_seconds: Some(60.0) });
            }
            other => panic!("unexpected condition {:?}", other),
        }
        assert!(base.validate().is_ok());
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let yaml = "type: xor\ndescription: nope\nevents: []\n";
        assert!(serde_yaml::from_str::<EventBase>(yaml).is_err());
    }

    #[test]
    fn test_validate_rejects_malformed_bases() {
        let no_bounds = EventBase::new(
            EventCondition::Threshold {
                tag: "A".to_string(),
                lower_threshold: None,
                upper_threshold: None,
            },
            None,
            "no bounds",
        );
        assert!(matches!(
            no_bounds.validate(),
            Err(VigilError::InvalidEventBase { ref description, .. }) if description == "no bounds"
        ));

        let bad_sequence = EventBase::new(
            EventCondition::SequenceOfEvents {
                event_bases: vec![threshold("A"), threshold("B")],
                intervals: vec![],
            },
            None,
            "bad sequence",
        );
        assert!(bad_sequence.validate().is_err());

        let empty_any = EventBase::new(EventCondition::Any { event_bases: vec![] }, None, "empty");
        assert!(empty_any.validate().is_err());

        let negative = EventBase::new(EventCondition::Static { tag: "A".to_string() }, Some(-1.0), "neg");
        assert!(negative.validate().is_err());

        let endless = EventBase::new(
            EventCondition::RateOfChange {
                tag: "A".to_string(),
                rate_of_fall_threshold: None,
                rate_of_rise_threshold: Some(1.0),
                time_window: 1.0e13,
            },
            None,
            "endless window",
        );
        assert!(endless.validate().is_err());

        let far_interval = EventBase::new(
            EventCondition::SequenceOfEvents {
                event_bases: vec![threshold("A"), threshold("B")],
                intervals: vec![SequenceInterval { min_seconds: 0.0, max_seconds: Some(1.0e12) }],
            },
            None,
            "far interval",
        );
        assert!(far_interval.validate().is_err());

        let long_hold = EventBase::new(
            EventCondition::Static { tag: "A".to_string() },
            Some(MAX_DURATION_SECONDS + 1.0),
            "long hold",
        );
        assert!(long_hold.validate().is_err());

        let nested_bad = EventBase::new(
            EventCondition::All { event_bases: vec![threshold("A"), no_bounds] },
            None,
            "nested",
        );
        assert!(nested_bad.validate().is_err());
    }

    #[test]
    fn test_reference_matrix_lookups() {
        let matrix = AlarmPriorityMatrix::reference();
        use AlarmCriticality::*;

        assert_eq!(matrix.priority_for(Duration::zero(), High), Medium);
        assert_eq!(matrix.priority_for(Duration::minutes(4), Medium), Low);
        assert_eq!(matrix.priority_for(Duration::minutes(5), High), High);
        assert_eq!(matrix.priority_for(Duration::minutes(29), Low), Low);
        assert_eq!(matrix.priority_for(Duration::minutes(30), Low), Medium);
        assert_eq!(matrix.priority_for(Duration::hours(5), High), Critical);
        assert_eq!(matrix.priority_for(Duration::minutes(-3), High), Medium);
        assert_eq!(matrix.checkpoint_index(Duration::minutes(16)), 2);
    }

    #[test]
    fn test_matrix_validation() {
        let full: BTreeMap<_, _> = AlarmCriticality::ALL.iter().map(|c| (*c, *c)).collect();

        assert!(AlarmPriorityMatrix::new(vec![(Duration::minutes(5), full.clone())]).is_err());

        let mut partial = full.clone();
        partial.remove(&AlarmCriticality::Low);
        assert!(AlarmPriorityMatrix::new(vec![(Duration::zero(), partial)]).is_err());

        let duplicate = vec![(Duration::zero(), full.clone()), (Duration::zero(), full.clone())];
        assert!(AlarmPriorityMatrix::new(duplicate).is_err());

        let matrix = AlarmPriorityMatrix::new(vec![
            (Duration::minutes(10), full.clone()),
            (Duration::zero(), full),
        ])
        .unwrap();
        assert_eq!(matrix.checkpoints(), &[Duration::zero(), Duration::minutes(10)]);
    }

    #[test]
    fn test_matrix_yaml_round_trip_keeps_reference() {
        let yaml = serde_yaml::to_string(&AlarmPriorityMatrix::reference()).unwrap();
        let parsed: AlarmPriorityMatrix = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, AlarmPriorityMatrix::reference());
    }
}

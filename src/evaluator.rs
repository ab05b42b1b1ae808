// src/evaluator.rs - Event base dispatch and composite combinators
//
// Leaf event bases run a condition evaluator and the persistence scanner;
// `All`/`Any` combine their children's active frames and scan the result with
// their own persistence; sequences chain their children's confirmations
// through the configured intervals.
use chrono::Duration;
use tracing::trace;

use crate::alarms::{EventBase, EventCondition, SequenceInterval};
use crate::conditions::{self, Conditions};
use crate::error::{Result, VigilError};
use crate::persistence::{find_alarm_indexes, persistence_check};
use crate::telemetry::{seconds, TelemetryWindow, Timestamp};
use crate::value::Value;

/// A confirmed detection, as frame indices into the evaluated window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub register_index: usize,
    pub confirm_index: usize,
}

/// Result of evaluating one event base over a window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Per-frame "alarm active" flags
    pub active: Vec<bool>,
    /// Confirmed occurrences, ascending by register frame
    pub occurrences: Vec<Occurrence>,
}

/// Evaluates event bases over one frame-aligned telemetry window
pub struct EventEvaluator<'w> {
    window: &'w TelemetryWindow,
}

impl<'w> EventEvaluator<'w> {
    pub fn new(window: &'w TelemetryWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &TelemetryWindow {
        self.window
    }

    /// Evaluate `base` and every child it composes
    pub fn evaluate(&self, base: &EventBase) -> Result<Evaluation> {
        let evaluation = match &base.condition {
            EventCondition::SequenceOfEvents { event_bases, intervals } => {
                self.sequence(base, event_bases, intervals)?
            }
            _ => {
                let conditions = self.conditions(base)?;
                let occurrences: Vec<Occurrence> =
                    persistence_check(&conditions.frames, base.persistence_secs(), &conditions.false_indexes)
                        .into_iter()
                        .map(|(register_index, confirm_index)| Occurrence {
                            register_index,
                            confirm_index,
                        })
                        .collect();
                let registers: Vec<usize> = occurrences.iter().map(|o| o.register_index).collect();
                Evaluation {
                    active: find_alarm_indexes(&registers, &conditions.frames),
                    occurrences,
                }
            }
        };

        trace!(
            "Evaluated {} '{}': {} occurrence(s) over {} frame(s)",
            base.kind(),
            base.description,
            evaluation.occurrences.len(),
            self.window.len()
        );
        Ok(evaluation)
    }

    /// Per-frame condition flags of a leaf or frame-aligned composite
    fn conditions(&self, base: &EventBase) -> Result<Conditions> {
        let times = self.window.times();
        match &base.condition {
            EventCondition::Threshold {
                tag,
                lower_threshold,
                upper_threshold,
            } => {
                let readings = self.numeric_column(base, tag)?;
                Ok(conditions::threshold(times, readings, *lower_threshold, *upper_threshold))
            }
            EventCondition::Setpoint { tag, setpoint } => {
                Ok(conditions::setpoint(times, self.window.column(tag), setpoint))
            }
            EventCondition::Static { tag } => Ok(conditions::static_value(times, self.window.column(tag))),
            EventCondition::RateOfChange {
                tag,
                rate_of_fall_threshold,
                rate_of_rise_threshold,
                time_window,
            } => {
                let readings = self.numeric_column(base, tag)?;
                Ok(conditions::rate_of_change(
                    times,
                    readings,
                    *rate_of_fall_threshold,
                    *rate_of_rise_threshold,
                    seconds(*time_window),
                ))
            }
            EventCondition::All { event_bases } => self.combine(base, event_bases, |a, b| a && b, true),
            EventCondition::Any { event_bases } => self.combine(base, event_bases, |a, b| a || b, false),
            EventCondition::SequenceOfEvents { event_bases, intervals } => {
                let evaluation = self.sequence(base, event_bases, intervals)?;
                Ok(Conditions::from_flags(times, evaluation.active))
            }
        }
    }

    /// Readings of a tag compared numerically; boolean channels are rejected
    fn numeric_column(&self, base: &EventBase, tag: &str) -> Result<&'w [Option<Value>]> {
        let readings = self.window.column(tag);
        if let Some(value) = readings.iter().flatten().find(|value| value.to_numeric().is_err()) {
            return Err(VigilError::invalid(
                &base.description,
                format!(
                    "{} condition needs numeric readings but tag '{}' holds {}",
                    base.kind(),
                    tag,
                    value.type_name()
                ),
            ));
        }
        Ok(readings)
    }

    /// Frame-wise fold of the children's active flags
    fn combine(
        &self,
        base: &EventBase,
        children: &[EventBase],
        op: impl Fn(bool, bool) -> bool,
        identity: bool,
    ) -> Result<Conditions> {
        if children.is_empty() {
            return Err(VigilError::invalid(&base.description, format!("{} has no events", base.kind())));
        }

        let mut combined = vec![identity; self.window.len()];
        for child in children {
            let evaluation = self.evaluate(child)?;
            for (acc, active) in combined.iter_mut().zip(evaluation.active) {
                *acc = op(*acc, active);
            }
        }
        Ok(Conditions::from_flags(self.window.times(), combined))
    }

    /// Chain child confirmations through the configured intervals
    ///
    /// Chains do not overlap: a new chain starts only at a first-child
    /// registration after the previous chain's confirmation. Each link takes
    /// the earliest next-child occurrence registered inside the interval.
    /// The sequence's own persistence requires the last child to stay active
    /// that long past its confirmation.
    fn sequence(
        &self,
        base: &EventBase,
        children: &[EventBase],
        intervals: &[SequenceInterval],
    ) -> Result<Evaluation> {
        if children.is_empty() || intervals.len() + 1 != children.len() {
            return Err(VigilError::invalid(
                &base.description,
                format!(
                    "sequence of {} events cannot use {} intervals",
                    children.len(),
                    intervals.len()
                ),
            ));
        }

        let evaluations = children
            .iter()
            .map(|child| self.evaluate(child))
            .collect::<Result<Vec<_>>>()?;
        let time = |index: usize| self.window.times()[index];
        let persistence = seconds(base.persistence_secs());
        let last = &evaluations[evaluations.len() - 1];

        let mut occurrences = Vec::new();
        let mut last_registers = Vec::new();
        let mut previous_confirm: Option<Timestamp> = None;

        for start in &evaluations[0].occurrences {
            if previous_confirm.map_or(false, |confirm| time(start.register_index) <= confirm) {
                continue;
            }

            let mut current = *start;
            let mut linked = true;
            for (interval, next) in intervals.iter().zip(&evaluations[1..]) {
                let confirmed_at = time(current.confirm_index);
                // an unrepresentable lower bound admits nothing, an unrepresentable upper bound everything
                let earliest = confirmed_at.checked_add_signed(seconds(interval.min_seconds));
                let latest = interval
                    .max_seconds
                    .and_then(|max| confirmed_at.checked_add_signed(seconds(max)));

                match next.occurrences.iter().find(|candidate| {
                    let registered = time(candidate.register_index);
                    earliest.map_or(false, |earliest| registered >= earliest)
                        && latest.map_or(true, |latest| registered <= latest)
                }) {
                    Some(found) => current = *found,
                    None => {
                        linked = false;
                        break;
                    }
                }
            }
            if !linked {
                continue;
            }

            let Some(confirm_index) = self.hold(&last.active, current.confirm_index, persistence) else {
                continue;
            };

            occurrences.push(Occurrence {
                register_index: start.register_index,
                confirm_index,
            });
            last_registers.push(current.register_index);
            previous_confirm = Some(time(confirm_index));
        }

        let frames: Vec<(bool, Timestamp)> = last
            .active
            .iter()
            .copied()
            .zip(self.window.times().iter().copied())
            .collect();

        Ok(Evaluation {
            active: find_alarm_indexes(&last_registers, &frames),
            occurrences,
        })
    }

    /// First frame at least `hold` after `from` while `active` stays set
    fn hold(&self, active: &[bool], from: usize, hold: Duration) -> Option<usize> {
        let target = self.window.time(from)?.checked_add_signed(hold)?;
        (from..active.len())
            .take_while(|index| active[*index])
            .find(|index| self.window.times()[*index] >= target)
    }
}

/// How far before the evaluation start telemetry must be loaded so that
/// occurrences confirming at the start are still detected
pub fn lookback(base: &EventBase) -> Duration {
    let own = seconds(base.persistence_secs());
    match &base.condition {
        EventCondition::RateOfChange { time_window, .. } => own + seconds(*time_window),
        EventCondition::Static { .. } | EventCondition::Threshold { .. } | EventCondition::Setpoint { .. } => own,
        EventCondition::All { event_bases } | EventCondition::Any { event_bases } => {
            own + event_bases.iter().map(lookback).max().unwrap_or_else(Duration::zero)
        }
        EventCondition::SequenceOfEvents { event_bases, intervals } => {
            let children = event_bases.iter().fold(Duration::zero(), |acc, child| acc + lookback(child));
            let gaps = intervals.iter().fold(Duration::zero(), |acc, interval| {
                acc + seconds(interval.max_seconds.unwrap_or(interval.min_seconds))
            });
            own + children + gaps
        }
    }
}

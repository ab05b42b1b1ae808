// File: src/engine.rs
// Alarm evaluation entry point
//
// Walks every configured alarm base, evaluates it over the telemetry it
// needs, turns confirmed occurrences into alarms and submits them to the
// registry in one batch. A failing alarm base is reported after the others
// have still been checked.

use chrono::Duration;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::alarms::{Alarm, AlarmBase, Event, EventId};
use crate::error::{AlarmBaseFailure, Result, VigilError};
use crate::evaluator::{lookback, EventEvaluator};
use crate::registry::AlarmRegistry;
use crate::telemetry::{DataSource, TelemetryWindow, Timestamp};

/// Hands out unique, increasing event ids
#[derive(Debug)]
pub struct EventIdGenerator {
    next: AtomicU64,
}

impl EventIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next(&self) -> EventId {
        EventId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for EventIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluates alarm bases and feeds the registry
pub struct AlarmEngine {
    registry: Arc<AlarmRegistry>,
    ids: EventIdGenerator,
    checked_through: Mutex<Option<Timestamp>>,
}

impl AlarmEngine {
    pub fn new(registry: Arc<AlarmRegistry>) -> Self {
        Self {
            registry,
            ids: EventIdGenerator::new(),
            checked_through: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<AlarmRegistry> {
        &self.registry
    }

    /// Evaluate one alarm base without touching the registry
    ///
    /// Telemetry is loaded from `earliest_time` minus the base's lookback so
    /// that runs already in progress are seen whole; only occurrences
    /// confirmed at or after `earliest_time` become alarms. A run that
    /// starts on the first loaded frame may have started earlier, so the
    /// load is extended backwards until the run's real start or the oldest
    /// stored frame is inside the window. Returns the per-frame active flags
    /// over the loaded window and the new alarms.
    pub fn evaluate(
        &self,
        source: &dyn DataSource,
        alarm_base: &AlarmBase,
        earliest_time: Option<Timestamp>,
    ) -> Result<(Vec<bool>, Vec<Alarm>)> {
        let event_base = &alarm_base.event;
        event_base.validate()?;

        let margin = lookback(event_base);
        let tags = event_base.tags();
        // None loads everything stored
        let mut start = earliest_time.and_then(|earliest| earliest.checked_sub_signed(margin));
        let mut step = margin.max(Duration::seconds(1));

        let mut window = TelemetryWindow::load(source, &tags, start);
        let mut evaluation = EventEvaluator::new(&window).evaluate(event_base)?;
        while let Some(from) = start {
            let truncated = evaluation
                .occurrences
                .first()
                .map_or(false, |occurrence| occurrence.register_index == 0);
            if !truncated {
                break;
            }

            start = from.checked_sub_signed(step);
            step = step.checked_add(&step).unwrap_or(step);
            let mut extended = TelemetryWindow::load(source, &tags, start);
            if extended.time(0) == window.time(0) && start.is_some() {
                // nothing stored in the gap; only the full history can place the run
                start = None;
                extended = TelemetryWindow::load(source, &tags, start);
            }
            if extended.time(0) == window.time(0) {
                break;
            }
            trace!(
                "'{}' runs from the start of its window, reloading from {:?}",
                event_base.description,
                start
            );
            evaluation = EventEvaluator::new(&extended).evaluate(event_base)?;
            window = extended;
        }

        let base = Arc::new(event_base.clone());
        let alarms = evaluation
            .occurrences
            .iter()
            .filter_map(|occurrence| {
                let register_time = window.time(occurrence.register_index)?;
                let confirm_time = window.time(occurrence.confirm_index)?;
                if earliest_time.map_or(false, |earliest| confirm_time < earliest) {
                    return None;
                }
                Some(Alarm::new(
                    Event {
                        base: Arc::clone(&base),
                        id: self.ids.next(),
                        register_time,
                        confirm_time,
                        creation_time: confirm_time,
                        description: base.description.clone(),
                    },
                    alarm_base.criticality,
                ))
            })
            .collect::<Vec<_>>();

        debug!(
            "{} '{}': {} new alarm(s) over {} frame(s)",
            event_base.kind(),
            event_base.description,
            alarms.len(),
            window.len()
        );
        Ok((evaluation.active, alarms))
    }

    /// Check every configured alarm base and register what confirmed
    ///
    /// With `earliest_time` set, only alarms confirmed at or after it are
    /// raised. Returns the ids added to the registry, or
    /// [`VigilError::Evaluation`] naming every alarm base that failed once the
    /// rest have been checked and registered.
    pub fn check_alarms(&self, source: &dyn DataSource, earliest_time: Option<Timestamp>) -> Result<Vec<EventId>> {
        let matrix = Arc::new(source.priority_matrix());
        let mut confirmed = Vec::new();
        let mut failures = Vec::new();

        for alarm_base in source.alarm_bases() {
            match self.evaluate(source, &alarm_base, earliest_time) {
                Ok((_, alarms)) => confirmed.extend(alarms),
                Err(e) => {
                    warn!("Alarm base '{}' failed to evaluate: {}", alarm_base.event.description, e);
                    let reason = match e {
                        VigilError::InvalidEventBase { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    failures.push(AlarmBaseFailure {
                        description: alarm_base.event.description.clone(),
                        reason,
                    });
                }
            }
        }

        let added = if confirmed.is_empty() {
            Vec::new()
        } else {
            info!("Confirmed {} alarm(s)", confirmed.len());
            self.registry.add_alarms(confirmed, &matrix)
        };

        if failures.is_empty() {
            Ok(added)
        } else {
            Err(VigilError::Evaluation { failures })
        }
    }

    /// Check only telemetry newer than the previous call
    ///
    /// The first call evaluates everything stored. Nothing is evaluated
    /// while the newest stored frame is unchanged.
    pub fn check_new_telemetry(&self, source: &dyn DataSource) -> Result<Vec<EventId>> {
        let newest = source.newest_frame_time();
        let previous = {
            let mut checked = self.checked_through.lock();
            if newest.is_none() || *checked == newest {
                return Ok(Vec::new());
            }
            std::mem::replace(&mut *checked, newest)
        };

        let after = previous.map(|through| through.checked_add_signed(Duration::nanoseconds(1)).unwrap_or(through));
        self.check_alarms(source, after)
    }
}

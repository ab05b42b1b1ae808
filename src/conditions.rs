// src/conditions.rs - Leaf condition evaluators
//
// Each evaluator turns one tag's frame-aligned readings into a per-frame
// "condition met" flag and records where the flag is false so the
// persistence scanner does not have to rescan the frames.
use chrono::Duration;

use crate::telemetry::Timestamp;
use crate::value::Value;

/// Per-frame condition flags plus the indices where the condition failed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    pub frames: Vec<(bool, Timestamp)>,
    pub false_indexes: Vec<usize>,
}

impl Conditions {
    /// Pair flags with their frame times
    pub fn from_flags<I>(times: &[Timestamp], flags: I) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        let mut frames = Vec::with_capacity(times.len());
        let mut false_indexes = Vec::new();
        for (index, (time, flag)) in times.iter().zip(flags).enumerate() {
            if !flag {
                false_indexes.push(index);
            }
            frames.push((flag, *time));
        }
        Self { frames, false_indexes }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Bare per-frame flags
    pub fn flags(&self) -> Vec<bool> {
        self.frames.iter().map(|(flag, _)| *flag).collect()
    }
}

/// Reading below `lower` or above `upper`
pub fn threshold(
    times: &[Timestamp],
    readings: &[Option<Value>],
    lower: Option<f64>,
    upper: Option<f64>,
) -> Conditions {
    Conditions::from_flags(
        times,
        readings.iter().map(|reading| {
            reading.and_then(|value| value.as_float()).map_or(false, |value| {
                lower.map_or(false, |lower| value < lower) || upper.map_or(false, |upper| value > upper)
            })
        }),
    )
}

/// Reading exactly equal to `setpoint`
pub fn setpoint(times: &[Timestamp], readings: &[Option<Value>], setpoint: &Value) -> Conditions {
    Conditions::from_flags(
        times,
        readings
            .iter()
            .map(|reading| reading.map_or(false, |value| value.same_reading(setpoint))),
    )
}

/// Reading unchanged from the previous frame
///
/// The first reading has nothing to compare against and is true. A missing
/// reading is false and breaks the comparison chain for the next frame.
pub fn static_value(times: &[Timestamp], readings: &[Option<Value>]) -> Conditions {
    Conditions::from_flags(
        times,
        readings.iter().enumerate().map(|(index, reading)| match (index, reading) {
            (_, None) => false,
            (0, Some(_)) => true,
            (_, Some(value)) => readings[index - 1].map_or(false, |previous| previous.same_reading(value)),
        }),
    )
}

/// Rate of change over `time_window` crosses a rise or fall threshold
///
/// For a frame at time `T`, the window ends at the last frame no later than
/// `T + time_window`; the rate is the value change divided by the number of
/// frames advanced. Frames whose window runs past the end of the data are
/// false. The fall threshold is a magnitude: a fall threshold of `2.0` (or
/// `-2.0`) triggers on rates below `-2.0`.
pub fn rate_of_change(
    times: &[Timestamp],
    readings: &[Option<Value>],
    rate_of_fall_threshold: Option<f64>,
    rate_of_rise_threshold: Option<f64>,
    time_window: Duration,
) -> Conditions {
    let count = times.len().min(readings.len());
    let mut flags = Vec::with_capacity(count);
    let mut end = 0;

    for start in 0..count {
        end = end.max(start);
        // a window past the representable range never completes
        let Some(horizon) = times[start].checked_add_signed(time_window) else {
            flags.push(false);
            continue;
        };
        while end + 1 < count && times[end + 1] <= horizon {
            end += 1;
        }

        let reached = end + 1 < count || times[end] == horizon;
        if !reached {
            flags.push(false);
            continue;
        }

        let rate = match (readings[start], readings[end]) {
            (Some(first), Some(last)) if end > start => match (first.as_float(), last.as_float()) {
                (Some(first), Some(last)) => (last - first) / (end - start) as f64,
                _ => 0.0,
            },
            _ => 0.0,
        };

        let rising = rate_of_rise_threshold.map_or(false, |rise| rate > rise);
        let falling = rate_of_fall_threshold.map_or(false, |fall| rate < -fall.abs());
        flags.push(rising || falling);
    }

    Conditions::from_flags(&times[..count], flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn times(offsets: &[i64]) -> Vec<Timestamp> {
        offsets
            .iter()
            .map(|secs| Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap())
            .collect()
    }

    fn ints(values: &[Option<i64>]) -> Vec<Option<Value>> {
        values.iter().map(|v| v.map(Value::Int)).collect()
    }

    #[test]
    fn test_threshold_bounds_and_nulls() {
        let t = times(&[0, 1, 2, 3, 4]);
        let readings = vec![
            Some(Value::Float(-1.0)),
            Some(Value::Int(5)),
            None,
            Some(Value::Float(11.0)),
            Some(Value::Int(10)),
        ];

        let both = threshold(&t, &readings, Some(0.0), Some(10.0));
        assert_eq!(both.flags(), vec![true, false, false, true, false]);
        assert_eq!(both.false_indexes, vec![1, 2, 4]);

        let upper_only = threshold(&t, &readings, None, Some(10.0));
        assert_eq!(upper_only.flags(), vec![false, false, false, true, false]);
    }

    #[test]
    fn test_setpoint_exact_match() {
        let t = times(&[0, 1, 2, 3]);
        let readings = vec![Some(Value::Int(3)), Some(Value::Float(3.0)), Some(Value::Float(3.1)), None];
        let conditions = setpoint(&t, &readings, &Value::Int(3));
        assert_eq!(conditions.flags(), vec![true, true, false, false]);

        let switches = vec![Some(Value::Bool(true)), Some(Value::Int(1))];
        let conditions = setpoint(&t[..2], &switches, &Value::Bool(true));
        assert_eq!(conditions.flags(), vec![true, false]);
    }

    #[test]
    fn test_static_compares_consecutive_frames() {
        let t = times(&[0, 10, 20, 30]);
        let conditions = static_value(&t, &ints(&[Some(5), Some(5), Some(5), Some(3)]));
        assert_eq!(conditions.flags(), vec![true, true, true, false]);
        assert_eq!(conditions.false_indexes, vec![3]);

        let gap = static_value(&t, &ints(&[Some(5), None, Some(5), Some(5)]));
        assert_eq!(gap.flags(), vec![true, false, false, true]);
    }

    #[test]
    fn test_rate_of_change_rise_and_truncated_window() {
        // one reading per 10 seconds, 20 second window: two frames advanced
        let t = times(&[0, 10, 20, 30, 40]);
        let readings = ints(&[Some(0), Some(1), Some(10), Some(12), Some(12)]);
        let conditions = rate_of_change(&t, &readings, None, Some(3.0), Duration::seconds(20));

        // rates: (10-0)/2=5, (12-1)/2=5.5, (12-10)/2=1, window truncated, truncated
        assert_eq!(conditions.flags(), vec![true, true, false, false, false]);
    }

    #[test]
    fn test_rate_of_change_fall_is_a_magnitude() {
        let t = times(&[0, 10, 20]);
        let readings = ints(&[Some(10), Some(4), Some(0)]);

        let negative = rate_of_change(&t, &readings, Some(-2.0), None, Duration::seconds(10));
        let positive = rate_of_change(&t, &readings, Some(2.0), None, Duration::seconds(10));
        assert_eq!(negative.flags(), vec![true, true, false]);
        assert_eq!(negative.flags(), positive.flags());
    }

    #[test]
    fn test_rate_of_change_null_start_is_zero_rate() {
        let t = times(&[0, 10, 20]);
        let readings = ints(&[None, Some(100), Some(100)]);
        let conditions = rate_of_change(&t, &readings, Some(1.0), Some(1.0), Duration::seconds(10));
        assert_eq!(conditions.flags(), vec![false, false, false]);
    }

    #[test]
    fn test_rate_of_change_window_past_time_range() {
        let t = times(&[0, 10, 20]);
        let readings = ints(&[Some(0), Some(50), Some(100)]);
        let conditions = rate_of_change(&t, &readings, None, Some(1.0), Duration::days(1_000_000_000));
        assert_eq!(conditions.flags(), vec![false, false, false]);
    }

    #[test]
    fn test_empty_series() {
        let conditions = rate_of_change(&[], &[], None, Some(1.0), Duration::seconds(5));
        assert!(conditions.is_empty());
        assert!(static_value(&[], &[]).is_empty());
    }
}

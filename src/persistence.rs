// src/persistence.rs - Persistence scanning over per-frame condition flags
use crate::telemetry::{seconds, Timestamp};

/// Find the confirmed runs of a condition
///
/// `conditions` holds one `(flag, time)` pair per frame and `false_indexes`
/// the frames whose flag is false; they delimit the runs of true frames. A
/// run confirms when its last frame is at least `persistence` seconds after
/// its first. Each confirmed run yields `(register_index, confirm_index)`:
/// the run's first frame and the earliest frame of the run whose time is at
/// least `persistence` seconds after the register time.
///
/// # Examples
///
/// ```rust
/// use chrono::{Duration, Utc};
/// use vigil::persistence::persistence_check;
///
/// let now = Utc::now();
/// let conditions = vec![
///     (true, now - Duration::seconds(60)),
///     (true, now - Duration::seconds(50)),
///     (true, now - Duration::seconds(10)),
/// ];
///
/// assert_eq!(persistence_check(&conditions, 20.0, &[]), vec![(0, 2)]);
/// assert!(persistence_check(&conditions, 500.0, &[]).is_empty());
/// ```
pub fn persistence_check(
    conditions: &[(bool, Timestamp)],
    persistence: f64,
    false_indexes: &[usize],
) -> Vec<(usize, usize)> {
    if conditions.is_empty() {
        return Vec::new();
    }

    let required = seconds(persistence.max(0.0));
    let mut delimiters: Vec<usize> = false_indexes
        .iter()
        .copied()
        .filter(|index| *index < conditions.len())
        .collect();
    delimiters.sort_unstable();
    delimiters.dedup();

    let mut runs = Vec::with_capacity(delimiters.len() + 1);
    let mut start = 0;
    for delimiter in delimiters {
        if delimiter > start {
            runs.push((start, delimiter - 1));
        }
        start = delimiter + 1;
    }
    if start < conditions.len() {
        runs.push((start, conditions.len() - 1));
    }

    runs.into_iter()
        .filter_map(|(first, last)| {
            let register_time = conditions[first].1;
            if conditions[last].1 - register_time < required {
                return None;
            }

            let target = register_time.checked_add_signed(required)?;
            let mut confirm = last;
            while confirm > first && conditions[confirm - 1].1 >= target {
                confirm -= 1;
            }
            Some((first, confirm))
        })
        .collect()
}

/// Expand register indices into per-frame "alarm active" flags
///
/// Every frame from each register index through the end of its run of true
/// frames is marked active.
pub fn find_alarm_indexes(register_indexes: &[usize], conditions: &[(bool, Timestamp)]) -> Vec<bool> {
    let mut active = vec![false; conditions.len()];
    for &register in register_indexes {
        let mut index = register;
        while index < conditions.len() && conditions[index].0 && !active[index] {
            active[index] = true;
            index += 1;
        }
    }
    active
}

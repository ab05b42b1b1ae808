use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use vigil::persistence::{find_alarm_indexes, persistence_check};
use vigil::Timestamp;

/// Ascending frames from (flag, gap-in-seconds) pairs
fn build(frames: &[(bool, u32)]) -> (Vec<(bool, Timestamp)>, Vec<usize>) {
    let mut time = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut conditions = Vec::with_capacity(frames.len());
    let mut false_indexes = Vec::new();
    for (index, (flag, gap)) in frames.iter().enumerate() {
        time = time + Duration::seconds(i64::from(*gap));
        if !flag {
            false_indexes.push(index);
        }
        conditions.push((*flag, time));
    }
    (conditions, false_indexes)
}

/// Maximal runs of true frames as (first, last)
fn runs(conditions: &[(bool, Timestamp)]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (index, (flag, _)) in conditions.iter().enumerate() {
        match (flag, start) {
            (true, None) => start = Some(index),
            (false, Some(first)) => {
                runs.push((first, index - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(first) = start {
        runs.push((first, conditions.len() - 1));
    }
    runs
}

fn frames() -> impl Strategy<Value = Vec<(bool, u32)>> {
    prop::collection::vec((any::<bool>(), 1u32..60), 0..40)
}

proptest! {
    #[test]
    fn test_zero_persistence_confirms_every_run_at_register(frames in frames()) {
        let (conditions, false_indexes) = build(&frames);
        let confirmed = persistence_check(&conditions, 0.0, &false_indexes);

        let expected: Vec<(usize, usize)> = runs(&conditions)
            .into_iter()
            .map(|(first, _)| (first, first))
            .collect();
        prop_assert_eq!(confirmed, expected);
    }

    #[test]
    fn test_run_confirms_iff_long_enough(frames in frames(), persistence in 0u32..300) {
        let (conditions, false_indexes) = build(&frames);
        let confirmed = persistence_check(&conditions, f64::from(persistence), &false_indexes);
        let required = Duration::seconds(i64::from(persistence));

        let expected: Vec<(usize, usize)> = runs(&conditions)
            .into_iter()
            .filter(|(first, last)| conditions[*last].1 - conditions[*first].1 >= required)
            .map(|(first, last)| {
                let target = conditions[first].1 + required;
                let confirm = (first..=last)
                    .find(|index| conditions[*index].1 >= target)
                    .unwrap_or(last);
                (first, confirm)
            })
            .collect();
        prop_assert_eq!(confirmed, expected);
    }

    #[test]
    fn test_expansion_covers_confirmed_runs(frames in frames(), persistence in 0u32..300) {
        let (conditions, false_indexes) = build(&frames);
        let confirmed = persistence_check(&conditions, f64::from(persistence), &false_indexes);
        let registers: Vec<usize> = confirmed.iter().map(|(register, _)| *register).collect();
        let active = find_alarm_indexes(&registers, &conditions);

        let mut expected = vec![false; conditions.len()];
        for (first, last) in runs(&conditions) {
            if registers.contains(&first) {
                expected[first..=last].iter_mut().for_each(|flag| *flag = true);
            }
        }
        prop_assert_eq!(active, expected);
    }
}

use chrono::{Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vigil::*;

const CONFIG: &str = r#"
device: "DEVICE_A"
alarms:
  - criticality: HIGH
    event:
      type: threshold
      tag: "A3"
      persistence: 20
      description: "A3 out of range"
      lower_threshold: 0.0
      upper_threshold: 100.0
  - criticality: MEDIUM
    event:
      type: static
      tag: "B1"
      persistence: 30
      description: "B1 frozen"
  - criticality: CRITICAL
    event:
      type: sequence_of_events
      description: "valve opened then pressure dropped"
      events:
        - type: setpoint
          tag: "VALVE"
          setpoint: true
          description: "valve open"
        - type: threshold
          tag: "PRESSURE"
          lower_threshold: 10
          description: "pressure low"
      intervals:
        - [0, 30]
"#;

fn t(secs: i64) -> Timestamp {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn ingest_frames(store: &TelemetryStore, from: i64, to: i64) {
    for frame in from..to {
        let secs = frame * 10;
        let a3 = if (3..=6).contains(&frame) { 150.0 } else { 50.0 };
        store.ingest("A3", t(secs), Some(Value::Float(a3)));
        store.ingest("B1", t(secs), Some(Value::Int(frame.min(2))));
        store.ingest("VALVE", t(secs), Some(Value::Bool(frame == 1)));
        store.ingest("PRESSURE", t(secs), Some(Value::Int(if frame == 3 { 5 } else { 50 })));
    }
}

fn setup() -> (TelemetryStore, Arc<AlarmRegistry>, AlarmEngine) {
    let config = Config::from_yaml(CONFIG).unwrap();
    let store = TelemetryStore::with_config(&config);
    let registry = Arc::new(AlarmRegistry::new(config.registry.clone()));
    let engine = AlarmEngine::new(Arc::clone(&registry));
    (store, registry, engine)
}

fn descriptions(alarms: &[Alarm]) -> Vec<&str> {
    alarms.iter().map(|alarm| alarm.event.description.as_str()).collect()
}

#[test]
fn test_config_to_registry() {
    let (store, registry, engine) = setup();
    ingest_frames(&store, 0, 10);
    let notified = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&notified);
    registry.add_watcher(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let added = engine.check_alarms(&store, None).unwrap();
    assert_eq!(added.len(), 3);
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    // confirmed long ago, so every alarm sits at the 30 minute checkpoint
    let snapshot = registry.get_snapshot();
    assert_eq!(
        descriptions(&snapshot[&AlarmPriority::Critical]),
        vec!["valve opened then pressure dropped", "A3 out of range"]
    );
    assert_eq!(descriptions(&snapshot[&AlarmPriority::High]), vec!["B1 frozen"]);

    let a3 = &snapshot[&AlarmPriority::Critical][1];
    assert_eq!(a3.criticality, AlarmCriticality::High);
    assert_eq!(a3.event.register_time, t(30));
    assert_eq!(a3.event.confirm_time, t(50));
    assert_eq!(a3.event.kind(), "Threshold");

    let soe = &snapshot[&AlarmPriority::Critical][0];
    assert_eq!(soe.event.register_time, t(10));
    assert_eq!(soe.event.confirm_time, t(30));

    let frozen = &snapshot[&AlarmPriority::High][0];
    // B1 steps 0, 1, 2 and holds 2 from t(20), so the first repeat is t(30)
    assert_eq!(frozen.event.register_time, t(30));
    assert_eq!(frozen.event.confirm_time, t(60));
}

#[test]
fn test_incremental_checks_do_not_duplicate() {
    let (store, registry, engine) = setup();
    ingest_frames(&store, 0, 5);

    let first = engine.check_new_telemetry(&store).unwrap();
    // B1 and A3 confirm at t(60) and t(50), past the stored frames
    assert_eq!(first.len(), 1);
    assert_eq!(registry.get(first[0]).unwrap().event.description, "valve opened then pressure dropped");

    ingest_frames(&store, 5, 10);
    let second = engine.check_new_telemetry(&store).unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(registry.len(), 3);

    assert!(engine.check_new_telemetry(&store).unwrap().is_empty());
    assert_eq!(registry.len(), 3);
}

#[test]
fn test_continuous_condition_raises_one_alarm_across_checks() {
    let config = Config::from_yaml(
        r#"
device: "DEVICE_A"
alarms:
  - criticality: HIGH
    event:
      type: threshold
      tag: "A3"
      persistence: 20
      description: "A3 high"
      upper_threshold: 100
"#,
    )
    .unwrap();
    let store = TelemetryStore::with_config(&config);
    let registry = Arc::new(AlarmRegistry::new(config.registry.clone()));
    let engine = AlarmEngine::new(Arc::clone(&registry));

    for frame in 0..10 {
        store.ingest("A3", t(frame * 10), Some(Value::Float(150.0)));
    }
    assert_eq!(engine.check_new_telemetry(&store).unwrap().len(), 1);

    for frame in 10..15 {
        store.ingest("A3", t(frame * 10), Some(Value::Float(150.0)));
        let added = engine.check_new_telemetry(&store).unwrap();
        assert!(added.is_empty(), "frame {} raised {:?}", frame, added);
    }

    assert_eq!(registry.len(), 1);
    let alarm = &registry.new_alarms()[0];
    assert_eq!(alarm.event.register_time, t(0));
    assert_eq!(alarm.event.confirm_time, t(20));
}

#[test]
fn test_failing_alarm_base_does_not_block_others() {
    let (store, registry, engine) = setup();
    ingest_frames(&store, 0, 10);

    let mut bases = store.alarm_bases();
    bases.push(AlarmBase {
        criticality: AlarmCriticality::Low,
        event: EventBase::new(
            EventCondition::RateOfChange {
                tag: "VALVE".to_string(),
                rate_of_fall_threshold: None,
                rate_of_rise_threshold: Some(1.0),
                time_window: 10.0,
            },
            None,
            "valve flapping",
        ),
    });
    bases.push(AlarmBase {
        criticality: AlarmCriticality::Low,
        event: EventBase::new(
            EventCondition::SequenceOfEvents {
                event_bases: vec![],
                intervals: vec![],
            },
            None,
            "empty sequence",
        ),
    });
    store.set_alarm_bases(bases);

    match engine.check_alarms(&store, None) {
        Err(VigilError::Evaluation { failures }) => {
            let failed: Vec<&str> = failures.iter().map(|f| f.description.as_str()).collect();
            assert_eq!(failed, vec!["valve flapping", "empty sequence"]);
        }
        other => panic!("expected evaluation failures, got {:?}", other),
    }
    assert_eq!(registry.len(), 3);
}

#[test]
fn test_operator_actions() {
    let (store, registry, engine) = setup();
    ingest_frames(&store, 0, 10);
    let mut events = registry.subscribe();
    let added = engine.check_alarms(&store, None).unwrap();

    assert_eq!(registry.new_alarms().len(), 3);
    assert_eq!(registry.unacknowledged_count(), 3);

    assert!(registry.acknowledge(added[0]));
    assert_eq!(registry.unacknowledged_count(), 2);

    let removed = registry.remove(added[1]).unwrap();
    assert_eq!(removed.id(), added[1]);
    assert!(registry.get(added[1]).is_none());
    assert_eq!(registry.new_alarms().len(), 2);

    assert!(matches!(events.try_recv().unwrap(), RegistryEvent::Added { .. }));
    assert_eq!(events.try_recv().unwrap(), RegistryEvent::Acknowledged { id: added[0] });
    assert_eq!(events.try_recv().unwrap(), RegistryEvent::Removed { id: added[1] });
}

#[test]
fn test_recent_alarm_starts_unescalated() {
    let registry = AlarmRegistry::new(RegistryConfig::default());
    let matrix = Arc::new(AlarmPriorityMatrix::reference());
    let now = Utc::now();
    let base = Arc::new(EventBase::new(
        EventCondition::Static { tag: "A".to_string() },
        None,
        "A frozen",
    ));
    let alarm = Alarm::new(
        Event {
            base,
            id: EventId(1),
            register_time: now - Duration::seconds(30),
            confirm_time: now,
            creation_time: now,
            description: "A frozen".to_string(),
        },
        AlarmCriticality::High,
    );

    registry.add_alarms(vec![alarm], &matrix);
    let held = registry.get(EventId(1)).unwrap();
    assert_eq!(held.priority, AlarmPriority::Medium);
    assert!(!held.acknowledged);
}

#[test]
fn test_tag_search_over_store_tags() {
    let (store, _, _) = setup();
    ingest_frames(&store, 0, 1);
    let config = Config::from_yaml(CONFIG).unwrap();

    let mut search = TagSearchCache::with_config(store.all_tags().into_iter().collect(), &config.search);
    assert_eq!(search.search("a"), vec!["A3", "VALVE"]);
    assert_eq!(search.search("PRES"), vec!["PRESSURE"]);
    assert_eq!(search.search(""), vec!["A3", "B1", "PRESSURE", "VALVE"]);
}

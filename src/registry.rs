// File: src/registry.rs
// Observable registry of active alarms
//
// Alarms live in priority buckets (insertion ordered) plus a bounded FIFO of
// the most recently added alarms. Every mutation happens under one lock;
// watchers are called after that lock is released, and a matching
// `RegistryEvent` is broadcast for subscribers that need to know what changed.

use chrono::Utc;
use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::alarms::{Alarm, AlarmCriticality, AlarmPriority, AlarmPriorityMatrix, EventId};
use crate::escalation::{EscalationHandle, EscalationRequest, EscalationScheduler};
use crate::telemetry::Timestamp;

/// Capacity of the most-recently-added alarms FIFO
pub const MAX_NEW_ALARMS: usize = 3;

/// Zero-argument change callback
pub type Watcher = Arc<dyn Fn() + Send + Sync>;

// ==========================================
// SECTION 1: CONFIGURATION AND EVENTS
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Capacity of the "new alarms" FIFO
    pub new_alarm_capacity: usize,
    /// Buffer of the registry event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            new_alarm_capacity: MAX_NEW_ALARMS,
            event_channel_capacity: 256,
        }
    }
}

/// What changed in the registry
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Added { ids: Vec<EventId> },
    Reclassified {
        id: EventId,
        from: AlarmPriority,
        to: AlarmPriority,
    },
    Acknowledged { id: EventId },
    Removed { id: EventId },
}

// ==========================================
// SECTION 2: REGISTRY
// ==========================================

#[derive(Default)]
struct RegistryState {
    alarms: HashMap<EventId, Alarm>,
    buckets: BTreeMap<AlarmPriority, Vec<EventId>>,
    new_alarms: VecDeque<EventId>,
}

/// Thread-safe store of active alarms
///
/// Construct with [`AlarmRegistry::start`] inside a tokio runtime to get
/// priority escalation; [`AlarmRegistry::new`] gives a registry without
/// timers.
pub struct AlarmRegistry {
    state: Mutex<RegistryState>,
    watchers: Mutex<Vec<Watcher>>,
    notify_lock: ReentrantMutex<()>,
    events: broadcast::Sender<RegistryEvent>,
    escalation: Option<EscalationHandle>,
    config: RegistryConfig,
}

impl AlarmRegistry {
    /// Registry without an escalation scheduler
    pub fn new(config: RegistryConfig) -> Self {
        Self::build(config, None)
    }

    /// Registry with a running escalation scheduler
    ///
    /// Must be called from within a tokio runtime. The scheduler stops once
    /// the last handle to the registry is dropped.
    pub fn start(config: RegistryConfig) -> Arc<Self> {
        let (handle, requests) = EscalationHandle::channel();
        let registry = Arc::new(Self::build(config, Some(handle)));
        EscalationScheduler::new(requests, Arc::downgrade(&registry)).spawn();
        registry
    }

    fn build(config: RegistryConfig, escalation: Option<EscalationHandle>) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            state: Mutex::new(RegistryState::default()),
            watchers: Mutex::new(Vec::new()),
            notify_lock: ReentrantMutex::new(()),
            events,
            escalation,
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Add confirmed alarms, escalating relative to the current time
    pub fn add_alarms(&self, alarms: Vec<Alarm>, matrix: &Arc<AlarmPriorityMatrix>) -> Vec<EventId> {
        self.add_alarms_at(alarms, matrix, Utc::now())
    }

    /// Add confirmed alarms as of `now`
    ///
    /// Alarms are ordered by descending criticality, then by event id. Each
    /// is placed in the bucket of the latest checkpoint already elapsed since
    /// its creation and the remaining checkpoints are scheduled. Watchers are
    /// notified once for the whole batch. Alarms whose id is already held are
    /// skipped. Returns the ids actually added.
    pub fn add_alarms_at(
        &self,
        mut alarms: Vec<Alarm>,
        matrix: &Arc<AlarmPriorityMatrix>,
        now: Timestamp,
    ) -> Vec<EventId> {
        alarms.sort_by(|a, b| b.criticality.cmp(&a.criticality).then(a.id().cmp(&b.id())));

        let mut added = Vec::with_capacity(alarms.len());
        let mut requests = Vec::new();
        {
            let mut state = self.state.lock();
            for mut alarm in alarms {
                let id = alarm.id();
                if state.alarms.contains_key(&id) {
                    warn!("Alarm {} is already registered, skipping", id);
                    continue;
                }

                let created = alarm.event.creation_time;
                let elapsed_index = matrix.checkpoint_index(now - created);
                alarm.priority = matrix.priority_at(elapsed_index, alarm.criticality);

                for (index, checkpoint) in matrix.checkpoints().iter().enumerate().skip(elapsed_index + 1) {
                    requests.push(EscalationRequest {
                        alarm: id,
                        criticality: alarm.criticality,
                        checkpoint_index: index,
                        matrix: Arc::clone(matrix),
                        delay: (created + *checkpoint - now).to_std().unwrap_or_default(),
                    });
                }

                state.buckets.entry(alarm.priority).or_default().push(id);
                state.new_alarms.push_back(id);
                while state.new_alarms.len() > self.config.new_alarm_capacity {
                    state.new_alarms.pop_front();
                }
                state.alarms.insert(id, alarm);
                added.push(id);
            }
        }

        if added.is_empty() {
            return added;
        }

        match &self.escalation {
            Some(escalation) => {
                for request in requests {
                    escalation.schedule(request);
                }
            }
            None => debug!("No escalation scheduler, {} checkpoint(s) not scheduled", requests.len()),
        }

        info!("Registered {} alarm(s)", added.len());
        self.publish(RegistryEvent::Added { ids: added.clone() });
        self.notify();
        added
    }

    /// Move an alarm to `priority`
    ///
    /// Returns `false` without notifying when the alarm is not held (it may
    /// have been removed) or already has that priority. Watchers only hear
    /// about visible changes, so an escalation checkpoint that maps an alarm
    /// to the priority it already has is silent.
    pub fn reclassify(&self, id: EventId, priority: AlarmPriority) -> bool {
        let from = {
            let mut state = self.state.lock();
            let Some(alarm) = state.alarms.get_mut(&id) else {
                trace!("Reclassify of unknown alarm {} ignored", id);
                return false;
            };
            let from = alarm.priority;
            if from == priority {
                return false;
            }
            alarm.priority = priority;

            if let Some(bucket) = state.buckets.get_mut(&from) {
                bucket.retain(|held| *held != id);
            }
            state.buckets.entry(priority).or_default().push(id);
            from
        };

        debug!("Alarm {} reclassified {} -> {}", id, from, priority);
        self.publish(RegistryEvent::Reclassified { id, from, to: priority });
        self.notify();
        true
    }

    /// Mark an alarm acknowledged
    ///
    /// Returns whether the alarm is held. Acknowledging twice is harmless and
    /// only the first call notifies.
    pub fn acknowledge(&self, id: EventId) -> bool {
        let changed = {
            let mut state = self.state.lock();
            match state.alarms.get_mut(&id) {
                Some(alarm) if alarm.acknowledged => false,
                Some(alarm) => {
                    alarm.acknowledged = true;
                    true
                }
                None => return false,
            }
        };

        if changed {
            debug!("Alarm {} acknowledged", id);
            self.publish(RegistryEvent::Acknowledged { id });
            self.notify();
        }
        true
    }

    /// Remove an alarm from whichever bucket holds it
    ///
    /// Removing an alarm that is not held is a no-op.
    pub fn remove(&self, id: EventId) -> Option<Alarm> {
        let removed = {
            let mut state = self.state.lock();
            let mut found = false;
            for bucket in state.buckets.values_mut() {
                if let Some(position) = bucket.iter().position(|held| *held == id) {
                    bucket.remove(position);
                    found = true;
                    break;
                }
            }
            if found {
                state.alarms.remove(&id)
            } else {
                None
            }
        };

        if removed.is_some() {
            debug!("Alarm {} removed", id);
            self.publish(RegistryEvent::Removed { id });
            self.notify();
        }
        removed
    }

    /// Copy of every bucket, one entry per priority level
    pub fn get_snapshot(&self) -> BTreeMap<AlarmPriority, Vec<Alarm>> {
        let state = self.state.lock();
        AlarmCriticality::ALL
            .iter()
            .map(|priority| {
                let alarms = state
                    .buckets
                    .get(priority)
                    .map(|ids| ids.iter().filter_map(|id| state.alarms.get(id).cloned()).collect())
                    .unwrap_or_default();
                (*priority, alarms)
            })
            .collect()
    }

    pub fn get(&self, id: EventId) -> Option<Alarm> {
        self.state.lock().alarms.get(&id).cloned()
    }

    /// Most recently added alarms still held, oldest first
    pub fn new_alarms(&self) -> Vec<Alarm> {
        let state = self.state.lock();
        state
            .new_alarms
            .iter()
            .filter_map(|id| state.alarms.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unacknowledged_count(&self) -> usize {
        self.state.lock().alarms.values().filter(|alarm| !alarm.acknowledged).count()
    }

    /// Register a callback run after every visible change
    pub fn add_watcher<F>(&self, watcher: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.watchers.lock().push(Arc::new(watcher));
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: RegistryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn notify(&self) {
        let watchers: Vec<Watcher> = self.watchers.lock().clone();
        let _serialized = self.notify_lock.lock();
        for watcher in watchers {
            if panic::catch_unwind(AssertUnwindSafe(|| watcher())).is_err() {
                warn!("Registry watcher panicked, continuing with remaining watchers");
            }
        }
    }
}

impl std::fmt::Debug for AlarmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmRegistry")
            .field("alarms", &self.len())
            .field("watchers", &self.watchers.lock().len())
            .field("escalating", &self.escalation.is_some())
            .finish()
    }
}

// ==========================================
// SECTION 3: TESTS
// ==========================================

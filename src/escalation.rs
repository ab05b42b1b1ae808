// src/escalation.rs - Priority escalation scheduler
//
// One task owns every pending checkpoint in a delay queue ordered by fire
// time. Requests arrive over an unbounded channel from the registry; the task
// only holds a weak reference back to it and stops once the registry is gone.
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info};

use crate::alarms::{AlarmCriticality, AlarmPriorityMatrix, EventId};
use crate::registry::AlarmRegistry;

/// A deferred reclassification at one matrix checkpoint
#[derive(Debug, Clone)]
pub struct EscalationRequest {
    pub alarm: EventId,
    pub criticality: AlarmCriticality,
    pub checkpoint_index: usize,
    pub matrix: Arc<AlarmPriorityMatrix>,
    /// Time from submission until the checkpoint is reached
    pub delay: std::time::Duration,
}

/// Sending side used by the registry
#[derive(Debug, Clone)]
pub struct EscalationHandle {
    tx: mpsc::UnboundedSender<EscalationRequest>,
}

impl EscalationHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EscalationRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a request; returns `false` if the scheduler has stopped
    pub fn schedule(&self, request: EscalationRequest) -> bool {
        match self.tx.send(request) {
            Ok(()) => true,
            Err(rejected) => {
                debug!("Escalation scheduler stopped, dropping checkpoint for {}", rejected.0.alarm);
                false
            }
        }
    }
}

struct Pending {
    fire_at: Instant,
    sequence: u64,
    request: EscalationRequest,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.fire_at, self.sequence).cmp(&(other.fire_at, other.sequence))
    }
}

/// Delay queue driving every escalation timer
pub struct EscalationScheduler {
    requests: mpsc::UnboundedReceiver<EscalationRequest>,
    registry: Weak<AlarmRegistry>,
    queue: BinaryHeap<Reverse<Pending>>,
    sequence: u64,
}

impl EscalationScheduler {
    pub fn new(requests: mpsc::UnboundedReceiver<EscalationRequest>, registry: Weak<AlarmRegistry>) -> Self {
        Self {
            requests,
            registry,
            queue: BinaryHeap::new(),
            sequence: 0,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until the request channel closes or the registry is dropped
    pub async fn run(mut self) {
        debug!("Escalation scheduler started");
        loop {
            let next = self.queue.peek().map(|Reverse(pending)| pending.fire_at);
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.push(request),
                    None => break,
                },
                _ = time::sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                    if !self.fire_due() {
                        break;
                    }
                }
            }
        }
        debug!("Escalation scheduler stopped with {} pending checkpoint(s)", self.queue.len());
    }

    /// Number of checkpoints waiting to fire
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn push(&mut self, request: EscalationRequest) {
        self.sequence += 1;
        self.queue.push(Reverse(Pending {
            fire_at: Instant::now() + request.delay,
            sequence: self.sequence,
            request,
        }));
    }

    /// Fire every due checkpoint; `false` once the registry is gone
    fn fire_due(&mut self) -> bool {
        let now = Instant::now();
        while self.queue.peek().map_or(false, |Reverse(pending)| pending.fire_at <= now) {
            let Some(Reverse(pending)) = self.queue.pop() else {
                break;
            };
            let Some(registry) = self.registry.upgrade() else {
                return false;
            };

            let request = pending.request;
            let priority = request.matrix.priority_at(request.checkpoint_index, request.criticality);
            if registry.reclassify(request.alarm, priority) {
                info!(
                    "Alarm {} escalated to {} at the {} minute checkpoint",
                    request.alarm,
                    priority,
                    request
                        .matrix
                        .checkpoints()
                        .get(request.checkpoint_index)
                        .map_or(0, |checkpoint| checkpoint.num_minutes())
                );
            }
        }
        true
    }
}

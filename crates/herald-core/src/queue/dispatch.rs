//! Dispatch queue: a bounded, time-ordered index of notification ids.
//!
//! The queue holds ids only. The store's `queued` records are the durable
//! truth; after a restart the queue is rebuilt from them (`DispatchEngine::recover`).

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::{NotificationId, SubmitError};
use crate::ports::Clock;

/// Scheduled entry. Ordering is reversed so `BinaryHeap` pops the earliest
/// `not_before` first, then the lowest store sequence (creation order).
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    not_before: DateTime<Utc>,
    sequence: u64,
    id: NotificationId,
    /// Matches `members[id]` while this entry is live.
    ticket: u64,
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .not_before
            .cmp(&self.not_before)
            .then_with(|| other.sequence.cmp(&self.sequence))
            .then_with(|| other.ticket.cmp(&self.ticket))
    }
}

/// Stale heap entries tolerated before `remove` compacts.
const COMPACT_SLACK: usize = 64;

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<Entry>,
    /// Live ids and their current ticket. Heap entries with another ticket are stale.
    members: HashMap<NotificationId, u64>,
    /// Slots handed out by `try_reserve` but not yet committed or dropped.
    reserved: usize,
    next_ticket: u64,
}

impl QueueState {
    fn push(&mut self, id: NotificationId, not_before: DateTime<Utc>, sequence: u64) -> bool {
        if self.members.contains_key(&id) {
            return false;
        }
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.members.insert(id, ticket);
        self.heap.push(Entry {
            not_before,
            sequence,
            id,
            ticket,
        });
        true
    }

    fn is_live(&self, entry: &Entry) -> bool {
        self.members.get(&entry.id) == Some(&entry.ticket)
    }

    fn drop_stale_head(&mut self) {
        while let Some(head) = self.heap.peek() {
            if self.is_live(head) {
                break;
            }
            self.heap.pop();
        }
    }

    fn pop_eligible(&mut self, now: DateTime<Utc>, max: usize) -> Vec<NotificationId> {
        let mut batch = Vec::new();
        while batch.len() < max {
            self.drop_stale_head();
            let Some(head) = self.heap.peek() else {
                break;
            };
            if head.not_before > now {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                self.members.remove(&entry.id);
                batch.push(entry.id);
            }
        }
        batch
    }

    /// Rebuild the heap without stale entries once they dominate it.
    fn compact_if_sparse(&mut self) {
        if self.heap.len() <= 2 * self.members.len() + COMPACT_SLACK {
            return;
        }
        let members = &self.members;
        self.heap
            .retain(|entry| members.get(&entry.id) == Some(&entry.ticket));
    }

    fn next_due(&mut self) -> Option<DateTime<Utc>> {
        self.drop_stale_head();
        self.heap.peek().map(|e| e.not_before)
    }
}

/// Bounded dispatch queue shared by intake, the workers and the reaper.
///
/// - `try_reserve` + `Slot::commit` is the intake path and is subject to capacity
/// - `enqueue_retry` is the re-enqueue path and bypasses capacity, so a full
///   queue can never strand a notification that was already accepted
/// - an id is indexed at most once; enqueueing it again is a no-op
pub struct DispatchQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl DispatchQueue {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity,
            clock,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Indexed ids, eligible or not.
    pub fn len(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: NotificationId) -> bool {
        self.state.lock().members.contains_key(&id)
    }

    /// Reserve room for one new notification.
    ///
    /// Fails with `QueueFull` instead of waiting. The reservation is released
    /// when the returned `Slot` is dropped without being committed.
    pub fn try_reserve(&self) -> Result<Slot<'_>, SubmitError> {
        let mut state = self.state.lock();
        if state.members.len() + state.reserved >= self.capacity {
            return Err(SubmitError::QueueFull {
                capacity: self.capacity,
            });
        }
        state.reserved += 1;
        Ok(Slot {
            queue: self,
            armed: true,
        })
    }

    /// Index an already-accepted notification regardless of capacity.
    ///
    /// Returns `false` if the id was already indexed.
    pub fn enqueue_retry(&self, id: NotificationId, not_before: DateTime<Utc>, sequence: u64) -> bool {
        let added = self.state.lock().push(id, not_before, sequence);
        if added {
            self.notify.notify_one();
        }
        added
    }

    /// Drop `id` from the index. Returns `true` if it was indexed.
    pub fn remove(&self, id: NotificationId) -> bool {
        let mut state = self.state.lock();
        let removed = state.members.remove(&id).is_some();
        if removed {
            state.compact_if_sparse();
        }
        removed
    }

    /// Up to `max` ids whose `not_before` has passed, earliest first. Never waits.
    pub fn dequeue_batch(&self, max: usize) -> Vec<NotificationId> {
        let now = self.clock.now();
        self.state.lock().pop_eligible(now, max)
    }

    /// Like `dequeue_batch`, but waits up to `max_wait` for something to become eligible.
    ///
    /// Returns an empty batch on timeout.
    pub async fn next_batch(&self, max: usize, max_wait: Duration) -> Vec<NotificationId> {
        let deadline = Instant::now() + max_wait;
        loop {
            // Register interest before checking, so an enqueue between the
            // check and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = self.clock.now();
            let (batch, next_due) = {
                let mut state = self.state.lock();
                let batch = state.pop_eligible(now, max);
                (batch, state.next_due())
            };
            if !batch.is_empty() {
                // Others may be waiting for what is left.
                if next_due.is_some_and(|due| due <= now) {
                    self.notify.notify_one();
                }
                return batch;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return batch;
            }
            let wait = next_due
                .and_then(|due| (due - now).to_std().ok())
                .map_or(remaining, |until_due| until_due.min(remaining));

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn commit_reserved(&self, id: NotificationId, not_before: DateTime<Utc>, sequence: u64) -> bool {
        let added = {
            let mut state = self.state.lock();
            state.reserved = state.reserved.saturating_sub(1);
            state.push(id, not_before, sequence)
        };
        if added {
            self.notify.notify_one();
        }
        added
    }

    fn release_reserved(&self) {
        let mut state = self.state.lock();
        state.reserved = state.reserved.saturating_sub(1);
    }
}

/// A reserved unit of queue capacity.
#[must_use = "dropping a Slot releases the reservation"]
pub struct Slot<'a> {
    queue: &'a DispatchQueue,
    armed: bool,
}

impl Slot<'_> {
    /// Turn the reservation into an indexed entry.
    pub fn commit(mut self, id: NotificationId, not_before: DateTime<Utc>, sequence: u64) -> bool {
        self.armed = false;
        self.queue.commit_reserved(id, not_before, sequence)
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.queue.release_reserved();
        }
    }
}

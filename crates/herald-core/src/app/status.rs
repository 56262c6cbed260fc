//! Status - counts for operators and reporting tools.

use serde::{Deserialize, Serialize};

use crate::domain::NotificationState;

/// Number of notifications per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: usize,
    pub queued: usize,
    pub sending: usize,
    pub sent: usize,
    pub failed: usize,
    pub invalid_token: usize,
}

impl StateCounts {
    pub fn record(&mut self, state: NotificationState) {
        *self.slot(state) += 1;
    }

    pub fn get(&self, state: NotificationState) -> usize {
        match state {
            NotificationState::Pending => self.pending,
            NotificationState::Queued => self.queued,
            NotificationState::Sending => self.sending,
            NotificationState::Sent => self.sent,
            NotificationState::Failed => self.failed,
            NotificationState::InvalidToken => self.invalid_token,
        }
    }

    pub fn total(&self) -> usize {
        NotificationState::ALL.iter().map(|s| self.get(*s)).sum()
    }

    /// Notifications that still have work ahead of them.
    pub fn in_progress(&self) -> usize {
        self.pending + self.queued + self.sending
    }

    fn slot(&mut self, state: NotificationState) -> &mut usize {
        match state {
            NotificationState::Pending => &mut self.pending,
            NotificationState::Queued => &mut self.queued,
            NotificationState::Sending => &mut self.sending,
            NotificationState::Sent => &mut self.sent,
            NotificationState::Failed => &mut self.failed,
            NotificationState::InvalidToken => &mut self.invalid_token,
        }
    }
}

impl FromIterator<NotificationState> for StateCounts {
    fn from_iter<I: IntoIterator<Item = NotificationState>>(iter: I) -> Self {
        let mut counts = StateCounts::default();
        for state in iter {
            counts.record(state);
        }
        counts
    }
}

/// Snapshot returned by `DispatchEngine::stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub states: StateCounts,
    /// Entries currently indexed by the dispatch queue (including delayed retries).
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub active_devices: usize,
    pub inactive_devices: usize,
}

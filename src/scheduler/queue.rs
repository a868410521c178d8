//! Per-conversation operation queue.

use crate::operation::{Operation, OperationId, Priority};
use tokio::time::Instant;

/// Summary of a conversation's pending work, handed to the host so it can
/// decide whether a push-notification wakeup is worth the battery cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeupContent {
    pub pending_count: usize,
    pub has_high_priority: bool,
    pub newest_creation_timestamp: i64,
}

/// Durable, ordered queue of pending operations for one conversation.
/// Ordering follows `Operation`'s `Ord` impl: invoke-ops, then synchronize,
/// then file pushes, then the rest by creation id.
#[derive(Default)]
pub struct OperationList {
    operations: Vec<Operation>,
    /// Set when the only pending work is deferrable; cleared once a
    /// high-priority op arrives, the peer connects, or the timer fires.
    deferred_until: Option<Instant>,
}

impl OperationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: Operation) {
        self.operations.push(op);
        self.operations.sort();
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn has_active(&self) -> bool {
        self.operations.iter().any(Operation::is_active)
    }

    pub fn has_only_deferrable(&self) -> bool {
        !self.operations.is_empty()
            && self
                .operations
                .iter()
                .all(|op| op.priority == Priority::Deferrable)
    }

    /// First operation that `can_execute` given the connection state,
    /// in queue order.
    pub fn first_executable(&self, connection_open: bool) -> Option<&Operation> {
        self.operations
            .iter()
            .find(|op| op.can_execute(connection_open))
    }

    pub fn first_executable_mut(&mut self, connection_open: bool) -> Option<&mut Operation> {
        self.operations
            .iter_mut()
            .find(|op| op.can_execute(connection_open))
    }

    pub fn get(&self, id: OperationId) -> Option<&Operation> {
        self.operations.iter().find(|op| op.id == id)
    }

    pub fn get_mut(&mut self, id: OperationId) -> Option<&mut Operation> {
        self.operations.iter_mut().find(|op| op.id == id)
    }

    /// Find the active operation matching a response's `requestId` and
    /// remove it from the queue.
    pub fn take_completed(&mut self, request_id: i64) -> Option<Operation> {
        let index = self
            .operations
            .iter()
            .position(|op| op.request_id == request_id)?;
        Some(self.operations.remove(index))
    }

    pub fn remove(&mut self, id: OperationId) -> Option<Operation> {
        let index = self.operations.iter().position(|op| op.id == id)?;
        Some(self.operations.remove(index))
    }

    pub fn set_deferred_deadline(&mut self, at: Instant) {
        self.deferred_until = Some(at);
    }

    pub fn clear_deferred_deadline(&mut self) {
        self.deferred_until = None;
    }

    pub fn deferred_deadline(&self) -> Option<Instant> {
        self.deferred_until
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter()
    }

    /// `None` when the queue is empty: there is nothing to wake a host for.
    pub fn wakeup_content(&self) -> Option<WakeupContent> {
        if self.operations.is_empty() {
            return None;
        }
        Some(WakeupContent {
            pending_count: self.operations.len(),
            has_high_priority: self
                .operations
                .iter()
                .any(|op| op.priority != Priority::Deferrable),
            newest_creation_timestamp: self
                .operations
                .iter()
                .map(|op| op.creation_timestamp)
                .max()
                .unwrap_or_default(),
        })
    }
}

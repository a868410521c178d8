//! The operation scheduler.
//!
//! A dispatch loop that polls a per-resource queue, hands ready work to
//! a transport, and reschedules on backoff, generalized to per-conversation
//! ordering and backoff.

pub mod backoff;
pub mod queue;

pub use backoff::{Backoff, BackoffOutcome};
pub use queue::{OperationList, WakeupContent};

use crate::connection::{ConnectionRegistry, TerminateReason};
use crate::error::ConvoResult;
use crate::operation::{ConversationId, Operation, OperationId};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

/// What the dispatch loop decided to do for a conversation.
#[derive(Debug)]
pub enum DispatchAction {
    /// Step 1: connection OPEN, no active operation — execute over the
    /// data channel with the freshly assigned request id.
    Execute { operation: Operation, request_id: i64 },
    /// Step 2: the head of the queue is an invoke-op — hand to the
    /// twincode-invocation transport without touching the connection.
    Invoke { operation: Operation },
    /// Step 3: connection CLOSED, pending work, not offline — open it.
    TriggerOpen,
    /// Step 4: nothing executable now; sleep until the deferred deadline.
    SleepUntil(Instant),
    /// Nothing to do.
    Idle,
}

/// Owns every conversation's operation queue and backoff state, and
/// consults the connection registry to decide what each conversation
/// should do next.
pub struct Scheduler {
    queues: DashMap<ConversationId, Mutex<OperationList>>,
    backoffs: DashMap<ConversationId, Mutex<Backoff>>,
    connections: Arc<ConnectionRegistry>,
    next_operation_id: std::sync::atomic::AtomicU64,
}

impl Scheduler {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        Self {
            queues: DashMap::new(),
            backoffs: DashMap::new(),
            connections,
            next_operation_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn next_operation_id(&self) -> OperationId {
        OperationId(
            self.next_operation_id
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst),
        )
    }

    /// Durably enqueue an operation. The caller must have already persisted
    /// the operation to the store before this is called (crash -> at-least-
    /// once retry); the scheduler itself holds only the in-memory mirror
    /// used for dispatch.
    pub async fn enqueue(&self, operation: Operation) {
        let conversation = operation.conversation_id;
        let list = self
            .queues
            .entry(conversation)
            .or_insert_with(|| Mutex::new(OperationList::new()));
        list.lock().await.push(operation);
    }

    /// `scheduleConversationOperations`: decide the next
    /// action for one conversation.
    pub async fn schedule_conversation_operations(
        &self,
        conversation: ConversationId,
        offline: bool,
    ) -> ConvoResult<DispatchAction> {
        let connection = self.connections.get_or_create(conversation);
        let connection_open = connection.is_open().await;

        let list_entry = self
            .queues
            .entry(conversation)
            .or_insert_with(|| Mutex::new(OperationList::new()));
        let mut list = list_entry.lock().await;

        if list.is_empty() {
            return Ok(DispatchAction::Idle);
        }

        if connection_open && !list.has_active() {
            if let Some(op) = list.first_executable_mut(true) {
                if !op.op_type.is_invoke() {
                    let request_id = connection.next_request_id();
                    op.request_id = request_id;
                    let operation = op.clone();
                    trace!(?conversation, request_id, "executing operation");
                    return Ok(DispatchAction::Execute {
                        operation,
                        request_id,
                    });
                }
            }
        }

        if let Some(op) = list.first_executable(connection_open) {
            if op.op_type.is_invoke() {
                let operation = op.clone();
                let id = operation.id;
                if let Some(slot) = list.get_mut(id) {
                    slot.request_id = 0;
                }
                return Ok(DispatchAction::Invoke { operation });
            }
        }

        if !connection_open && !offline && !list.has_active() {
            let should_open = !list.has_only_deferrable()
                || connection.is_open().await
                || list.deferred_deadline().is_some_and(|d| d <= Instant::now());
            if should_open {
                debug!(?conversation, "triggering open-outgoing");
                return Ok(DispatchAction::TriggerOpen);
            }
        }

        if let Some(deadline) = list.deferred_deadline() {
            return Ok(DispatchAction::SleepUntil(deadline));
        }

        Ok(DispatchAction::Idle)
    }

    /// Mark the operations in a conversation that have no urgent priority
    /// as deferrable-coalesced until `deadline`.
    pub async fn defer_until(&self, conversation: ConversationId, deadline: Instant) {
        if let Some(list) = self.queues.get(&conversation) {
            list.lock().await.set_deferred_deadline(deadline);
        }
    }

    /// Completion: a response frame matched by
    /// `(conversationId, requestId)` dequeues the operation so the caller
    /// can run its completion hook and pump the next one.
    pub async fn complete_operation(
        &self,
        conversation: ConversationId,
        request_id: i64,
    ) -> Option<Operation> {
        let list = self.queues.get(&conversation)?;
        let result = list.lock().await.take_completed(request_id);
        result
    }

    /// Cancel the active operation on a closed connection with `EXPIRED`:
    /// the operation is left in the queue for idempotent retry, only its
    /// request id is cleared.
    pub async fn cancel_active(&self, conversation: ConversationId) {
        if let Some(list) = self.queues.get(&conversation) {
            let mut list = list.lock().await;
            for op in list.iter().map(|o| o.id).collect::<Vec<_>>() {
                if let Some(slot) = list.get_mut(op) {
                    if slot.is_active() {
                        slot.request_id = crate::operation::NO_REQUEST;
                    }
                }
            }
        }
    }

    /// Advance backoff after a close and report whether/when to retry.
    pub async fn advance_backoff(
        &self,
        conversation: ConversationId,
        reason: TerminateReason,
    ) -> BackoffOutcome {
        let entry = self
            .backoffs
            .entry(conversation)
            .or_insert_with(|| Mutex::new(Backoff::default()));
        let result = entry.lock().await.advance(reason);
        result
    }

    /// Immediate retry permitted iff the reason allows it, the connection
    /// had been open, and there is pending work.
    pub async fn permits_immediate_retry(
        &self,
        conversation: ConversationId,
        reason: TerminateReason,
        was_open: bool,
    ) -> bool {
        if !reason.permits_immediate_retry() || !was_open {
            return false;
        }
        match self.queues.get(&conversation) {
            Some(list) => !list.lock().await.is_empty(),
            None => false,
        }
    }

    pub async fn pending_count(&self, conversation: ConversationId) -> usize {
        match self.queues.get(&conversation) {
            Some(list) => list.lock().await.len(),
            None => 0,
        }
    }

    /// Summary of a conversation's pending work for a host deciding whether
    /// a push-notification wakeup is worth sending while offline.
    pub async fn wakeup_content(&self, conversation: ConversationId) -> Option<WakeupContent> {
        let list = self.queues.get(&conversation)?;
        let result = list.lock().await.wakeup_content();
        result
    }
}

/// Opening timeout wiring: spawns a timer that cancels the active
/// open-outgoing attempt with `TIMEOUT` after `OPENING_TIMEOUT` elapses
/// unless cancelled first. A few hundred milliseconds of jitter keep a
/// reconnect storm (many conversations opening at once after a shared
/// transport outage) from timing out in lockstep.
pub fn opening_timeout_after() -> Duration {
    crate::connection::OPENING_TIMEOUT + Duration::from_millis(crate::util::jitter_millis(500))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationType;

    #[tokio::test]
    async fn closed_connection_with_pending_work_triggers_open() {
        let connections = Arc::new(ConnectionRegistry::new());
        let scheduler = Scheduler::new(connections);
        let conversation = ConversationId(1);
        scheduler
            .enqueue(Operation::new(
                OperationId(1),
                OperationType::PushObject,
                conversation,
                0,
                None,
            ))
            .await;
        let action = scheduler
            .schedule_conversation_operations(conversation, false)
            .await
            .unwrap();
        assert!(matches!(action, DispatchAction::TriggerOpen));
    }

    #[tokio::test]
    async fn open_connection_executes_head_of_queue() {
        let connections = Arc::new(ConnectionRegistry::new());
        let conversation = ConversationId(1);
        connections
            .get_or_create(conversation)
            .mark_outgoing_open(crate::identity::ProtocolVersion::CURRENT, false)
            .await;
        let scheduler = Scheduler::new(connections);
        scheduler
            .enqueue(Operation::new(
                OperationId(1),
                OperationType::PushObject,
                conversation,
                0,
                None,
            ))
            .await;
        let action = scheduler
            .schedule_conversation_operations(conversation, false)
            .await
            .unwrap();
        match action {
            DispatchAction::Execute { operation, .. } => assert_eq!(operation.id, OperationId(1)),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[tokio::test]
    async fn completion_dequeues_matching_request_id() {
        let connections = Arc::new(ConnectionRegistry::new());
        let conversation = ConversationId(1);
        let scheduler = Scheduler::new(connections);
        let mut op = Operation::new(OperationId(1), OperationType::PushObject, conversation, 0, None);
        op.request_id = 9;
        scheduler.enqueue(op).await;
        let completed = scheduler.complete_operation(conversation, 9).await;
        assert!(completed.is_some());
    }
}

//! Per-conversation connection state machine.
//!
//! A peer registry behind a `DashMap`/`RwLock` with heartbeat-driven status
//! transitions, and a negotiated-capability connection object, generalized
//! from a single global peer table to one state machine per conversation
//! with two independent directions.

use crate::error::{ConvoError, ConvoResult};
use crate::identity::{ProtocolVersion, ResourceId, TwincodeId};
use crate::operation::ConversationId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 30s opening timeout.
pub const OPENING_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionState {
    Closed,
    Opening,
    Open,
}

/// Why a direction closed. Drives both backoff (C5) and whether an
/// immediate retry is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    Success,
    Gone,
    Busy,
    Disconnected,
    ConnectivityError,
    Timeout,
    NotAuthorized,
    Revoked,
}

impl TerminateReason {
    /// Immediate retry iff `reason in {DISCONNECTED, CONNECTIVITY_ERROR} &&
    /// wasOpen && pendingOperations` — the `wasOpen`/`pendingOperations`
    /// halves of that predicate are evaluated by the scheduler, which knows
    /// both; this only covers the reason half.
    pub fn permits_immediate_retry(self) -> bool {
        matches!(
            self,
            TerminateReason::Disconnected | TerminateReason::ConnectivityError
        )
    }

    pub fn cancels_retries(self) -> bool {
        matches!(self, TerminateReason::NotAuthorized | TerminateReason::Revoked)
    }
}

/// One direction's negotiated state, valid only while `state == Open`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NegotiatedSession {
    pub peer_version: Option<ProtocolVersion>,
    pub peer_device_state: u64,
    pub leading_padding: bool,
    pub peer_resource_id: Option<ResourceId>,
    /// `peerTimestamp - senderTimestamp`, applied to every timestamp the
    /// peer reports from here on.
    pub time_correction_offset: i64,
}

struct Direction {
    state: DirectionState,
    session: NegotiatedSession,
}

impl Direction {
    fn new() -> Self {
        Self {
            state: DirectionState::Closed,
            session: NegotiatedSession::default(),
        }
    }
}

/// Chunked-file writer state for an in-progress receive,
/// owned by the connection because it is scoped to one peer channel.
#[derive(Debug, Clone)]
pub struct ChunkedWriter {
    pub descriptor_id: crate::descriptor::DescriptorId,
    pub next_chunk_start: u64,
}

/// The connection object for one conversation: two directions, negotiated
/// session state, request-id generator, and (while a group-incoming
/// session hasn't been re-homed yet) a link back to the transient group
/// conversation it is attached to.
pub struct ConversationConnection {
    outgoing: Mutex<Direction>,
    incoming: Mutex<Direction>,
    /// Single-flight guard: only one outgoing-open attempt per conversation.
    opening_lock: Mutex<()>,
    next_request_id: AtomicI64,
    estimated_rtt_millis: AtomicU64,
    group_incoming_of: Mutex<Option<ConversationId>>,
}

impl ConversationConnection {
    pub fn new() -> Self {
        Self {
            outgoing: Mutex::new(Direction::new()),
            incoming: Mutex::new(Direction::new()),
            opening_lock: Mutex::new(()),
            next_request_id: AtomicI64::new(0),
            estimated_rtt_millis: AtomicU64::new(0),
            group_incoming_of: Mutex::new(None),
        }
    }

    pub fn next_request_id(&self) -> i64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn estimated_rtt(&self) -> Duration {
        Duration::from_millis(self.estimated_rtt_millis.load(Ordering::Relaxed))
    }

    pub fn record_rtt_sample(&self, sample: Duration) {
        self.estimated_rtt_millis
            .store(sample.as_millis() as u64, Ordering::Relaxed);
    }

    pub async fn is_open(&self) -> bool {
        self.outgoing.lock().await.state == DirectionState::Open
            || self.incoming.lock().await.state == DirectionState::Open
    }

    /// Begin an outgoing open attempt. Returns `None` if another attempt is
    /// already in flight.
    pub async fn try_begin_opening_outgoing(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        self.opening_lock.try_lock().ok()
    }

    pub async fn mark_outgoing_opening(&self) {
        self.outgoing.lock().await.state = DirectionState::Opening;
    }

    /// Completes the outgoing open and, if the negotiated version supports
    /// it, returns the `SynchronizeIQ` payload the caller should send.
    pub async fn mark_outgoing_open(
        &self,
        peer_version: ProtocolVersion,
        leading_padding: bool,
    ) -> bool {
        let mut dir = self.outgoing.lock().await;
        dir.state = DirectionState::Open;
        dir.session.peer_version = Some(peer_version);
        dir.session.leading_padding = leading_padding;
        peer_version.supports_synchronize()
    }

    /// Open-incoming: preempt a still-OPENING previous
    /// incoming session with GONE, then move to OPENING.
    pub async fn begin_opening_incoming(&self) -> bool {
        let mut dir = self.incoming.lock().await;
        let preempted = dir.state == DirectionState::Opening;
        if preempted {
            warn!("preempting stalled incoming open with GONE");
        }
        dir.state = DirectionState::Opening;
        preempted
    }

    pub async fn mark_incoming_open(&self, peer_version: ProtocolVersion, leading_padding: bool) {
        let mut dir = self.incoming.lock().await;
        dir.state = DirectionState::Open;
        dir.session.peer_version = Some(peer_version);
        dir.session.leading_padding = leading_padding;
    }

    /// Apply the `OnSynchronizeIQ` reply: compute and store the peer-time
    /// correction offset, and detect a hard-reset resource-id change.
    /// Returns `true` if this is a hard reset.
    pub async fn apply_synchronize_reply(
        &self,
        outgoing: bool,
        peer_device_state: u64,
        peer_timestamp: i64,
        echoed_sender_timestamp: i64,
        peer_resource_id: ResourceId,
    ) -> bool {
        let mut dir = if outgoing {
            self.outgoing.lock().await
        } else {
            self.incoming.lock().await
        };
        dir.session.peer_device_state = peer_device_state;
        dir.session.time_correction_offset = peer_timestamp - echoed_sender_timestamp;
        let hard_reset = match dir.session.peer_resource_id {
            Some(previous) => previous != peer_resource_id,
            None => false,
        };
        dir.session.peer_resource_id = Some(peer_resource_id);
        hard_reset
    }

    pub async fn negotiated_session(&self, outgoing: bool) -> NegotiatedSession {
        if outgoing {
            self.outgoing.lock().await.session
        } else {
            self.incoming.lock().await.session
        }
    }

    pub async fn close(&self, outgoing: bool, reason: TerminateReason) {
        let mut dir = if outgoing {
            self.outgoing.lock().await
        } else {
            self.incoming.lock().await
        };
        debug!(?reason, outgoing, "closing connection direction");
        dir.state = DirectionState::Closed;
        dir.session = NegotiatedSession::default();
    }

    pub async fn both_closed(&self) -> bool {
        self.outgoing.lock().await.state == DirectionState::Closed
            && self.incoming.lock().await.state == DirectionState::Closed
    }

    pub async fn attach_group_incoming(&self, group: ConversationId) {
        *self.group_incoming_of.lock().await = Some(group);
    }

    pub async fn group_incoming_of(&self) -> Option<ConversationId> {
        *self.group_incoming_of.lock().await
    }

    pub async fn detach_group_incoming(&self) {
        *self.group_incoming_of.lock().await = None;
    }
}

impl Default for ConversationConnection {
    fn default() -> Self {
        Self::new()
    }
}

/// Effective version: `min(ours, theirs)`.
pub fn negotiate_version(ours: ProtocolVersion, theirs: ProtocolVersion) -> ProtocolVersion {
    ours.min(theirs)
}

/// Registry of connection objects, one per conversation, backed by a
/// `DashMap` since entries are independent and contention-free compared
/// to a single shared peer table behind one lock.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConversationId, std::sync::Arc<ConversationConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, conversation: ConversationId) -> std::sync::Arc<ConversationConnection> {
        self.connections
            .entry(conversation)
            .or_insert_with(|| std::sync::Arc::new(ConversationConnection::new()))
            .clone()
    }

    pub fn get(&self, conversation: ConversationId) -> Option<std::sync::Arc<ConversationConnection>> {
        self.connections.get(&conversation).map(|e| e.clone())
    }

    /// Re-homes a group-incoming connection once the peer's member identity
    /// is known: the connection object moves from the
    /// transient `group-incoming` key to the resolved `group-member` key.
    pub fn rehome_group_incoming(
        &self,
        transient: ConversationId,
        resolved: ConversationId,
    ) -> ConvoResult<()> {
        let (_, connection) = self
            .connections
            .remove(&transient)
            .ok_or(ConvoError::UnknownConversation(transient))?;
        info!(?transient, ?resolved, "re-homing group-incoming connection");
        self.connections.insert(resolved, connection);
        Ok(())
    }
}

/// Twincode identity exchanged during `SynchronizeIQ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynchronizePeerIdentity {
    pub sender_twincode_outbound_id: TwincodeId,
    pub resource_id: ResourceId,
    pub sender_timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outgoing_open_reports_synchronize_support() {
        let conn = ConversationConnection::new();
        let supports = conn
            .mark_outgoing_open(ProtocolVersion { major: 2, minor: 14 }, false)
            .await;
        assert!(supports);
        assert!(conn.is_open().await);
    }

    #[tokio::test]
    async fn legacy_peer_does_not_support_synchronize() {
        let conn = ConversationConnection::new();
        let supports = conn
            .mark_outgoing_open(ProtocolVersion { major: 2, minor: 5 }, true)
            .await;
        assert!(!supports);
    }

    #[tokio::test]
    async fn resource_id_change_is_detected_as_hard_reset() {
        let conn = ConversationConnection::new();
        conn.mark_outgoing_open(ProtocolVersion::CURRENT, false).await;
        let first = ResourceId::new_random();
        let hard_reset = conn
            .apply_synchronize_reply(true, 0, 1_000, 900, first)
            .await;
        assert!(!hard_reset);

        let second = ResourceId::new_random();
        let hard_reset = conn
            .apply_synchronize_reply(true, 0, 2_000, 1_900, second)
            .await;
        assert!(hard_reset);
    }

    #[tokio::test]
    async fn closing_both_directions_marks_connection_fully_closed() {
        let conn = ConversationConnection::new();
        conn.mark_outgoing_open(ProtocolVersion::CURRENT, false).await;
        assert!(!conn.both_closed().await);
        conn.close(true, TerminateReason::Success).await;
        conn.close(false, TerminateReason::Success).await;
        assert!(conn.both_closed().await);
    }

    #[test]
    fn negotiated_version_is_the_minimum() {
        let ours = ProtocolVersion { major: 2, minor: 14 };
        let theirs = ProtocolVersion { major: 2, minor: 10 };
        assert_eq!(negotiate_version(ours, theirs), theirs);
    }
}

//! Observer surface and the single observer-executor funnel: dispatch
//! observer callbacks through one funnel so tests can await determinism
//! instead of racing tokio::spawn.
//!
//! An event-bus pattern (a `tokio::sync::broadcast` channel fed by
//! internal state changes, drained by whoever is interested) adapted to
//! a bounded single-consumer channel so ordering is exactly enqueue order
//! rather than best-effort broadcast.

use crate::descriptor::{AnnotationType, DescriptorId};
use crate::identity::TwincodeId;
use crate::operation::ConversationId;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Timestamps,
    Content,
    Protection,
    LocalAnnotations,
}

/// One observer event. Kept as a flat enum, one variant per notification
/// rather than a trait-object callback per event.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    OnCreateConversation(ConversationId),
    OnDeleteConversation(ConversationId),
    OnCreateGroupConversation(ConversationId),
    OnDeleteGroupConversation(ConversationId),
    OnInviteGroup { group: ConversationId, descriptor: DescriptorId },
    OnInviteGroupRequest { group: ConversationId, from: TwincodeId },
    OnJoinGroup { group: ConversationId, member: TwincodeId },
    OnJoinGroupRequest { group: ConversationId, member: TwincodeId },
    OnJoinGroupResponse { group: ConversationId, accepted: bool },
    OnLeaveGroup { group: ConversationId, member: TwincodeId },
    OnResetConversation(ConversationId),
    OnPushDescriptor(DescriptorId),
    OnPopDescriptor(DescriptorId),
    OnUpdateDescriptor { descriptor: DescriptorId, kind: UpdateKind },
    OnMarkDescriptorRead(DescriptorId),
    OnMarkDescriptorDeleted(DescriptorId),
    OnDeleteDescriptors(ConversationId),
    OnUpdateAnnotation { descriptor: DescriptorId, kind: AnnotationType },
    OnSignatureInfo { group: ConversationId, member: TwincodeId, verified: bool },
    OnRevoked(ConversationId),
    OnError { request_id: i64, kind: crate::error::ProtocolErrorKind },
    OnKeySyncCompleted(crate::keysync::KeySyncTelemetry),
}

/// Single funnel all engine components publish through. Cloning is cheap
/// (an `mpsc::Sender`); every publisher shares one ordered channel so a
/// test awaiting `recv()` sees events in the exact order they were raised.
#[derive(Clone)]
pub struct ObserverBus {
    sender: mpsc::UnboundedSender<ObserverEvent>,
}

pub struct ObserverReceiver {
    receiver: mpsc::UnboundedReceiver<ObserverEvent>,
}

impl ObserverBus {
    pub fn channel() -> (ObserverBus, ObserverReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ObserverBus { sender }, ObserverReceiver { receiver })
    }

    /// Never blocks and never fails loudly: a dropped receiver (host not
    /// listening) must not take down the executor thread that raised the
    /// event, and callbacks must never run under any internal lock.
    pub fn notify(&self, event: ObserverEvent) {
        let _ = self.sender.send(event);
    }
}

impl ObserverReceiver {
    pub async fn recv(&mut self) -> Option<ObserverEvent> {
        self.receiver.recv().await
    }
}

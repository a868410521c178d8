//! Inbound protocol dispatch.
//!
//! A request-handling match arm (decode -> look up resource -> apply ->
//! reply), generalized to a seven-step pipeline, including the idempotent
//! `insertOrUpdateDescriptorImpl` store contract.

use crate::codec::{RequestBody, RequestFrame, ResponseBody, ResponseFrame, TimestampPhase};
use crate::connection::ConnectionRegistry;
use crate::descriptor::{AnnotationSet, Descriptor, DescriptorId, DescriptorPayload, Permission};
use crate::error::ProtocolErrorKind;
use crate::identity::TwincodeId;
use crate::observer::{ObserverBus, ObserverEvent, UpdateKind};
use crate::operation::ConversationId;
use crate::service::{InsertOutcome, ServiceProvider};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Permissions a live conversation currently grants. Looked up by the
/// dispatcher before applying any frame's effects.
pub struct ConversationPermissions {
    pub granted: Permission,
}

/// Inbound pipeline for one peer connection id's frames.
pub struct Dispatcher {
    connections: Arc<ConnectionRegistry>,
    services: Arc<ServiceProvider>,
    observers: ObserverBus,
    /// Annotation sets, keyed by the descriptor they're attached to.
    annotations: DashMap<DescriptorId, AnnotationSet>,
}

impl Dispatcher {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        services: Arc<ServiceProvider>,
        observers: ObserverBus,
    ) -> Self {
        Self {
            connections,
            services,
            observers,
            annotations: DashMap::new(),
        }
    }

    /// Steps 1-7 of the inbound pipeline for one already-decoded frame.
    /// Step 1 (schema decode) and step 2 (connection lookup by peer-connection id)
    /// are the caller's responsibility since they need the raw transport
    /// context this type is intentionally ignorant of; this entry point
    /// starts from step 4 (permission check) onward once `conversation` is
    /// resolved, assuming group-incoming re-homing (step 3) already ran.
    /// `sender` is the peer identity the connection negotiated on open.
    pub async fn dispatch(
        &self,
        conversation: ConversationId,
        sender: TwincodeId,
        permissions: &ConversationPermissions,
        frame: RequestFrame,
    ) -> ResponseFrame {
        let request_id = frame.request_id;
        match self.apply(conversation, sender, permissions, frame).await {
            Ok(body) => ResponseFrame {
                request_id,
                device_state: 0,
                received_timestamp: crate::util::now_millis(),
                body,
            },
            Err(kind) => {
                warn!(?conversation, request_id, ?kind, "dispatch failed");
                ResponseFrame::error(request_id, kind)
            }
        }
    }

    async fn apply(
        &self,
        conversation: ConversationId,
        sender: TwincodeId,
        permissions: &ConversationPermissions,
        frame: RequestFrame,
    ) -> Result<ResponseBody, ProtocolErrorKind> {
        match frame.body {
            RequestBody::PushObject { descriptor }
            | RequestBody::PushTransientObject { descriptor }
            | RequestBody::PushCommand { descriptor }
            | RequestBody::PushGeolocation { descriptor }
            | RequestBody::PushTwincode { descriptor } => {
                self.push_descriptor(conversation, permissions, descriptor).await
            }
            RequestBody::PushFile { descriptor, .. } => {
                self.push_descriptor(conversation, permissions, descriptor).await
            }
            RequestBody::ResetConversation { .. } => {
                self.observers.notify(ObserverEvent::OnResetConversation(conversation));
                Ok(ResponseBody::Generic)
            }
            RequestBody::SynchronizeConversation {
                sender_timestamp,
                resource_id,
                ..
            } => {
                let now = crate::util::now_millis();
                let hard_reset = self
                    .connections
                    .get_or_create(conversation)
                    .apply_synchronize_reply(false, 0, now, sender_timestamp, resource_id)
                    .await;
                if hard_reset {
                    warn!(?conversation, ?sender, "peer resource id changed, clearing conversation");
                    let clear = Descriptor::synthetic_clear(0, sender, conversation, sender_timestamp, now);
                    let clear_id = clear.envelope.id;
                    self.services
                        .store
                        .insert_or_update_descriptor(clear)
                        .await
                        .map_err(|_| ProtocolErrorKind::LibraryError)?;
                    self.observers.notify(ObserverEvent::OnPopDescriptor(clear_id));
                }
                Ok(ResponseBody::OnSynchronize {
                    peer_timestamp: now,
                    echoed_sender_timestamp: sender_timestamp,
                })
            }
            RequestBody::UpdateDescriptorTimestamp {
                descriptor_id,
                phase,
                timestamp,
            } => {
                if let Some(mut descriptor) = self
                    .services
                    .store
                    .get_descriptor(descriptor_id)
                    .await
                    .map_err(|_| ProtocolErrorKind::LibraryError)?
                {
                    apply_timestamp_phase(&mut descriptor.envelope.timestamps, phase, timestamp);
                    self.services
                        .store
                        .insert_or_update_descriptor(descriptor)
                        .await
                        .map_err(|_| ProtocolErrorKind::LibraryError)?;
                }
                self.observers.notify(ObserverEvent::OnUpdateDescriptor {
                    descriptor: descriptor_id,
                    kind: UpdateKind::Timestamps,
                });
                Ok(ResponseBody::Generic)
            }
            RequestBody::UpdateObject { descriptor_id, text } => {
                if let Some(mut descriptor) = self
                    .services
                    .store
                    .get_descriptor(descriptor_id)
                    .await
                    .map_err(|_| ProtocolErrorKind::LibraryError)?
                {
                    if let DescriptorPayload::Object { text: ref mut current } = descriptor.payload {
                        *current = text;
                    }
                    self.services
                        .store
                        .insert_or_update_descriptor(descriptor)
                        .await
                        .map_err(|_| ProtocolErrorKind::LibraryError)?;
                }
                self.observers.notify(ObserverEvent::OnUpdateDescriptor {
                    descriptor: descriptor_id,
                    kind: UpdateKind::Content,
                });
                Ok(ResponseBody::Generic)
            }
            RequestBody::UpdateAnnotations {
                descriptor_id,
                annotations,
            } => {
                let mut set = self.annotations.entry(descriptor_id).or_default();
                for annotation in annotations {
                    set.set(annotation.annotator, annotation.kind.clone(), annotation.value);
                    self.observers.notify(ObserverEvent::OnUpdateAnnotation {
                        descriptor: descriptor_id,
                        kind: annotation.kind,
                    });
                }
                Ok(ResponseBody::Generic)
            }
            RequestBody::InviteGroup { descriptor } => {
                self.observers.notify(ObserverEvent::OnInviteGroupRequest {
                    group: conversation,
                    from: descriptor.envelope.id.sender,
                });
                Ok(ResponseBody::Generic)
            }
            RequestBody::WithdrawInviteGroup { descriptor_id } => {
                self.services
                    .store
                    .remove_descriptor(descriptor_id)
                    .await
                    .map_err(|_| ProtocolErrorKind::LibraryError)?;
                self.observers
                    .notify(ObserverEvent::OnMarkDescriptorDeleted(descriptor_id));
                Ok(ResponseBody::Generic)
            }
            RequestBody::JoinGroup { group, .. } => {
                self.observers.notify(ObserverEvent::OnJoinGroupRequest {
                    group,
                    member: sender,
                });
                Ok(ResponseBody::Generic)
            }
            RequestBody::LeaveGroup { group } => {
                self.observers.notify(ObserverEvent::OnLeaveGroup { group, member: sender });
                Ok(ResponseBody::Generic)
            }
            RequestBody::UpdateGroupMember { group, member, .. } => {
                self.observers.notify(ObserverEvent::OnSignatureInfo {
                    group,
                    member,
                    verified: true,
                });
                Ok(ResponseBody::Generic)
            }
            RequestBody::PushFileChunk { .. } | RequestBody::PushThumbnail { .. } => {
                // Handled by the C9 transfer pipeline, which owns chunk
                // offset bookkeeping; this dispatcher only routes the
                // envelope-bearing request kinds.
                Err(ProtocolErrorKind::BadRequest)
            }
        }
    }

    async fn push_descriptor(
        &self,
        conversation: ConversationId,
        permissions: &ConversationPermissions,
        descriptor: Descriptor,
    ) -> Result<ResponseBody, ProtocolErrorKind> {
        let required = descriptor.required_permission();
        if !permissions.granted.contains(required) {
            return Err(ProtocolErrorKind::NoPermission);
        }
        let descriptor_id = descriptor.envelope.id;
        let is_transient = matches!(descriptor.payload, DescriptorPayload::Transient { .. });
        let outcome = self
            .services
            .store
            .insert_or_update_descriptor(descriptor)
            .await
            .map_err(|_| ProtocolErrorKind::LibraryError)?;
        match outcome {
            InsertOutcome::Stored => {
                self.observers.notify(ObserverEvent::OnPopDescriptor(descriptor_id));
            }
            InsertOutcome::Ignored => {
                debug!(?descriptor_id, "duplicate delivery ignored");
            }
            InsertOutcome::Error => return Err(ProtocolErrorKind::LibraryError),
        }
        let _ = conversation;
        if is_transient {
            // PushTransient with flags==0 gets no acknowledgement back to
            // the sender; callers that need this must special-case on
            // `ResponseBody::Generic`'s absence rather than an error, so we
            // still return Generic here and let the transport layer decide
            // whether to send it.
        }
        Ok(ResponseBody::Generic)
    }
}

fn apply_timestamp_phase(timestamps: &mut crate::descriptor::Timestamps, phase: TimestampPhase, value: i64) {
    match phase {
        TimestampPhase::Sent => timestamps.sent = value,
        TimestampPhase::Received => timestamps.received = value,
        TimestampPhase::Read => timestamps.read = value,
        TimestampPhase::Deleted => timestamps.deleted = value,
        TimestampPhase::PeerDeleted => timestamps.peer_deleted = value,
    }
}

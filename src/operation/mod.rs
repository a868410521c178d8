//! Durable outbound operations (C3) and their priority taxonomy.

use crate::codec::{schema_id, RequestBody, RequestFrame};
use crate::descriptor::{Descriptor, DescriptorId, DescriptorPayload};
use crate::error::{ConvoError, ConvoResult};
use crate::identity::{ResourceId, TwincodeId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// No request-id assigned: the operation is idle, not in flight.
pub const NO_REQUEST: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub u64);

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub u64);

/// Operation type taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    ResetConversation,
    SynchronizeConversation,
    PushObject,
    PushTransientObject,
    PushCommand,
    PushFile,
    PushGeolocation,
    PushTwincode,
    UpdateDescriptorTimestamp,
    UpdateObject,
    UpdateAnnotations,
    InviteGroup,
    WithdrawInviteGroup,
    JoinGroup,
    LeaveGroup,
    UpdateGroupMember,
    InvokeJoinGroup,
    InvokeAddMember,
    InvokeLeaveGroup,
}

impl OperationType {
    /// `isInvoke()` returns true for the three invocation-only types: they
    /// do not require a data channel and dispatch through the
    /// twincode-invocation transport.
    pub fn is_invoke(self) -> bool {
        matches!(
            self,
            OperationType::InvokeJoinGroup
                | OperationType::InvokeAddMember
                | OperationType::InvokeLeaveGroup
        )
    }

    /// Ordering rank used by `OperationList`: invoke-ops first, then
    /// synchronize, then file pushes, then everything else by creation id.
    fn rank(self) -> u8 {
        if self.is_invoke() {
            0
        } else if matches!(self, OperationType::SynchronizeConversation) {
            1
        } else if matches!(self, OperationType::PushFile) {
            2
        } else {
            3
        }
    }
}

/// `UPDATE_DESCRIPTOR_TIMESTAMP` with no expiry and some reset modes are
/// low priority: the scheduler coalesces them rather than opening a
/// connection just to carry them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Normal,
    Deferrable,
}

/// A durable unit of outbound work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub op_type: OperationType,
    pub conversation_id: ConversationId,
    pub creation_timestamp: i64,
    pub descriptor_id: Option<DescriptorId>,
    pub request_id: i64,
    pub priority: Priority,
    /// Chunk-transfer cursor for `PUSH_FILE`. `None` means
    /// `NOT_INITIALIZED` (still waiting for the peer's accept/reject of the
    /// push-file frame); `Some(0)` means chunking has started at offset 0.
    pub chunk_start: Option<u64>,
}

impl Operation {
    pub fn new(
        id: OperationId,
        op_type: OperationType,
        conversation_id: ConversationId,
        creation_timestamp: i64,
        descriptor_id: Option<DescriptorId>,
    ) -> Self {
        let chunk_start = if matches!(op_type, OperationType::PushFile) {
            None
        } else {
            Some(0)
        };
        Self {
            id,
            op_type,
            conversation_id,
            creation_timestamp,
            descriptor_id,
            request_id: NO_REQUEST,
            priority: Priority::Normal,
            chunk_start,
        }
    }

    pub fn deferrable(mut self) -> Self {
        self.priority = Priority::Deferrable;
        self
    }

    pub fn is_active(&self) -> bool {
        self.request_id != NO_REQUEST
    }

    /// `canExecute(conversation)`: true when idle AND
    /// (invoke-type OR the connection is OPEN).
    pub fn can_execute(&self, connection_open: bool) -> bool {
        !self.is_active() && (self.op_type.is_invoke() || connection_open)
    }

    fn sort_key(&self) -> (u8, u64) {
        (self.op_type.rank(), self.id.0)
    }

    /// Maps this operation to the `(schemaId, RequestFrame)` pair the
    /// schema registry encodes, pulling whatever payload data the
    /// operation itself doesn't carry from the already-resolved descriptor
    /// and the caller-supplied local identity.
    ///
    /// A handful of types need data this crate has nowhere to store yet
    /// (`UpdateDescriptorTimestamp`'s phase, `UpdateAnnotations`'s rows,
    /// `JoinGroup`'s public key, `UpdateGroupMember`'s permission set) —
    /// those return `ConvoError::Internal` rather than guess at a shape.
    pub fn to_request_frame(
        &self,
        descriptor: Option<Descriptor>,
        local_resource_id: ResourceId,
        local_outbound: TwincodeId,
    ) -> ConvoResult<(Uuid, RequestFrame)> {
        let need_descriptor = |d: &Option<Descriptor>| -> ConvoResult<Descriptor> {
            d.clone().ok_or_else(|| {
                ConvoError::Internal(format!(
                    "operation {:?} requires its descriptor to be resolved before encoding",
                    self.op_type
                ))
            })
        };
        let unrepresented = || {
            ConvoError::Internal(format!(
                "operation {:?} has no wire encoding: required fields aren't modeled on Operation",
                self.op_type
            ))
        };

        let (id, body) = match self.op_type {
            OperationType::ResetConversation => (
                schema_id::RESET_CONVERSATION,
                RequestBody::ResetConversation {
                    clear_up_to: self.creation_timestamp,
                },
            ),
            OperationType::SynchronizeConversation => (
                schema_id::SYNCHRONIZE_CONVERSATION,
                RequestBody::SynchronizeConversation {
                    sender_twincode_outbound_id: local_outbound,
                    resource_id: local_resource_id,
                    sender_timestamp: self.creation_timestamp,
                },
            ),
            OperationType::PushObject => (
                schema_id::PUSH_OBJECT,
                RequestBody::PushObject {
                    descriptor: need_descriptor(&descriptor)?,
                },
            ),
            OperationType::PushTransientObject => (
                schema_id::PUSH_TRANSIENT_OBJECT,
                RequestBody::PushTransientObject {
                    descriptor: need_descriptor(&descriptor)?,
                },
            ),
            OperationType::PushCommand => (
                schema_id::PUSH_COMMAND,
                RequestBody::PushCommand {
                    descriptor: need_descriptor(&descriptor)?,
                },
            ),
            OperationType::PushFile => (
                schema_id::PUSH_FILE,
                RequestBody::PushFile {
                    descriptor: need_descriptor(&descriptor)?,
                    thumbnail: None,
                },
            ),
            OperationType::PushGeolocation => (
                schema_id::PUSH_GEOLOCATION,
                RequestBody::PushGeolocation {
                    descriptor: need_descriptor(&descriptor)?,
                },
            ),
            OperationType::PushTwincode => (
                schema_id::PUSH_TWINCODE,
                RequestBody::PushTwincode {
                    descriptor: need_descriptor(&descriptor)?,
                },
            ),
            OperationType::InviteGroup => (
                schema_id::INVITE_GROUP,
                RequestBody::InviteGroup {
                    descriptor: need_descriptor(&descriptor)?,
                },
            ),
            OperationType::WithdrawInviteGroup => (
                schema_id::WITHDRAW_INVITE_GROUP,
                RequestBody::WithdrawInviteGroup {
                    descriptor_id: self.descriptor_id.ok_or_else(unrepresented)?,
                },
            ),
            OperationType::LeaveGroup => (
                schema_id::LEAVE_GROUP,
                RequestBody::LeaveGroup {
                    group: self.conversation_id,
                },
            ),
            OperationType::UpdateObject => {
                let descriptor = need_descriptor(&descriptor)?;
                let text = match descriptor.payload {
                    DescriptorPayload::Object { text } => text,
                    _ => return Err(unrepresented()),
                };
                (
                    schema_id::UPDATE_OBJECT,
                    RequestBody::UpdateObject {
                        descriptor_id: descriptor.envelope.id,
                        text,
                    },
                )
            }
            OperationType::UpdateDescriptorTimestamp
            | OperationType::UpdateAnnotations
            | OperationType::JoinGroup
            | OperationType::UpdateGroupMember => return Err(unrepresented()),
            OperationType::InvokeJoinGroup
            | OperationType::InvokeAddMember
            | OperationType::InvokeLeaveGroup => {
                return Err(ConvoError::Internal(
                    "invoke-only operations never produce a data-channel frame".into(),
                ))
            }
        };
        Ok((
            id,
            RequestFrame {
                request_id: self.request_id,
                body,
            },
        ))
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Operation {}

impl PartialOrd for Operation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Operation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(id: u64, ty: OperationType) -> Operation {
        Operation::new(OperationId(id), ty, ConversationId(1), id as i64, None)
    }

    #[test]
    fn ordering_places_invoke_before_sync_before_push_file_before_rest() {
        let mut ops = vec![
            op(4, OperationType::PushObject),
            op(3, OperationType::PushFile),
            op(2, OperationType::SynchronizeConversation),
            op(1, OperationType::InvokeJoinGroup),
        ];
        ops.sort();
        let order: Vec<_> = ops.iter().map(|o| o.id.0).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
    }

    #[test]
    fn can_execute_requires_idle_and_open_unless_invoke() {
        let mut push = op(1, OperationType::PushObject);
        assert!(!push.can_execute(false));
        assert!(push.can_execute(true));
        push.request_id = 5;
        assert!(!push.can_execute(true));

        let invoke = op(2, OperationType::InvokeAddMember);
        assert!(invoke.can_execute(false));
    }

    fn sample_descriptor(op: &Operation) -> Descriptor {
        Descriptor::new_for_send(
            op.descriptor_id.unwrap(),
            op.conversation_id,
            op.creation_timestamp,
            DescriptorPayload::Object { text: "hi".into() },
        )
    }

    #[test]
    fn push_object_encodes_with_its_descriptor() {
        let mut operation = op(1, OperationType::PushObject);
        operation.descriptor_id = Some(DescriptorId {
            database_id: 1,
            sender: TwincodeId::new_random(),
            sequence_id: 1,
        });
        let descriptor = sample_descriptor(&operation);
        let (id, frame) = operation
            .to_request_frame(Some(descriptor), ResourceId::default(), TwincodeId::new_random())
            .unwrap();
        assert_eq!(id, schema_id::PUSH_OBJECT);
        assert!(matches!(frame.body, RequestBody::PushObject { .. }));
    }

    #[test]
    fn push_object_without_a_resolved_descriptor_is_an_error() {
        let operation = op(1, OperationType::PushObject);
        let result = operation.to_request_frame(None, ResourceId::default(), TwincodeId::new_random());
        assert!(matches!(result, Err(ConvoError::Internal(_))));
    }

    #[test]
    fn synchronize_conversation_carries_the_local_identity() {
        let operation = op(1, OperationType::SynchronizeConversation);
        let resource_id = ResourceId::default();
        let outbound = TwincodeId::new_random();
        let (id, frame) = operation.to_request_frame(None, resource_id, outbound).unwrap();
        assert_eq!(id, schema_id::SYNCHRONIZE_CONVERSATION);
        match frame.body {
            RequestBody::SynchronizeConversation {
                resource_id: got_resource,
                sender_twincode_outbound_id: got_outbound,
                ..
            } => {
                assert_eq!(got_resource, resource_id);
                assert_eq!(got_outbound, outbound);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn update_group_member_has_no_wire_encoding_yet() {
        let operation = op(1, OperationType::UpdateGroupMember);
        let result = operation.to_request_frame(None, ResourceId::default(), TwincodeId::new_random());
        assert!(matches!(result, Err(ConvoError::Internal(_))));
    }
}

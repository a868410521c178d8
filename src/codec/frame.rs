//! Wire frame header and the fixed set of request/response bodies.
//!
//! An envelope-plus-payload shape generalized from JSON to a versioned
//! binary framing.

use crate::descriptor::{Annotation, Descriptor, DescriptorId, Permission};
use crate::error::ProtocolErrorKind;
use crate::identity::{ResourceId, TwincodeId};
use crate::operation::ConversationId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `(schemaId, schemaVersion)` — the key the registry (C1) dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaKey {
    pub schema_id: Uuid,
    pub schema_version: u32,
}

/// A decoded frame: header plus opaque payload bytes, before the registry
/// looks up a deserializer for `header.key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFrame {
    pub key: SchemaKey,
    pub payload: Vec<u8>,
}

impl RawFrame {
    /// Encode `[optional leading padding] schemaId schemaVersion payload`.
    /// `leading_padding` mirrors the transport-negotiated flag for peers
    /// expecting the older non-compact encoder.
    pub fn encode(&self, leading_padding: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 24);
        if leading_padding {
            out.extend_from_slice(&[0u8; 4]);
        }
        out.extend_from_slice(self.key.schema_id.as_bytes());
        out.extend_from_slice(&self.key.schema_version.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8], leading_padding: bool) -> Result<RawFrame, crate::error::ConvoError> {
        let mut cursor = if leading_padding { 4 } else { 0 };
        if bytes.len() < cursor + 16 + 4 {
            return Err(crate::error::ConvoError::FrameDecode {
                reason: "frame too short for header".into(),
            });
        }
        let schema_id = Uuid::from_slice(&bytes[cursor..cursor + 16]).map_err(|e| {
            crate::error::ConvoError::FrameDecode {
                reason: e.to_string(),
            }
        })?;
        cursor += 16;
        let schema_version = u32::from_be_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
        cursor += 4;
        Ok(RawFrame {
            key: SchemaKey {
                schema_id,
                schema_version,
            },
            payload: bytes[cursor..].to_vec(),
        })
    }
}

/// Request payload bodies, one per data-channel operation type, minus the
/// three invoke-only types (which never touch a frame), plus the
/// file-chunk and thumbnail sub-protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestBody {
    ResetConversation {
        clear_up_to: i64,
    },
    SynchronizeConversation {
        sender_twincode_outbound_id: TwincodeId,
        resource_id: ResourceId,
        sender_timestamp: i64,
    },
    PushObject {
        descriptor: Descriptor,
    },
    PushTransientObject {
        descriptor: Descriptor,
    },
    PushCommand {
        descriptor: Descriptor,
    },
    PushFile {
        descriptor: Descriptor,
        thumbnail: Option<Vec<u8>>,
    },
    PushFileChunk {
        descriptor_id: DescriptorId,
        chunk_start: u64,
        sender_timestamp: i64,
        chunk_bytes: Vec<u8>,
    },
    PushThumbnail {
        descriptor_id: DescriptorId,
        chunk_start: u64,
        sender_timestamp: i64,
        chunk_bytes: Vec<u8>,
    },
    PushGeolocation {
        descriptor: Descriptor,
    },
    PushTwincode {
        descriptor: Descriptor,
    },
    UpdateDescriptorTimestamp {
        descriptor_id: DescriptorId,
        phase: TimestampPhase,
        timestamp: i64,
    },
    UpdateObject {
        descriptor_id: DescriptorId,
        text: String,
    },
    UpdateAnnotations {
        descriptor_id: DescriptorId,
        annotations: Vec<Annotation>,
    },
    InviteGroup {
        descriptor: Descriptor,
    },
    WithdrawInviteGroup {
        descriptor_id: DescriptorId,
    },
    JoinGroup {
        group: ConversationId,
        member_public_key: Vec<u8>,
    },
    LeaveGroup {
        group: ConversationId,
    },
    UpdateGroupMember {
        group: ConversationId,
        member: TwincodeId,
        permissions: Permission,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampPhase {
    Sent,
    Received,
    Read,
    Deleted,
    PeerDeleted,
}

/// The request, with its correlating `requestId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub request_id: i64,
    pub body: RequestBody,
}

/// Every response mirrors the `OnPush*IQ` layout:
/// `requestId | deviceState | receivedTimestamp [| operation-specific]`.
/// `received_timestamp = -1` signals permanent failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub request_id: i64,
    pub device_state: u64,
    pub received_timestamp: i64,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseBody {
    Generic,
    OnSynchronize {
        peer_timestamp: i64,
        echoed_sender_timestamp: i64,
    },
    /// Reply to `PushFile`: `received > 0` accepted (start chunking at 0),
    /// `received < 0` rejected.
    OnPushFile,
    /// Reply to a chunk: next expected `chunkStart`, file length to stop,
    /// or `i64::MAX` to abort.
    OnPushFileChunk {
        echo_sender_timestamp: i64,
        next_chunk_start: i64,
    },
    Error {
        kind: ProtocolErrorKind,
    },
}

impl ResponseFrame {
    pub fn error(request_id: i64, kind: ProtocolErrorKind) -> ResponseFrame {
        ResponseFrame {
            request_id,
            device_state: 0,
            received_timestamp: -1,
            body: ResponseBody::Error { kind },
        }
    }

    pub fn is_failure(&self) -> bool {
        self.received_timestamp < 0
    }
}

//! Descriptor variants.
//!
//! Modeled as a tagged sum with the shared `Envelope` embedded in each
//! wrapping `Descriptor` variant, rather than deep inheritance.
//! Serialization dispatch is by tag and each variant carries its required
//! permission as data rather than a virtual method.

use crate::descriptor::envelope::{DescriptorFlags, DescriptorId, Envelope};
use crate::descriptor::permission::Permission;
use crate::identity::TwincodeId;
use crate::operation::ConversationId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationState {
    Pending,
    Accepted,
    Withdrawn,
    Declined,
}

/// The payload carried by a descriptor, one variant per descriptor kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DescriptorPayload {
    Object {
        text: String,
    },
    File {
        file_name: String,
        file_size: u64,
        mime_type: String,
    },
    NamedFile {
        file_name: String,
        file_size: u64,
        mime_type: String,
        display_name: String,
    },
    Audio {
        file_name: String,
        file_size: u64,
        duration_ms: u64,
    },
    Image {
        file_name: String,
        file_size: u64,
        width: u32,
        height: u32,
    },
    Video {
        file_name: String,
        file_size: u64,
        width: u32,
        height: u32,
        duration_ms: u64,
    },
    Geolocation {
        latitude: f64,
        longitude: f64,
        accuracy_m: f32,
    },
    TwincodeReference {
        twincode: TwincodeId,
    },
    Call {
        video: bool,
        accepted: bool,
    },
    /// Peer's request to clear a conversation up to a timestamp; pushed via
    /// a reset operation, popped locally as a synthetic descriptor with
    /// sequence number 1.
    Clear {
        up_to_timestamp: i64,
    },
    Invitation {
        group: ConversationId,
        state: InvitationState,
    },
    /// Never persisted; exists only for in-flight command and
    /// push-transient semantics.
    Transient {
        command: Vec<u8>,
    },
}

impl DescriptorPayload {
    /// Each variant declares its required permission. The
    /// core refuses to create or accept a descriptor whose permission is
    /// not granted on the conversation.
    pub fn required_permission(&self) -> Permission {
        match self {
            DescriptorPayload::Object { .. } => Permission::SEND_MESSAGE,
            DescriptorPayload::File { .. } | DescriptorPayload::NamedFile { .. } => {
                Permission::SEND_FILE
            }
            DescriptorPayload::Audio { .. } => Permission::SEND_AUDIO,
            DescriptorPayload::Image { .. } => Permission::SEND_IMAGE,
            DescriptorPayload::Video { .. } => Permission::SEND_VIDEO,
            DescriptorPayload::Geolocation { .. } => Permission::SEND_GEOLOCATION,
            DescriptorPayload::TwincodeReference { .. } => Permission::SEND_TWINCODE,
            DescriptorPayload::Call { .. } => Permission::SEND_COMMAND,
            DescriptorPayload::Clear { .. } => Permission::SEND_COMMAND,
            DescriptorPayload::Invitation { .. } => Permission::SEND_COMMAND,
            DescriptorPayload::Transient { .. } => Permission::SEND_COMMAND,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DescriptorPayload::Transient { .. })
    }

    /// Whether this payload requires a wire feature only present from a
    /// given negotiated minor version. `reply_to`/`expire_timeout` on `Object` are the example the
    /// spec calls out; model it generically via the capability matrix in
    /// `crate::codec::registry`.
    pub fn wire_tag(&self) -> &'static str {
        match self {
            DescriptorPayload::Object { .. } => "object",
            DescriptorPayload::File { .. } => "file",
            DescriptorPayload::NamedFile { .. } => "named_file",
            DescriptorPayload::Audio { .. } => "audio",
            DescriptorPayload::Image { .. } => "image",
            DescriptorPayload::Video { .. } => "video",
            DescriptorPayload::Geolocation { .. } => "geolocation",
            DescriptorPayload::TwincodeReference { .. } => "twincode",
            DescriptorPayload::Call { .. } => "call",
            DescriptorPayload::Clear { .. } => "clear",
            DescriptorPayload::Invitation { .. } => "invitation",
            DescriptorPayload::Transient { .. } => "transient",
        }
    }
}

/// A full descriptor: envelope + variant payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub envelope: Envelope,
    pub payload: DescriptorPayload,
}

impl Descriptor {
    pub fn new_for_send(
        id: DescriptorId,
        conversation_id: ConversationId,
        created: i64,
        payload: DescriptorPayload,
    ) -> Self {
        Self {
            envelope: Envelope::new(id, conversation_id, created),
            payload,
        }
    }

    /// Construct-for-receive: the same shape, but timestamps start from the
    /// peer's reported creation time rather than ours.
    pub fn new_for_receive(
        id: DescriptorId,
        conversation_id: ConversationId,
        peer_created: i64,
        payload: DescriptorPayload,
    ) -> Self {
        Self::new_for_send(id, conversation_id, peer_created, payload)
    }

    pub fn required_permission(&self) -> Permission {
        self.payload.required_permission()
    }

    /// `createForward(newId, cid, expireTimeout, sendTo, copyAllowed)`
    ///: produces a sibling descriptor for forwarding.
    pub fn create_forward(
        &self,
        new_id: DescriptorId,
        conversation_id: ConversationId,
        expire_timeout: u64,
        send_to: Option<TwincodeId>,
        copy_allowed: bool,
    ) -> Descriptor {
        Descriptor {
            envelope: self.envelope.create_forward(
                new_id,
                conversation_id,
                expire_timeout,
                send_to,
                copy_allowed,
            ),
            payload: self.payload.clone(),
        }
    }

    /// Build the synthetic `ClearDescriptor` popped locally on reset.
    pub fn synthetic_clear(
        database_id: u64,
        sender: TwincodeId,
        conversation_id: ConversationId,
        up_to_timestamp: i64,
        now: i64,
    ) -> Descriptor {
        let id = DescriptorId::synthetic_clear(database_id, sender);
        let mut envelope = Envelope::new(id, conversation_id, now);
        envelope.flags |= DescriptorFlags::empty();
        Descriptor {
            envelope,
            payload: DescriptorPayload::Clear { up_to_timestamp },
        }
    }
}

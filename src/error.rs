//! Unified error handling for the conversation engine.
//!
//! One `thiserror` enum per failure family, each variant carrying
//! structured context rather than a bare string.

use crate::descriptor::DescriptorId;
use crate::operation::{ConversationId, OperationId};
use thiserror::Error;

/// Result alias used throughout the crate.
pub type ConvoResult<T> = Result<T, ConvoError>;

/// Top level error type for all engine operations.
#[derive(Error, Debug)]
pub enum ConvoError {
    // Codec errors (C1)
    #[error("unknown schema (id={schema_id}, version={schema_version})")]
    UnknownSchema {
        schema_id: uuid::Uuid,
        schema_version: u32,
    },

    #[error("frame decode failed: {reason}")]
    FrameDecode { reason: String },

    #[error("frame encode failed: {reason}")]
    FrameEncode { reason: String },

    // Descriptor errors (C2)
    #[error("conversation {conversation} does not grant permission {permission:?} required for this descriptor")]
    PermissionDenied {
        conversation: ConversationId,
        permission: crate::descriptor::Permission,
    },

    #[error("descriptor {0:?} not found")]
    DescriptorNotFound(DescriptorId),

    // Operation / scheduler errors (C3, C5)
    #[error("operation {0:?} not found")]
    OperationNotFound(OperationId),

    #[error("conversation {0:?} already has an active (in-flight) operation")]
    OperationAlreadyActive(ConversationId),

    #[error("conversation {0:?} unknown to the engine")]
    UnknownConversation(ConversationId),

    // Connection errors (C4)
    #[error("connection for conversation {0:?} is not open")]
    ConnectionNotOpen(ConversationId),

    #[error("peer connection open timed out after {0:?}")]
    OpeningTimeout(std::time::Duration),

    #[error("duplicate open incoming connection for peer connection id {0}")]
    DuplicateIncoming(u64),

    // Key-sync errors (C6)
    #[error("key-sync step {step} failed: {reason}")]
    KeySync { step: &'static str, reason: String },

    // Group errors (C8)
    #[error("group {group:?} signature verification failed for member {member:?}")]
    InvalidAttestation {
        group: ConversationId,
        member: crate::identity::TwincodeId,
    },

    #[error("member {0:?} is not known to group {1:?}")]
    UnknownGroupMember(crate::identity::TwincodeId, ConversationId),

    // File transfer errors (C9)
    #[error("no storage space available for descriptor {0:?}")]
    NoStorageSpace(DescriptorId),

    #[error("chunk out of order: expected {expected}, got {got}")]
    ChunkOutOfOrder { expected: u64, got: u64 },

    // Config I/O
    #[error("config file error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("config deserialization failed: {0}")]
    ConfigJson(#[from] serde_json::Error),

    // External collaborator failures, surfaced through the abstract service traits
    #[error("crypto service error: {0}")]
    Crypto(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("twincode directory error: {0}")]
    Twincode(String),

    /// Storage corruption or other conditions that are genuinely fatal and
    /// cannot be modeled as a protocol-level error kind.
    #[error("fatal internal error: {0}")]
    Internal(String),
}

/// Error kinds carried *on the wire*. These are protocol data,
/// never a Rust error by themselves — the dispatcher and scheduler match on
/// them to decide whether to surface, retry, or convert into a `ConvoError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ProtocolErrorKind {
    Success,
    Queued,
    BadRequest,
    ItemNotFound,
    NoPermission,
    NoStorageSpace,
    FileNotFound,
    FileNotSupported,
    Expired,
    LimitReached,
    ServiceUnavailable,
    FeatureNotSupportedByPeer,
    NotAuthorizedOperation,
    NoPublicKey,
    NoPrivateKey,
    NoSecretKey,
    NotEncrypted,
    DecryptError,
    LibraryError,
    TwinlifeOffline,
    TimeoutError,
    FeatureNotImplemented,
    Revoked,
}

impl ProtocolErrorKind {
    /// `TWINLIFE_OFFLINE` must never be acknowledged to the peer — the
    /// originating invocation is left unanswered so the transport redelivers.
    pub fn suppresses_acknowledgement(self) -> bool {
        matches!(self, ProtocolErrorKind::TwinlifeOffline)
    }

    /// Kinds that should trigger the key-sync bootstrap protocol (§4.6)
    /// instead of being surfaced to the caller as a failure.
    pub fn triggers_key_sync(self) -> bool {
        matches!(
            self,
            ProtocolErrorKind::NoSecretKey
                | ProtocolErrorKind::NoPublicKey
                | ProtocolErrorKind::NoPrivateKey
                | ProtocolErrorKind::DecryptError
                | ProtocolErrorKind::NotEncrypted
        )
    }
}

//! Abstract service boundaries.
//!
//! Splits a concrete manager from an injectable trait object, generalized
//! to four collaborators plus the aggregate `ServiceProvider` the engine
//! is constructed with.

use crate::descriptor::{Descriptor, DescriptorId};
use crate::error::ConvoResult;
use crate::identity::{LocalIdentity, ResourceId, TwincodeId};
use crate::operation::ConversationId;
use async_trait::async_trait;

/// Cryptographic verify/sign/encrypt/decrypt boundary.
#[async_trait]
pub trait CryptoService: Send + Sync {
    async fn sign(&self, signer: TwincodeId, payload: &[u8]) -> ConvoResult<Vec<u8>>;
    async fn verify(&self, signer: TwincodeId, payload: &[u8], signature: &[u8]) -> ConvoResult<bool>;
    async fn encrypt(&self, peer: TwincodeId, plaintext: &[u8]) -> ConvoResult<Vec<u8>>;
    async fn decrypt(&self, peer: TwincodeId, ciphertext: &[u8]) -> ConvoResult<Vec<u8>>;
    async fn has_secret(&self, peer: TwincodeId) -> bool;
    async fn has_public_key(&self, peer: TwincodeId) -> bool;
    /// Activates a key pair for encryption once both sides' secrets have
    /// been exchanged and validated.
    async fn validate_secrets(&self, us: TwincodeId, peer: TwincodeId) -> ConvoResult<()>;
}

/// Raw transport boundary: opening/sending/closing a peer data channel.
#[async_trait]
pub trait PeerConnectionService: Send + Sync {
    async fn open_outgoing(&self, conversation: ConversationId) -> ConvoResult<()>;
    async fn send_frame(&self, conversation: ConversationId, bytes: Vec<u8>) -> ConvoResult<()>;
    async fn close(&self, conversation: ConversationId) -> ConvoResult<()>;
}

/// Secure-invocation transport for group/key-sync actions that bypass the
/// data channel entirely.
#[async_trait]
pub trait TwincodeOutboundService: Send + Sync {
    async fn invoke(
        &self,
        target: TwincodeId,
        action: &str,
        attributes: Vec<(String, InvocationAttribute)>,
    ) -> ConvoResult<InvocationAck>;
}

/// Callback surface for inbound secure invocations (group/key-sync).
#[async_trait]
pub trait TwincodeInboundService: Send + Sync {
    async fn on_invoke(
        &self,
        source: TwincodeId,
        action: &str,
        attributes: Vec<(String, InvocationAttribute)>,
    ) -> ConvoResult<InvocationAck>;
}

#[derive(Debug, Clone)]
pub enum InvocationAttribute {
    Uuid(uuid::Uuid),
    Long(i64),
    Text(String),
    List(Vec<InvocationAttribute>),
}

/// Invocation acknowledgement codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationAck {
    Success,
    BadRequest,
    NotAuthorizedOperation,
    NoPublicKey,
    Expired,
    ItemNotFound,
    FeatureNotSupportedByPeer,
    /// `TWINLIFE_OFFLINE` (no ack) — the caller must not acknowledge the
    /// triggering invocation so the transport redelivers.
    Offline,
}

/// Persisted-state boundary: the store is the single source
/// of truth, operations and descriptors persisted before any dependent
/// side effect is exposed.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn insert_or_update_descriptor(&self, descriptor: Descriptor) -> ConvoResult<InsertOutcome>;
    async fn get_descriptor(&self, id: DescriptorId) -> ConvoResult<Option<Descriptor>>;
    async fn remove_descriptor(&self, id: DescriptorId) -> ConvoResult<()>;
    async fn local_identity(&self, conversation: ConversationId) -> ConvoResult<LocalIdentity>;
    /// This installation's own resource id for `conversation` — the value a
    /// `SynchronizeConversation` request reports about the sender, as
    /// opposed to `peer_resource_id` which reports the peer's.
    async fn local_resource_id(&self, conversation: ConversationId) -> ConvoResult<ResourceId>;
    async fn peer_resource_id(&self, conversation: ConversationId) -> ConvoResult<Option<ResourceId>>;
}

/// `STORED | IGNORED | ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Stored,
    Ignored,
    Error,
}

/// Bundles the four collaborators the engine is constructed with. The
/// engine never reaches for a concrete type directly; all I/O crosses this
/// boundary.
pub struct ServiceProvider {
    pub crypto: std::sync::Arc<dyn CryptoService>,
    pub peer_connection: std::sync::Arc<dyn PeerConnectionService>,
    pub twincode_outbound: std::sync::Arc<dyn TwincodeOutboundService>,
    pub twincode_inbound: std::sync::Arc<dyn TwincodeInboundService>,
    pub store: std::sync::Arc<dyn ConversationStore>,
}

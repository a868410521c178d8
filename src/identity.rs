//! Identity primitives shared across the engine.
//!
//! A twincode is a verifiable identity token. `TwincodeId` is the address
//! form (outbound) or receivable form (inbound) depending on context; the
//! engine never distinguishes them at the type level since that lookup is
//! owned by the twincode directory (`TwincodeOutboundService` /
//! `TwincodeInboundService`), an external collaborator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A twincode identifier (inbound or outbound depending on call site).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TwincodeId(pub Uuid);

impl TwincodeId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TwincodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ephemeral per-installation identifier used to detect peer
/// re-installation and trigger a hard reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResourceId(pub Uuid);

impl ResourceId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Local identity bound to a conversation: an inbound twincode (how peers
/// reach us) and an outbound twincode (how we sign our outgoing work).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub inbound: TwincodeId,
    pub outbound: TwincodeId,
}

/// Negotiated protocol version, `min(ours, theirs)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

impl ProtocolVersion {
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 2, minor: 14 };

    /// Minimum version that understands `SynchronizeIQ`.
    pub const MIN_SYNCHRONIZE: ProtocolVersion = ProtocolVersion { major: 2, minor: 12 };

    pub fn min(self, other: ProtocolVersion) -> ProtocolVersion {
        std::cmp::min(self, other)
    }

    pub fn supports_synchronize(self) -> bool {
        self >= Self::MIN_SYNCHRONIZE
    }
}

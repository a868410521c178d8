//! Per-feature capability matrix.

use crate::identity::ProtocolVersion;

/// A descriptor-level feature gated by peer minor version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    ReplyTo,
    ExpireTimeout,
    Annotations,
    GroupMemberAttestation,
    Synchronize,
}

impl Feature {
    /// Minimum peer version required to use this feature.
    pub fn min_version(self) -> ProtocolVersion {
        match self {
            Feature::Synchronize => ProtocolVersion::MIN_SYNCHRONIZE,
            Feature::ReplyTo => ProtocolVersion { major: 2, minor: 12 },
            Feature::ExpireTimeout => ProtocolVersion { major: 2, minor: 12 },
            Feature::Annotations => ProtocolVersion { major: 2, minor: 13 },
            Feature::GroupMemberAttestation => ProtocolVersion { major: 2, minor: 13 },
        }
    }

    pub fn is_supported(self, peer: ProtocolVersion) -> bool {
        peer >= self.min_version()
    }
}

//! Signed add-member attestation.
//!
//! The inviter signs `(groupId, memberId, memberPubKey, permissions)`; a
//! receiving member verifies that signature against the inviter's known
//! public key before trusting the new joiner, closing the trust triangle
//! without every member needing to directly verify the new joiner's key.

use crate::descriptor::Permission;
use crate::error::{ConvoError, ConvoResult};
use crate::identity::TwincodeId;
use crate::operation::ConversationId;
use crate::service::CryptoService;

#[derive(Debug, Clone)]
pub struct Attestation {
    pub group: ConversationId,
    pub member: TwincodeId,
    pub member_public_key: Vec<u8>,
    pub permissions: Permission,
    pub signer: TwincodeId,
    pub signature: Vec<u8>,
}

impl Attestation {
    /// The exact byte sequence the signer signs over; verifiers must
    /// reconstruct it identically.
    pub fn signed_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.group.0.to_be_bytes().as_slice());
        buf.extend_from_slice(self.member.0.as_bytes());
        buf.extend_from_slice(&self.member_public_key);
        buf.extend_from_slice(self.permissions.bits().to_be_bytes().as_slice());
        buf
    }

    /// Receiver side of the triangle-closing flow:
    /// look up `signerId` among known members, verify the signature, then
    /// the caller fetches the new member's signed twincode using the given
    /// public key.
    pub async fn verify(&self, crypto: &dyn CryptoService, signer_is_known: bool) -> ConvoResult<()> {
        if !signer_is_known {
            return Err(ConvoError::UnknownGroupMember(self.signer, self.group));
        }
        let ok = crypto
            .verify(self.signer, &self.signed_payload(), &self.signature)
            .await?;
        if !ok {
            return Err(ConvoError::InvalidAttestation {
                group: self.group,
                member: self.member,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_payload_is_deterministic() {
        let a = Attestation {
            group: ConversationId(7),
            member: TwincodeId::new_random(),
            member_public_key: vec![1, 2, 3],
            permissions: Permission::SEND_MESSAGE,
            signer: TwincodeId::new_random(),
            signature: vec![],
        };
        assert_eq!(a.signed_payload(), a.signed_payload());
    }
}

//! The common descriptor envelope shared by every descriptor variant.

use crate::codec::capability::Feature;
use crate::identity::TwincodeId;
use crate::operation::ConversationId;
use serde::{Deserialize, Serialize};

/// Identity of a descriptor: `(databaseId, twincodeOutboundId, sequenceId)`.
/// `twincodeOutboundId` is the *sender's* identity; `sequenceId` is a
/// monotonically increasing counter assigned by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DescriptorId {
    pub database_id: u64,
    pub sender: TwincodeId,
    pub sequence_id: u64,
}

impl DescriptorId {
    /// Synthetic identity used for `ClearDescriptor`: fixed
    /// sequence number of 1, scoped to the peer's outbound id.
    pub fn synthetic_clear(database_id: u64, sender: TwincodeId) -> Self {
        Self {
            database_id,
            sender,
            sequence_id: 1,
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct DescriptorFlags: u16 {
        const COPY_ALLOWED  = 0b0000_0001;
        const VIDEO         = 0b0000_0010;
        const INCOMING_CALL = 0b0000_0100;
        const ACCEPTED_CALL = 0b0000_1000;
        const HAS_THUMBNAIL = 0b0001_0000;
        const ENCRYPTED     = 0b0010_0000;
        const FORWARD       = 0b0100_0000;
        const FORWARDED     = 0b1000_0000;
    }
}

/// Timestamps tracked on every descriptor. A negative value signals
/// *failed* delivery for that phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timestamps {
    pub created: i64,
    pub sent: i64,
    pub received: i64,
    pub read: i64,
    pub updated: i64,
    pub peer_deleted: i64,
    pub deleted: i64,
}

impl Timestamps {
    /// `created <= sent <= received <= read` must hold for non-failure
    /// states; any negative phase implies no later non-negative phase.
    pub fn is_consistent(&self) -> bool {
        let phases = [self.created, self.sent, self.received, self.read];
        let mut seen_negative = false;
        let mut prev = i64::MIN;
        for &phase in &phases {
            if phase < 0 {
                seen_negative = true;
                continue;
            }
            if seen_negative {
                return false;
            }
            if prev != i64::MIN && phase < prev {
                return false;
            }
            prev = phase;
        }
        true
    }

    pub fn mark_send_failed(&mut self) {
        self.received = -1;
        self.read = -1;
    }
}

/// Shared envelope fields appended to by every descriptor variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: DescriptorId,
    pub conversation_id: ConversationId,
    pub timestamps: Timestamps,
    pub flags: DescriptorFlags,
    /// Group member target, when the conversation is a group.
    pub send_to: Option<TwincodeId>,
    /// Other descriptor this one replies to.
    pub reply_to: Option<DescriptorId>,
    /// Milliseconds; 0 = never expires.
    pub expire_timeout: u64,
}

impl Envelope {
    pub fn new(id: DescriptorId, conversation_id: ConversationId, created: i64) -> Self {
        Self {
            id,
            conversation_id,
            timestamps: Timestamps {
                created,
                ..Default::default()
            },
            flags: DescriptorFlags::empty(),
            send_to: None,
            reply_to: None,
            expire_timeout: 0,
        }
    }

    /// Produce a sibling envelope for forwarding, per
    /// `createForward(newId, cid, expireTimeout, sendTo, copyAllowed)`.
    pub fn create_forward(
        &self,
        new_id: DescriptorId,
        conversation_id: ConversationId,
        expire_timeout: u64,
        send_to: Option<TwincodeId>,
        copy_allowed: bool,
    ) -> Envelope {
        let mut flags = DescriptorFlags::FORWARDED;
        if copy_allowed {
            flags |= DescriptorFlags::COPY_ALLOWED;
        }
        Envelope {
            id: new_id,
            conversation_id,
            timestamps: Timestamps {
                created: self.timestamps.created,
                ..Default::default()
            },
            flags,
            send_to,
            reply_to: None,
            expire_timeout,
        }
    }

    /// The first populated field that needs a peer capability, if any, so a
    /// sender can refuse to send rather than silently drop the field on a
    /// peer that predates it.
    pub fn required_feature(&self) -> Option<Feature> {
        if self.reply_to.is_some() {
            return Some(Feature::ReplyTo);
        }
        if self.expire_timeout != 0 {
            return Some(Feature::ExpireTimeout);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> Envelope {
        Envelope::new(
            DescriptorId {
                database_id: 1,
                sender: TwincodeId::new_random(),
                sequence_id: 1,
            },
            ConversationId(1),
            0,
        )
    }

    #[test]
    fn plain_envelope_requires_no_feature() {
        assert_eq!(envelope().required_feature(), None);
    }

    #[test]
    fn reply_to_requires_the_reply_to_feature() {
        let mut envelope = envelope();
        envelope.reply_to = Some(envelope.id);
        assert_eq!(envelope.required_feature(), Some(Feature::ReplyTo));
    }

    #[test]
    fn expire_timeout_requires_the_expire_timeout_feature() {
        let mut envelope = envelope();
        envelope.expire_timeout = 60_000;
        assert_eq!(envelope.required_feature(), Some(Feature::ExpireTimeout));
    }

    #[test]
    fn mark_send_failed_sets_received_and_read_negative() {
        let mut timestamps = Timestamps::default();
        timestamps.mark_send_failed();
        assert_eq!(timestamps.received, -1);
        assert_eq!(timestamps.read, -1);
    }
}

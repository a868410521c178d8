//! Group membership and signed-attestation engine.

pub mod attestation;

use crate::descriptor::{Descriptor, DescriptorPayload, InvitationState, Permission};
use crate::error::{ConvoError, ConvoResult};
use crate::identity::TwincodeId;
use crate::observer::{ObserverBus, ObserverEvent};
use crate::operation::{ConversationId, Operation, OperationType};
use crate::scheduler::Scheduler;
use attestation::Attestation;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// One known member of a group conversation.
#[derive(Debug, Clone)]
pub struct Member {
    pub twincode: TwincodeId,
    pub public_key: Vec<u8>,
    pub permissions: Permission,
}

/// In-memory member table for a group conversation, one instance per
/// group rather than one process-wide table.
#[derive(Default)]
pub struct MemberTable {
    members: DashMap<TwincodeId, Member>,
}

impl MemberTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, member: Member) {
        self.members.insert(member.twincode, member);
    }

    pub fn contains(&self, twincode: TwincodeId) -> bool {
        self.members.contains_key(&twincode)
    }

    pub fn get(&self, twincode: TwincodeId) -> Option<Member> {
        self.members.get(&twincode).map(|m| m.clone())
    }

    pub fn remove(&self, twincode: TwincodeId) -> Option<Member> {
        self.members.remove(&twincode).map(|(_, m)| m)
    }

    pub fn all(&self) -> Vec<Member> {
        self.members.iter().map(|e| e.value().clone()).collect()
    }

    pub fn set_permissions(&self, twincode: TwincodeId, permissions: Permission) -> ConvoResult<()> {
        let mut entry = self
            .members
            .get_mut(&twincode)
            .ok_or(ConvoError::UnknownGroupMember(twincode, ConversationId(0)))?;
        entry.permissions = permissions;
        Ok(())
    }
}

/// Drives invite/join/leave/permission-update flows for one group
/// conversation.
pub struct GroupManager {
    pub group: ConversationId,
    pub members: MemberTable,
    scheduler: Arc<Scheduler>,
    observers: ObserverBus,
}

impl GroupManager {
    pub fn new(group: ConversationId, scheduler: Arc<Scheduler>, observers: ObserverBus) -> Self {
        Self {
            group,
            members: MemberTable::new(),
            scheduler,
            observers,
        }
    }

    /// On peer receive of an `InviteGroup` descriptor: if the receiver
    /// already belongs to the group, auto-accept and queue `JOIN_GROUP`
    /// immediately; otherwise insert and notify.
    pub async fn handle_invite_received(
        &self,
        inviter_conversation: ConversationId,
        invitation: Descriptor,
        already_member: bool,
    ) -> ConvoResult<()> {
        if already_member {
            self.queue(OperationType::JoinGroup, inviter_conversation, None).await;
            return Ok(());
        }
        self.observers.notify(ObserverEvent::OnInviteGroupRequest {
            group: self.group,
            from: invitation.envelope.id.sender,
        });
        Ok(())
    }

    /// Acceptor side of "Join": mark the invitation accepted, create the
    /// local group conversation (caller's responsibility), and queue
    /// `JOIN_GROUP`.
    pub async fn accept_invitation(&self, invitation: &mut Descriptor) -> ConvoResult<()> {
        match &mut invitation.payload {
            DescriptorPayload::Invitation { state, .. } => *state = InvitationState::Accepted,
            _ => return Err(ConvoError::Internal("not an invitation descriptor".into())),
        }
        self.queue(OperationType::JoinGroup, self.group, Some(invitation.envelope.id))
            .await;
        Ok(())
    }

    /// Inviter side once the join succeeds: record the new member, sign an
    /// attestation, and queue `INVOKE_ADD_MEMBER` toward every other known
    /// member so the new joiner can close the triangle.
    pub async fn record_new_member_and_attest(
        &self,
        new_member: Member,
        inviter: TwincodeId,
        signature: Vec<u8>,
    ) -> ConvoResult<Attestation> {
        let attestation = Attestation {
            group: self.group,
            member: new_member.twincode,
            member_public_key: new_member.public_key.clone(),
            permissions: new_member.permissions,
            signer: inviter,
            signature,
        };
        self.members.insert(new_member.clone());
        for existing in self.members.all() {
            if existing.twincode == new_member.twincode {
                continue;
            }
            self.queue(OperationType::InvokeAddMember, self.group, None).await;
        }
        info!(group = ?self.group, member = %new_member.twincode, "member added with attestation");
        Ok(attestation)
    }

    /// Withdraw: only while `PENDING`.
    pub async fn withdraw_invitation(&self, invitation: &mut Descriptor) -> ConvoResult<()> {
        match &mut invitation.payload {
            DescriptorPayload::Invitation { state, .. } if *state == InvitationState::Pending => {
                *state = InvitationState::Withdrawn;
            }
            DescriptorPayload::Invitation { .. } => {
                return Err(ConvoError::Internal(
                    "invitation is no longer pending".into(),
                ))
            }
            _ => return Err(ConvoError::Internal("not an invitation descriptor".into())),
        }
        self.queue(
            OperationType::UpdateDescriptorTimestamp,
            self.group,
            Some(invitation.envelope.id),
        )
        .await;
        Ok(())
    }

    /// Leave. Signed members get `INVOKE_LEAVE_GROUP`;
    /// unsigned legacy members get `LEAVE_GROUP`. If the leaver is self,
    /// the caller must revoke sent media and pending invitations first.
    pub async fn leave(&self, signed_members: &[TwincodeId]) -> ConvoResult<()> {
        for member in self.members.all() {
            let op_type = if signed_members.contains(&member.twincode) {
                OperationType::InvokeLeaveGroup
            } else {
                OperationType::LeaveGroup
            };
            self.queue(op_type, self.group, None).await;
        }
        Ok(())
    }

    /// `setPermissions`: requires `UPDATE_MEMBER`, persists,
    /// broadcasts to every known member.
    pub async fn set_permissions(
        &self,
        actor_permissions: Permission,
        target: TwincodeId,
        permissions: Permission,
    ) -> ConvoResult<()> {
        if !actor_permissions.contains(Permission::UPDATE_MEMBER) {
            return Err(ConvoError::PermissionDenied {
                conversation: self.group,
                permission: Permission::UPDATE_MEMBER,
            });
        }
        self.members.set_permissions(target, permissions)?;
        for member in self.members.all() {
            self.queue(OperationType::UpdateGroupMember, self.group, None).await;
            let _ = member;
        }
        Ok(())
    }

    async fn queue(
        &self,
        op_type: OperationType,
        conversation: ConversationId,
        descriptor_id: Option<crate::descriptor::DescriptorId>,
    ) {
        let id = self.scheduler.next_operation_id();
        let operation = Operation::new(
            id,
            op_type,
            conversation,
            crate::util::now_millis(),
            descriptor_id,
        );
        self.scheduler.enqueue(operation).await;
    }
}


//! Shared test doubles for integration scenarios.

use async_trait::async_trait;
use dashmap::DashMap;
use peerconv_core::descriptor::{Descriptor, DescriptorId};
use peerconv_core::error::ConvoResult;
use peerconv_core::identity::{LocalIdentity, ResourceId, TwincodeId};
use peerconv_core::operation::ConversationId;
use peerconv_core::service::{
    ConversationStore, CryptoService, InsertOutcome, InvocationAck, InvocationAttribute,
    PeerConnectionService, ServiceProvider, TwincodeInboundService, TwincodeOutboundService,
};
use std::sync::Arc;

pub struct AllowAllCrypto;

#[async_trait]
impl CryptoService for AllowAllCrypto {
    async fn sign(&self, _signer: TwincodeId, _payload: &[u8]) -> ConvoResult<Vec<u8>> {
        Ok(vec![1, 2, 3])
    }
    async fn verify(&self, _signer: TwincodeId, _payload: &[u8], _signature: &[u8]) -> ConvoResult<bool> {
        Ok(true)
    }
    async fn encrypt(&self, _peer: TwincodeId, plaintext: &[u8]) -> ConvoResult<Vec<u8>> {
        Ok(plaintext.to_vec())
    }
    async fn decrypt(&self, _peer: TwincodeId, ciphertext: &[u8]) -> ConvoResult<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
    async fn has_secret(&self, _peer: TwincodeId) -> bool {
        true
    }
    async fn has_public_key(&self, _peer: TwincodeId) -> bool {
        true
    }
    async fn validate_secrets(&self, _us: TwincodeId, _peer: TwincodeId) -> ConvoResult<()> {
        Ok(())
    }
}

pub struct NoopTransport;

#[async_trait]
impl PeerConnectionService for NoopTransport {
    async fn open_outgoing(&self, _conversation: ConversationId) -> ConvoResult<()> {
        Ok(())
    }
    async fn send_frame(&self, _conversation: ConversationId, _bytes: Vec<u8>) -> ConvoResult<()> {
        Ok(())
    }
    async fn close(&self, _conversation: ConversationId) -> ConvoResult<()> {
        Ok(())
    }
}

pub struct NoopInvocation;

#[async_trait]
impl TwincodeOutboundService for NoopInvocation {
    async fn invoke(
        &self,
        _target: TwincodeId,
        _action: &str,
        _attributes: Vec<(String, InvocationAttribute)>,
    ) -> ConvoResult<InvocationAck> {
        Ok(InvocationAck::Success)
    }
}

#[async_trait]
impl TwincodeInboundService for NoopInvocation {
    async fn on_invoke(
        &self,
        _source: TwincodeId,
        _action: &str,
        _attributes: Vec<(String, InvocationAttribute)>,
    ) -> ConvoResult<InvocationAck> {
        Ok(InvocationAck::Success)
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    descriptors: DashMap<DescriptorId, Descriptor>,
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn insert_or_update_descriptor(&self, descriptor: Descriptor) -> ConvoResult<InsertOutcome> {
        let id = descriptor.envelope.id;
        let existed = self.descriptors.insert(id, descriptor).is_some();
        Ok(if existed {
            InsertOutcome::Ignored
        } else {
            InsertOutcome::Stored
        })
    }
    async fn get_descriptor(&self, id: DescriptorId) -> ConvoResult<Option<Descriptor>> {
        Ok(self.descriptors.get(&id).map(|d| d.value().clone()))
    }
    async fn remove_descriptor(&self, id: DescriptorId) -> ConvoResult<()> {
        self.descriptors.remove(&id);
        Ok(())
    }
    async fn local_identity(&self, _conversation: ConversationId) -> ConvoResult<LocalIdentity> {
        Ok(LocalIdentity {
            inbound: TwincodeId::new_random(),
            outbound: TwincodeId::new_random(),
        })
    }
    async fn local_resource_id(&self, _conversation: ConversationId) -> ConvoResult<ResourceId> {
        Ok(ResourceId::default())
    }
    async fn peer_resource_id(&self, _conversation: ConversationId) -> ConvoResult<Option<ResourceId>> {
        Ok(None)
    }
}

pub fn test_service_provider() -> Arc<ServiceProvider> {
    Arc::new(ServiceProvider {
        crypto: Arc::new(AllowAllCrypto),
        peer_connection: Arc::new(NoopTransport),
        twincode_outbound: Arc::new(NoopInvocation),
        twincode_inbound: Arc::new(NoopInvocation),
        store: Arc::new(InMemoryStore::default()),
    })
}

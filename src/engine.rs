//! Top-level engine wiring.
//!
//! The struct that owns every subsystem and exposes the public API
//! surface, generalized to a conversation engine that
//! owns the connection registry, scheduler, dispatcher, and observer bus.

use crate::codec::SchemaRegistry;
use crate::config::EngineConfig;
use crate::connection::ConnectionRegistry;
use crate::descriptor::DescriptorId;
use crate::dispatch::Dispatcher;
use crate::error::ConvoResult;
use crate::observer::{ObserverBus, ObserverEvent, ObserverReceiver};
use crate::operation::{ConversationId, Operation, OperationId, OperationType};
use crate::scheduler::{DispatchAction, Scheduler};
use crate::service::ServiceProvider;
use crate::transfer::{OutgoingTransfer, TransferRegistry};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Owns every subsystem of the engine. Constructed once per host process;
/// conversations are created and looked up through it.
pub struct ConversationEngine {
    pub config: EngineConfig,
    pub connections: Arc<ConnectionRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub registry: Arc<SchemaRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub services: Arc<ServiceProvider>,
    pub transfers: Arc<TransferRegistry>,
    observers: ObserverBus,
    next_conversation_id: AtomicU64,
}

impl ConversationEngine {
    pub fn new(config: EngineConfig, services: Arc<ServiceProvider>) -> (Self, ObserverReceiver) {
        let connections = Arc::new(ConnectionRegistry::new());
        let scheduler = Arc::new(Scheduler::new(connections.clone()));
        let registry = Arc::new(SchemaRegistry::with_defaults());
        let (observers, receiver) = ObserverBus::channel();
        let dispatcher = Arc::new(Dispatcher::new(
            connections.clone(),
            services.clone(),
            observers.clone(),
        ));
        let engine = Self {
            config,
            connections,
            scheduler,
            registry,
            dispatcher,
            services,
            transfers: Arc::new(TransferRegistry::new()),
            observers,
            next_conversation_id: AtomicU64::new(1),
        };
        (engine, receiver)
    }

    pub fn new_conversation_id(&self) -> ConversationId {
        ConversationId(self.next_conversation_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn observers(&self) -> ObserverBus {
        self.observers.clone()
    }

    /// Create a conversation and notify observers.
    pub fn create_conversation(&self) -> ConversationId {
        let id = self.new_conversation_id();
        self.connections.get_or_create(id);
        self.observers
            .notify(crate::observer::ObserverEvent::OnCreateConversation(id));
        info!(?id, "conversation created");
        id
    }

    pub fn delete_conversation(&self, conversation: ConversationId) {
        self.observers
            .notify(crate::observer::ObserverEvent::OnDeleteConversation(conversation));
    }

    /// Enqueue a durable outbound operation for a conversation. The caller is expected to have already persisted the
    /// operation via `ServiceProvider::store`; the scheduler's in-memory
    /// queue is the dispatch-time mirror of that durable state.
    pub async fn enqueue_operation(
        &self,
        conversation: ConversationId,
        op_type: OperationType,
        descriptor_id: Option<crate::descriptor::DescriptorId>,
    ) -> OperationId {
        let id = self.scheduler.next_operation_id();
        let operation = Operation::new(id, op_type, conversation, crate::util::now_millis(), descriptor_id);
        self.scheduler.enqueue(operation).await;
        id
    }

    /// One tick of the dispatch loop for a single conversation. A real host
    /// drives this from its single-threaded executor loop, typically woken
    /// by a readiness queue rather than polled; the tick itself is exposed
    /// directly here so tests can drive it deterministically.
    ///
    /// An `Execute` action is encoded and sent to the peer before it's
    /// returned; if the operation's descriptor needs a feature the
    /// negotiated peer doesn't support, it is never sent at all and this
    /// reports `Idle` instead, after marking the descriptor failed.
    #[instrument(skip(self))]
    pub async fn tick(&self, conversation: ConversationId, offline: bool) -> ConvoResult<DispatchAction> {
        let action = self
            .scheduler
            .schedule_conversation_operations(conversation, offline)
            .await?;
        if let DispatchAction::Execute { operation, request_id } = action {
            if self.send_operation(conversation, &operation).await? {
                return Ok(DispatchAction::Execute { operation, request_id });
            }
            return Ok(DispatchAction::Idle);
        }
        Ok(action)
    }

    /// Resolves the operation's descriptor, checks it against the
    /// negotiated peer's capabilities, and encodes + sends the frame.
    /// Returns `false` (without sending) when the descriptor needs a
    /// feature the peer doesn't support.
    async fn send_operation(&self, conversation: ConversationId, operation: &Operation) -> ConvoResult<bool> {
        let descriptor = match operation.descriptor_id {
            Some(id) => self.services.store.get_descriptor(id).await?,
            None => None,
        };

        let connection = self.connections.get_or_create(conversation);
        let session = connection.negotiated_session(true).await;

        if let Some(descriptor) = &descriptor {
            if let Some(feature) = descriptor.envelope.required_feature() {
                let supported = session.peer_version.is_some_and(|v| feature.is_supported(v));
                if !supported {
                    warn!(?conversation, ?feature, "descriptor needs a feature unsupported by the peer");
                    let mut failed = descriptor.clone();
                    failed.envelope.timestamps.mark_send_failed();
                    self.services.store.insert_or_update_descriptor(failed).await?;
                    self.observers.notify(ObserverEvent::OnError {
                        request_id: operation.request_id,
                        kind: crate::error::ProtocolErrorKind::FeatureNotSupportedByPeer,
                    });
                    self.scheduler
                        .complete_operation(conversation, operation.request_id)
                        .await;
                    return Ok(false);
                }
            }
        }

        let local_identity = self.services.store.local_identity(conversation).await?;
        let local_resource_id = self.services.store.local_resource_id(conversation).await?;
        let (schema_id, frame) =
            operation.to_request_frame(descriptor, local_resource_id, local_identity.outbound)?;
        let raw = self.registry.encode(schema_id, &frame)?;
        let bytes = raw.encode(session.leading_padding);
        self.services.peer_connection.send_frame(conversation, bytes).await?;
        Ok(true)
    }

    /// Registers a new outgoing file push so later chunk acks can be
    /// matched back to it.
    pub fn begin_outgoing_transfer(&self, transfer: OutgoingTransfer) {
        self.transfers.start_outgoing(transfer);
    }

    /// Applies an `OnPushFileChunk` response: advances the matching
    /// transfer's cursor and feeds the resulting RTT sample into the
    /// connection's estimator.
    pub async fn acknowledge_file_chunk(
        &self,
        conversation: ConversationId,
        descriptor_id: DescriptorId,
        next_chunk_start: i64,
    ) {
        if let Some(sample) = self
            .transfers
            .acknowledge_outgoing(descriptor_id, next_chunk_start)
            .await
        {
            self.connections.get_or_create(conversation).record_rtt_sample(sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Descriptor, DescriptorId, DescriptorPayload};
    use crate::identity::{LocalIdentity, ResourceId, TwincodeId};
    use crate::service::{
        ConversationStore, CryptoService, InsertOutcome, InvocationAck, InvocationAttribute,
        PeerConnectionService, TwincodeInboundService, TwincodeOutboundService,
    };
    use async_trait::async_trait;
    use dashmap::DashMap;

    struct NullCrypto;
    #[async_trait]
    impl CryptoService for NullCrypto {
        async fn sign(&self, _: TwincodeId, _: &[u8]) -> ConvoResult<Vec<u8>> {
            Ok(vec![])
        }
        async fn verify(&self, _: TwincodeId, _: &[u8], _: &[u8]) -> ConvoResult<bool> {
            Ok(true)
        }
        async fn encrypt(&self, _: TwincodeId, plaintext: &[u8]) -> ConvoResult<Vec<u8>> {
            Ok(plaintext.to_vec())
        }
        async fn decrypt(&self, _: TwincodeId, ciphertext: &[u8]) -> ConvoResult<Vec<u8>> {
            Ok(ciphertext.to_vec())
        }
        async fn has_secret(&self, _: TwincodeId) -> bool {
            true
        }
        async fn has_public_key(&self, _: TwincodeId) -> bool {
            true
        }
        async fn validate_secrets(&self, _: TwincodeId, _: TwincodeId) -> ConvoResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct SpyTransport {
        sent: std::sync::Mutex<Vec<Vec<u8>>>,
    }
    #[async_trait]
    impl PeerConnectionService for SpyTransport {
        async fn open_outgoing(&self, _: ConversationId) -> ConvoResult<()> {
            Ok(())
        }
        async fn send_frame(&self, _: ConversationId, bytes: Vec<u8>) -> ConvoResult<()> {
            self.sent.lock().unwrap().push(bytes);
            Ok(())
        }
        async fn close(&self, _: ConversationId) -> ConvoResult<()> {
            Ok(())
        }
    }

    struct NullInvocation;
    #[async_trait]
    impl TwincodeOutboundService for NullInvocation {
        async fn invoke(&self, _: TwincodeId, _: &str, _: Vec<(String, InvocationAttribute)>) -> ConvoResult<InvocationAck> {
            Ok(InvocationAck::Success)
        }
    }
    #[async_trait]
    impl TwincodeInboundService for NullInvocation {
        async fn on_invoke(&self, _: TwincodeId, _: &str, _: Vec<(String, InvocationAttribute)>) -> ConvoResult<InvocationAck> {
            Ok(InvocationAck::Success)
        }
    }

    #[derive(Default)]
    struct InMemoryStore {
        descriptors: DashMap<DescriptorId, Descriptor>,
    }
    #[async_trait]
    impl ConversationStore for InMemoryStore {
        async fn insert_or_update_descriptor(&self, descriptor: Descriptor) -> ConvoResult<InsertOutcome> {
            let id = descriptor.envelope.id;
            let existed = self.descriptors.insert(id, descriptor).is_some();
            Ok(if existed { InsertOutcome::Ignored } else { InsertOutcome::Stored })
        }
        async fn get_descriptor(&self, id: DescriptorId) -> ConvoResult<Option<Descriptor>> {
            Ok(self.descriptors.get(&id).map(|d| d.value().clone()))
        }
        async fn remove_descriptor(&self, id: DescriptorId) -> ConvoResult<()> {
            self.descriptors.remove(&id);
            Ok(())
        }
        async fn local_identity(&self, _: ConversationId) -> ConvoResult<LocalIdentity> {
            Ok(LocalIdentity {
                inbound: TwincodeId::new_random(),
                outbound: TwincodeId::new_random(),
            })
        }
        async fn local_resource_id(&self, _: ConversationId) -> ConvoResult<ResourceId> {
            Ok(ResourceId::default())
        }
        async fn peer_resource_id(&self, _: ConversationId) -> ConvoResult<Option<ResourceId>> {
            Ok(None)
        }
    }

    fn test_engine() -> (ConversationEngine, Arc<SpyTransport>, Arc<InMemoryStore>) {
        let transport = Arc::new(SpyTransport::default());
        let store = Arc::new(InMemoryStore::default());
        let services = Arc::new(ServiceProvider {
            crypto: Arc::new(NullCrypto),
            peer_connection: transport.clone(),
            twincode_outbound: Arc::new(NullInvocation),
            twincode_inbound: Arc::new(NullInvocation),
            store: store.clone(),
        });
        let (engine, _receiver) = ConversationEngine::new(EngineConfig::default(), services);
        (engine, transport, store)
    }

    #[tokio::test]
    async fn tick_encodes_and_sends_a_ready_operation() {
        let (engine, transport, store) = test_engine();
        let conversation = engine.create_conversation();
        engine
            .connections
            .get_or_create(conversation)
            .mark_outgoing_open(crate::identity::ProtocolVersion::CURRENT, false)
            .await;

        let descriptor_id = DescriptorId {
            database_id: 1,
            sender: TwincodeId::new_random(),
            sequence_id: 1,
        };
        let descriptor = Descriptor::new_for_send(
            descriptor_id,
            conversation,
            0,
            DescriptorPayload::Object { text: "hi".into() },
        );
        store.insert_or_update_descriptor(descriptor).await.unwrap();

        engine
            .enqueue_operation(conversation, OperationType::PushObject, Some(descriptor_id))
            .await;

        let action = engine.tick(conversation, false).await.unwrap();
        assert!(matches!(action, crate::scheduler::DispatchAction::Execute { .. }));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tick_skips_a_send_that_needs_an_unsupported_feature() {
        let (engine, transport, store) = test_engine();
        let conversation = engine.create_conversation();
        let legacy = crate::identity::ProtocolVersion { major: 2, minor: 8 };
        engine
            .connections
            .get_or_create(conversation)
            .mark_outgoing_open(legacy, false)
            .await;

        let descriptor_id = DescriptorId {
            database_id: 1,
            sender: TwincodeId::new_random(),
            sequence_id: 1,
        };
        let mut descriptor = Descriptor::new_for_send(
            descriptor_id,
            conversation,
            0,
            DescriptorPayload::Object { text: "hi".into() },
        );
        descriptor.envelope.reply_to = Some(descriptor_id);
        store.insert_or_update_descriptor(descriptor).await.unwrap();

        engine
            .enqueue_operation(conversation, OperationType::PushObject, Some(descriptor_id))
            .await;

        let action = engine.tick(conversation, false).await.unwrap();
        assert!(matches!(action, crate::scheduler::DispatchAction::Idle));
        assert!(transport.sent.lock().unwrap().is_empty());

        let stored = store.get_descriptor(descriptor_id).await.unwrap().unwrap();
        assert_eq!(stored.envelope.timestamps.received, -1);
    }

    #[tokio::test]
    async fn acknowledge_file_chunk_feeds_the_rtt_estimator() {
        let (engine, _transport, _store) = test_engine();
        let conversation = engine.create_conversation();
        let connection = engine.connections.get_or_create(conversation);
        connection
            .mark_outgoing_open(crate::identity::ProtocolVersion::CURRENT, false)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("src.bin");
        tokio::fs::write(&file, vec![0u8; 20]).await.unwrap();
        let descriptor_id = DescriptorId {
            database_id: 1,
            sender: TwincodeId::new_random(),
            sequence_id: 1,
        };
        let mut transfer = crate::transfer::OutgoingTransfer::new(descriptor_id, file, 20);
        transfer.next_chunk().await.unwrap();
        engine.begin_outgoing_transfer(transfer);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert_eq!(connection.estimated_rtt(), std::time::Duration::ZERO);
        engine.acknowledge_file_chunk(conversation, descriptor_id, 10).await;
        assert!(connection.estimated_rtt() > std::time::Duration::ZERO);
    }
}

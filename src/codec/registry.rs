//! The `(schemaId, schemaVersion) -> (Serializer, Listener)` registry.
//!
//! Keyed by schema identity so multiple schema versions of the same
//! message can stay registered: backward compatibility is achieved by
//! keeping prior schema-version deserializers registered.

use crate::codec::frame::{RawFrame, RequestFrame, SchemaKey};
use crate::error::{ConvoError, ConvoResult};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

type Decoder = Arc<dyn Fn(&[u8]) -> ConvoResult<RequestFrame> + Send + Sync>;
type Encoder = Arc<dyn Fn(&RequestFrame) -> ConvoResult<Vec<u8>> + Send + Sync>;

/// Stable schema ids, one per data-channel request kind. Minted once and never reused.
pub mod schema_id {
    use uuid::{uuid, Uuid};

    pub const RESET_CONVERSATION: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-000000000001");
    pub const SYNCHRONIZE_CONVERSATION: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-000000000002");
    pub const PUSH_OBJECT: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-000000000003");
    pub const PUSH_TRANSIENT_OBJECT: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-000000000004");
    pub const PUSH_COMMAND: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-000000000005");
    pub const PUSH_FILE: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-000000000006");
    pub const PUSH_FILE_CHUNK: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-000000000007");
    pub const PUSH_THUMBNAIL: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-000000000008");
    pub const PUSH_GEOLOCATION: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-000000000009");
    pub const PUSH_TWINCODE: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-00000000000a");
    pub const UPDATE_DESCRIPTOR_TIMESTAMP: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-00000000000b");
    pub const UPDATE_OBJECT: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-00000000000c");
    pub const UPDATE_ANNOTATIONS: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-00000000000d");
    pub const INVITE_GROUP: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-00000000000e");
    pub const WITHDRAW_INVITE_GROUP: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-00000000000f");
    pub const JOIN_GROUP: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-000000000010");
    pub const LEAVE_GROUP: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-000000000011");
    pub const UPDATE_GROUP_MEMBER: Uuid = uuid!("8f14e45f-ceea-467e-9a2c-000000000012");
}

/// Current schema version for every request kind. Bumped whenever a field
/// is added; prior versions stay registered.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Registry of decoders/encoders keyed by `(schemaId, schemaVersion)`.
pub struct SchemaRegistry {
    decoders: DashMap<SchemaKey, Decoder>,
    encoders: DashMap<Uuid, Encoder>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            decoders: DashMap::new(),
            encoders: DashMap::new(),
        }
    }

    /// Registers the current-version bincode codec for every known schema
    /// id. A host that needs to speak to pre-bump peers would additionally
    /// call `register_legacy_decoder` with the old schema version and a
    /// hand-written upgrade path; none of the 16 kinds have accrued a
    /// legacy path yet in this build.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for id in [
            schema_id::RESET_CONVERSATION,
            schema_id::SYNCHRONIZE_CONVERSATION,
            schema_id::PUSH_OBJECT,
            schema_id::PUSH_TRANSIENT_OBJECT,
            schema_id::PUSH_COMMAND,
            schema_id::PUSH_FILE,
            schema_id::PUSH_FILE_CHUNK,
            schema_id::PUSH_THUMBNAIL,
            schema_id::PUSH_GEOLOCATION,
            schema_id::PUSH_TWINCODE,
            schema_id::UPDATE_DESCRIPTOR_TIMESTAMP,
            schema_id::UPDATE_OBJECT,
            schema_id::UPDATE_ANNOTATIONS,
            schema_id::INVITE_GROUP,
            schema_id::WITHDRAW_INVITE_GROUP,
            schema_id::JOIN_GROUP,
            schema_id::LEAVE_GROUP,
            schema_id::UPDATE_GROUP_MEMBER,
        ] {
            registry.register_bincode(id, CURRENT_SCHEMA_VERSION);
        }
        registry
    }

    fn register_bincode(&self, schema_id: Uuid, schema_version: u32) {
        let key = SchemaKey {
            schema_id,
            schema_version,
        };
        self.decoders.insert(
            key,
            Arc::new(|bytes: &[u8]| {
                bincode::deserialize::<RequestFrame>(bytes).map_err(|e| ConvoError::FrameDecode {
                    reason: e.to_string(),
                })
            }),
        );
        self.encoders.entry(schema_id).or_insert_with(|| {
            Arc::new(|frame: &RequestFrame| {
                bincode::serialize(frame).map_err(|e| ConvoError::FrameEncode {
                    reason: e.to_string(),
                })
            })
        });
    }

    /// Register an additional decoder for an older schema version of a
    /// known schema id, preserving the backward-compatible legacy decode
    /// path.
    pub fn register_legacy_decoder(&self, key: SchemaKey, decoder: Decoder) {
        self.decoders.insert(key, decoder);
    }

    /// Decode an incoming frame. On an unknown `(schemaId, schemaVersion)`
    /// key, the caller must reply with `FEATURE_NOT_IMPLEMENTED` echoing
    /// the offending request id — that reply is built by the
    /// dispatcher since it needs the request id out of the raw payload,
    /// which this registry cannot assume a shape for.
    pub fn decode(&self, frame: &RawFrame) -> ConvoResult<RequestFrame> {
        match self.decoders.get(&frame.key) {
            Some(decoder) => decoder(&frame.payload),
            None => Err(ConvoError::UnknownSchema {
                schema_id: frame.key.schema_id,
                schema_version: frame.key.schema_version,
            }),
        }
    }

    pub fn encode(&self, schema_id: Uuid, frame: &RequestFrame) -> ConvoResult<RawFrame> {
        let encoder = self
            .encoders
            .get(&schema_id)
            .ok_or(ConvoError::UnknownSchema {
                schema_id,
                schema_version: CURRENT_SCHEMA_VERSION,
            })?;
        let payload = encoder(frame)?;
        Ok(RawFrame {
            key: SchemaKey {
                schema_id,
                schema_version: CURRENT_SCHEMA_VERSION,
            },
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::frame::RequestBody;

    #[test]
    fn round_trips_a_known_schema() {
        let registry = SchemaRegistry::with_defaults();
        let frame = RequestFrame {
            request_id: 7,
            body: RequestBody::ResetConversation { clear_up_to: 42 },
        };
        let raw = registry
            .encode(schema_id::RESET_CONVERSATION, &frame)
            .unwrap();
        let decoded = registry.decode(&raw).unwrap();
        assert_eq!(decoded.request_id, 7);
    }

    #[test]
    fn unknown_schema_is_reported() {
        let registry = SchemaRegistry::with_defaults();
        let raw = RawFrame {
            key: SchemaKey {
                schema_id: Uuid::nil(),
                schema_version: 99,
            },
            payload: vec![],
        };
        assert!(matches!(
            registry.decode(&raw),
            Err(ConvoError::UnknownSchema { .. })
        ));
    }
}

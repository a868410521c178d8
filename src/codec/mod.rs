//! Versioned binary frame protocol.
//!
//! Three pieces: `frame` (the on-wire header and bodies), `registry` (the
//! `(schemaId, schemaVersion) -> decoder` dispatch table), and `capability`
//! (the per-feature version gate used before a field is populated on send).

pub mod capability;
pub mod frame;
pub mod registry;

pub use capability::Feature;
pub use frame::{
    RawFrame, RequestBody, RequestFrame, ResponseBody, ResponseFrame, SchemaKey, TimestampPhase,
};
pub use registry::{schema_id, SchemaRegistry, CURRENT_SCHEMA_VERSION};

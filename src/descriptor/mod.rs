//! Descriptor model (C2): typed payload entities sharing a common envelope.

pub mod annotation;
pub mod envelope;
pub mod permission;
pub mod variants;

pub use annotation::{Annotation, AnnotationSet, AnnotationType};
pub use envelope::{DescriptorFlags, DescriptorId, Envelope, Timestamps};
pub use permission::Permission;
pub use variants::{Descriptor, DescriptorPayload, InvitationState};

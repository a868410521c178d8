//! Per-peer annotations attached to a descriptor: a concrete
//! in-memory-friendly model around the row shape and the
//! `onUpdateAnnotation` observer event.

use crate::descriptor::envelope::DescriptorId;
use crate::identity::TwincodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnotationType {
    Reaction,
    Forwarded,
    Custom(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub descriptor_id: DescriptorId,
    pub annotator: TwincodeId,
    pub kind: AnnotationType,
    pub value: String,
}

/// A per-descriptor set of annotations keyed by `(annotator, kind)`, so a
/// given peer has at most one annotation of a given kind on a descriptor
/// (e.g. one reaction), matching how reactions behave in chat systems this
/// domain is modeled on.
#[derive(Debug, Default)]
pub struct AnnotationSet {
    entries: HashMap<(TwincodeId, AnnotationType), String>,
}

impl AnnotationSet {
    pub fn set(&mut self, annotator: TwincodeId, kind: AnnotationType, value: String) {
        self.entries.insert((annotator, kind), value);
    }

    pub fn clear(&mut self, annotator: TwincodeId, kind: &AnnotationType) -> bool {
        self.entries.remove(&(annotator, kind.clone())).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(TwincodeId, AnnotationType), &String)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

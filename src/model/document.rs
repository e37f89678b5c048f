use super::{Dictionary, Object, ObjectId};
use crate::error::ModelError;
use std::collections::BTreeMap;

/// Minimal stand-in for the PDF document this core is handed by its caller.
///
/// The real reader/writer is out of scope for this crate (spec.md §1); all we
/// need here is the trailer (for `/ID` and `/Encrypt`) and an object table the
/// encrypt/decrypt walk can traverse.
#[derive(Debug, Default)]
pub struct Document {
    pub trailer: Dictionary,
    pub objects: BTreeMap<ObjectId, Object>,
}

impl Document {
    pub fn new() -> Self {
        Document { trailer: Dictionary::new(), objects: BTreeMap::new() }
    }

    pub fn get_object(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(&id)
    }

    pub fn is_encrypted(&self) -> bool {
        self.trailer.has(b"Encrypt")
    }

    pub fn get_encrypt_dict(&self) -> Result<&Dictionary, ModelError> {
        self.trailer.get(b"Encrypt").and_then(Object::as_dict)
    }

    /// First element of the file identifier array (`/ID`), required input to
    /// every legacy (R2-R4) key-derivation algorithm.
    pub fn first_id(&self) -> Result<&[u8], ModelError> {
        self.trailer
            .get(b"ID")
            .and_then(Object::as_array)?
            .first()
            .ok_or_else(|| ModelError::MissingKey("ID".into()))
            .and_then(Object::as_str)
    }
}

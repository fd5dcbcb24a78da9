//! Store trait definitions

use cellblock_util::SubjectId;

use crate::{Document, StoreResult};

/// A prisoner document together with the key it was stored under
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub key: String,
    pub document: Document,
}

/// Raw document storage.
///
/// Implementations only move documents in and out; versioning and parsing
/// happen above this layer.
pub trait RecordStore: Send + Sync {
    // Prisoners

    /// Insert or replace the document for a prisoner
    fn put_prisoner(&self, id: &SubjectId, document: &Document) -> StoreResult<()>;

    /// Remove a prisoner's document; removing a missing one is not an error
    fn delete_prisoner(&self, id: &SubjectId) -> StoreResult<()>;

    /// All prisoner documents that could be decoded
    fn prisoner_documents(&self) -> StoreResult<Vec<StoredDocument>>;

    // Jails

    /// Replace the jail list document
    fn put_jails(&self, document: &Document) -> StoreResult<()>;

    /// The jail list document, if one was ever written
    fn jails_document(&self) -> StoreResult<Option<Document>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

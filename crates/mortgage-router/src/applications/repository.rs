use chrono::{DateTime, Utc};

use super::domain::{
    Application, ApplicationId, ApplicationKind, Document, NewDocument, StorageKey,
};
use crate::identity::UserId;
use crate::store::RepositoryError;

/// Storage abstraction for application and document records so the registry, vault, and
/// scheduler can be exercised against any backend.
pub trait ApplicationRepository: Send + Sync {
    fn insert_application(
        &self,
        broker: UserId,
        kind: ApplicationKind,
        created_at: DateTime<Utc>,
    ) -> Result<Application, RepositoryError>;
    fn application(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError>;
    /// Applications assigned to `reviewer`, newest first.
    fn assigned_to(&self, reviewer: UserId) -> Result<Vec<Application>, RepositoryError>;
    /// Applications created by `broker`, newest first.
    fn originated_by(&self, broker: UserId) -> Result<Vec<Application>, RepositoryError>;
    /// Append a document row. Fails with [`RepositoryError::NotFound`] for an unknown
    /// application and [`RepositoryError::Conflict`] for a reused storage key.
    fn insert_document(&self, document: NewDocument) -> Result<Document, RepositoryError>;
    /// Documents of one application in upload order.
    fn documents_for(&self, application: ApplicationId) -> Result<Vec<Document>, RepositoryError>;
    fn document_by_key(&self, key: &StorageKey) -> Result<Option<Document>, RepositoryError>;
}

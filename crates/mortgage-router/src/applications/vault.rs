use std::sync::Arc;

use tracing::{debug, warn};

use super::access::can_access;
use super::domain::{Document, StorageKey};
use super::repository::ApplicationRepository;
use super::storage::{DocumentStorage, StorageError};
use crate::identity::Identity;
use crate::store::RepositoryError;

/// Bytes of a document the caller is entitled to read.
#[derive(Debug, Clone)]
pub struct ResolvedDocument {
    pub document: Document,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Gatekeeper for stored documents: only the reviewer assigned to the owning application
/// receives bytes.
pub struct DocumentVault<R, B> {
    repository: Arc<R>,
    storage: Arc<B>,
}

impl<R, B> DocumentVault<R, B>
where
    R: ApplicationRepository + 'static,
    B: DocumentStorage + 'static,
{
    pub fn new(repository: Arc<R>, storage: Arc<B>) -> Self {
        Self {
            repository,
            storage,
        }
    }

    /// Resolve a caller-supplied storage key for `identity`.
    ///
    /// Malformed and unknown keys are `NotFound`; known keys the caller may not read are
    /// `Forbidden`. Storage is only touched after authorization succeeds.
    pub fn resolve(
        &self,
        raw_key: &str,
        identity: &Identity,
    ) -> Result<ResolvedDocument, VaultError> {
        let key = StorageKey::parse(raw_key.trim()).ok_or(VaultError::NotFound)?;
        let document = self
            .repository
            .document_by_key(&key)?
            .ok_or(VaultError::NotFound)?;

        let Some(application) = self.repository.application(document.application_id)? else {
            warn!(storage_key = %key, "document references a missing application");
            return Err(VaultError::Forbidden);
        };

        if !can_access(identity, &application) {
            warn!(
                user_id = %identity.user_id,
                application_id = %application.id,
                "document access denied"
            );
            return Err(VaultError::Forbidden);
        }

        let bytes = self.storage.get(&key).map_err(|err| match err {
            StorageError::Missing(_) => VaultError::NotFound,
            other => VaultError::Storage(other),
        })?;

        let content_type = key
            .extension()
            .and_then(|ext| mime_guess::from_ext(ext).first())
            .unwrap_or(mime::APPLICATION_OCTET_STREAM)
            .to_string();

        debug!(
            user_id = %identity.user_id,
            application_id = %application.id,
            storage_key = %key,
            "document served"
        );

        Ok(ResolvedDocument {
            document,
            content_type,
            bytes,
        })
    }
}

/// Error raised while resolving a document.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("document not found")]
    NotFound,
    #[error("document access forbidden")]
    Forbidden,
    #[error(transparent)]
    Storage(StorageError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

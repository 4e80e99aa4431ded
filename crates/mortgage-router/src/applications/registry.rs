use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error};

use super::domain::{
    Application, ApplicationDossier, ApplicationId, ApplicationKind, Document, DocumentCategory,
    NewDocument, StorageKey,
};
use super::repository::ApplicationRepository;
use super::storage::{DocumentStorage, StorageError};
use crate::identity::UserId;
use crate::store::RepositoryError;

/// A file received from the application form.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub category: DocumentCategory,
    pub original_name: Option<String>,
    pub bytes: Vec<u8>,
}

/// Application and document records plus the bytes behind them.
///
/// The registry performs no authorization; callers decide who may reach it.
pub struct ApplicationRegistry<R, B> {
    repository: Arc<R>,
    storage: Arc<B>,
}

impl<R, B> ApplicationRegistry<R, B>
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

    /// Create an unassigned application for `broker`.
    pub fn create(
        &self,
        broker: UserId,
        kind: ApplicationKind,
    ) -> Result<Application, RegistryError> {
        let application = self
            .repository
            .insert_application(broker, kind, Utc::now())?;
        debug!(application_id = %application.id, broker_id = %broker, "application created");
        Ok(application)
    }

    pub fn fetch(&self, id: ApplicationId) -> Result<Application, RegistryError> {
        self.repository
            .application(id)?
            .ok_or(RegistryError::NotFound(id))
    }

    /// Store the upload under a generated key and record it. Earlier uploads for the same
    /// category are kept; a failed metadata write removes the stored bytes again.
    pub fn attach(
        &self,
        application: ApplicationId,
        upload: DocumentUpload,
    ) -> Result<Document, RegistryError> {
        let staged = self.stage(application, &upload)?;
        match self.repository.insert_document(staged.clone()) {
            Ok(document) => {
                debug!(
                    application_id = %application,
                    category = upload.category.field_name(),
                    storage_key = %document.storage_key,
                    bytes = upload.bytes.len(),
                    "document attached"
                );
                Ok(document)
            }
            Err(err) => {
                self.discard(&[staged]);
                Err(match err {
                    RepositoryError::NotFound => RegistryError::NotFound(application),
                    other => RegistryError::Repository(other),
                })
            }
        }
    }

    /// Write the upload's bytes under a fresh key and return the row that would record it.
    /// Nothing is recorded; pair with [`discard`](Self::discard) if the row never lands.
    pub fn stage(
        &self,
        application: ApplicationId,
        upload: &DocumentUpload,
    ) -> Result<NewDocument, RegistryError> {
        if upload.bytes.is_empty() {
            return Err(RegistryError::EmptyUpload(upload.category));
        }

        let storage_key = StorageKey::generate(
            application,
            upload.category,
            upload.original_name.as_deref(),
        );
        self.storage.put(&storage_key, &upload.bytes)?;
        Ok(NewDocument {
            application_id: application,
            category: upload.category,
            storage_key,
            uploaded_at: Utc::now(),
        })
    }

    /// Remove the bytes behind staged rows that were never recorded.
    pub fn discard(&self, staged: &[NewDocument]) {
        for document in staged {
            if let Err(cleanup) = self.storage.remove(&document.storage_key) {
                error!(
                    storage_key = %document.storage_key,
                    error = %cleanup,
                    "orphaned upload left behind"
                );
            }
        }
    }

    pub fn documents(&self, application: ApplicationId) -> Result<Vec<Document>, RegistryError> {
        Ok(self.repository.documents_for(application)?)
    }

    pub fn dossier(&self, id: ApplicationId) -> Result<ApplicationDossier, RegistryError> {
        let application = self.fetch(id)?;
        let documents = self.documents(id)?;
        Ok(ApplicationDossier {
            application,
            documents,
        })
    }

    /// Applications assigned to `reviewer` with their documents, newest first.
    pub fn list_assigned(
        &self,
        reviewer: UserId,
    ) -> Result<Vec<ApplicationDossier>, RegistryError> {
        let applications = self.repository.assigned_to(reviewer)?;
        self.with_documents(applications)
    }

    /// Applications created by `broker` with their documents, newest first.
    pub fn list_originated(
        &self,
        broker: UserId,
    ) -> Result<Vec<ApplicationDossier>, RegistryError> {
        let applications = self.repository.originated_by(broker)?;
        self.with_documents(applications)
    }

    fn with_documents(
        &self,
        applications: Vec<Application>,
    ) -> Result<Vec<ApplicationDossier>, RegistryError> {
        applications
            .into_iter()
            .map(|application| {
                let documents = self.repository.documents_for(application.id)?;
                Ok::<_, RegistryError>(ApplicationDossier {
                    application,
                    documents,
                })
            })
            .collect()
    }
}

/// Error raised by the application registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("application {0} not found")]
    NotFound(ApplicationId),
    #[error("upload for {} is empty", .0.field_name())]
    EmptyUpload(DocumentCategory),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

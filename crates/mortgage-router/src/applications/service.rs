use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::access::{can_access, is_originator};
use super::assignment::{AssignmentError, AssignmentLedger, AssignmentScheduler};
use super::domain::{
    Application, ApplicationDossier, ApplicationId, ApplicationKind, Document,
};
use super::registry::{ApplicationRegistry, DocumentUpload, RegistryError};
use super::repository::ApplicationRepository;
use super::storage::{DocumentStorage, StorageError};
use super::vault::{DocumentVault, ResolvedDocument, VaultError};
use crate::identity::{Identity, Role, UserId};
use crate::store::RepositoryError;

/// Result of a broker submitting the application form.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub application: ApplicationId,
    pub reviewer: UserId,
    pub documents: Vec<Document>,
}

/// Broker and reviewer flows composed from the registry, scheduler, and vault.
///
/// Every operation takes the caller's resolved [`Identity`] and applies the ownership check
/// for that flow before touching data.
pub struct ApplicationPortal<S, B> {
    registry: ApplicationRegistry<S, B>,
    scheduler: AssignmentScheduler<S>,
    vault: DocumentVault<S, B>,
}

impl<S, B> ApplicationPortal<S, B>
where
    S: ApplicationRepository + AssignmentLedger + 'static,
    B: DocumentStorage + 'static,
{
    pub fn new(store: Arc<S>, storage: Arc<B>) -> Self {
        Self {
            registry: ApplicationRegistry::new(store.clone(), storage.clone()),
            scheduler: AssignmentScheduler::new(store.clone()),
            vault: DocumentVault::new(store, storage),
        }
    }

    pub fn registry(&self) -> &ApplicationRegistry<S, B> {
        &self.registry
    }

    pub fn scheduler(&self) -> &AssignmentScheduler<S> {
        &self.scheduler
    }

    /// Create an unassigned application owned by the calling broker.
    pub fn start_application(
        &self,
        identity: &Identity,
        kind: &str,
    ) -> Result<Application, PortalError> {
        require_role(identity, Role::Broker)?;
        let kind = ApplicationKind::parse(kind).ok_or_else(|| {
            PortalError::Validation(format!(
                "application_type must be `{}` or `{}`",
                ApplicationKind::SelfApplicant.label(),
                ApplicationKind::SomeoneElse.label()
            ))
        })?;
        let application = self.registry.create(identity.user_id, kind)?;
        info!(
            application_id = %application.id,
            broker_id = %identity.user_id,
            kind = kind.label(),
            "application started"
        );
        Ok(application)
    }

    /// The application and its documents, for the broker who created it.
    pub fn application_form(
        &self,
        identity: &Identity,
        id: ApplicationId,
    ) -> Result<ApplicationDossier, PortalError> {
        let application = self.owned_application(identity, id)?;
        let documents = self.registry.documents(application.id)?;
        Ok(ApplicationDossier {
            application,
            documents,
        })
    }

    /// Attach `uploads` to an owned, unassigned application and assign it to a reviewer.
    ///
    /// All or nothing: the bytes are written first, then the document rows and the
    /// assignment commit together. On any refusal (already assigned, no reviewer, a failed
    /// write) nothing is recorded and the written bytes are removed again.
    pub fn submit(
        &self,
        identity: &Identity,
        id: ApplicationId,
        uploads: Vec<DocumentUpload>,
    ) -> Result<Submission, PortalError> {
        let application = self.owned_application(identity, id)?;
        if let Some(reviewer) = application.assigned_reviewer {
            return Err(PortalError::AlreadyAssigned {
                application: id,
                reviewer,
            });
        }

        let mut staged = Vec::with_capacity(uploads.len());
        for upload in &uploads {
            match self.registry.stage(id, upload) {
                Ok(document) => staged.push(document),
                Err(err) => {
                    self.registry.discard(&staged);
                    return Err(err.into());
                }
            }
        }

        match self.scheduler.assign_with(id, staged.clone()) {
            Ok((assignment, documents)) => Ok(Submission {
                application: id,
                reviewer: assignment.reviewer,
                documents,
            }),
            Err(err) => {
                self.registry.discard(&staged);
                Err(err.into())
            }
        }
    }

    /// Applications the calling broker created, newest first.
    pub fn broker_overview(
        &self,
        identity: &Identity,
    ) -> Result<Vec<ApplicationDossier>, PortalError> {
        require_role(identity, Role::Broker)?;
        Ok(self.registry.list_originated(identity.user_id)?)
    }

    /// Applications assigned to the calling reviewer, newest first.
    pub fn dashboard(&self, identity: &Identity) -> Result<Vec<ApplicationDossier>, PortalError> {
        require_role(identity, Role::Admin)?;
        Ok(self.registry.list_assigned(identity.user_id)?)
    }

    /// One application, for the reviewer it is assigned to.
    pub fn view(
        &self,
        identity: &Identity,
        id: ApplicationId,
    ) -> Result<ApplicationDossier, PortalError> {
        let dossier = self.registry.dossier(id)?;
        if !can_access(identity, &dossier.application) {
            warn!(
                user_id = %identity.user_id,
                application_id = %id,
                "application view denied"
            );
            return Err(PortalError::Forbidden);
        }
        Ok(dossier)
    }

    /// Document bytes for the assigned reviewer. Unknown and unauthorized keys are
    /// indistinguishable to the caller.
    pub fn serve(&self, identity: &Identity, key: &str) -> Result<ResolvedDocument, PortalError> {
        self.vault.resolve(key, identity).map_err(|err| match err {
            VaultError::NotFound | VaultError::Forbidden => PortalError::DocumentNotFound,
            VaultError::Storage(err) => PortalError::Storage(err),
            VaultError::Repository(err) => PortalError::Repository(err),
        })
    }

    fn owned_application(
        &self,
        identity: &Identity,
        id: ApplicationId,
    ) -> Result<Application, PortalError> {
        let application = self.registry.fetch(id)?;
        if !is_originator(identity, &application) {
            warn!(
                user_id = %identity.user_id,
                application_id = %id,
                "broker does not own application"
            );
            return Err(PortalError::Forbidden);
        }
        Ok(application)
    }
}

fn require_role(identity: &Identity, role: Role) -> Result<(), PortalError> {
    if identity.role == role {
        Ok(())
    } else {
        Err(PortalError::Forbidden)
    }
}

/// Error raised by the application portal.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("{0}")]
    Validation(String),
    #[error("application {0} not found")]
    NotFound(ApplicationId),
    #[error("document not found")]
    DocumentNotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("application {application} is already assigned to reviewer {reviewer}")]
    AlreadyAssigned {
        application: ApplicationId,
        reviewer: UserId,
    },
    #[error("no reviewers available; submit again later")]
    NoReviewersAvailable,
    #[error(transparent)]
    Storage(StorageError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RegistryError> for PortalError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => PortalError::NotFound(id),
            RegistryError::EmptyUpload(category) => {
                PortalError::Validation(format!("{} upload is empty", category.field_name()))
            }
            RegistryError::Storage(err) => PortalError::Storage(err),
            RegistryError::Repository(err) => PortalError::Repository(err),
        }
    }
}

impl From<AssignmentError> for PortalError {
    fn from(err: AssignmentError) -> Self {
        match err {
            AssignmentError::NoReviewersAvailable => PortalError::NoReviewersAvailable,
            AssignmentError::ApplicationNotFound(id) => PortalError::NotFound(id),
            AssignmentError::AlreadyAssigned {
                application,
                reviewer,
            } => PortalError::AlreadyAssigned {
                application,
                reviewer,
            },
            AssignmentError::Repository(err) => PortalError::Repository(err),
        }
    }
}

//! Mortgage application intake, reviewer assignment, and document access.
//!
//! Brokers create applications and upload documents through the [`ApplicationPortal`];
//! submission hands the application to the [`AssignmentScheduler`], and from then on only
//! the assigned reviewer can read it or its documents through the [`DocumentVault`].

pub mod access;
pub mod assignment;
pub mod domain;
pub mod registry;
pub mod repository;
pub mod router;
pub mod service;
pub mod storage;
pub mod vault;

#[cfg(test)]
mod tests;

pub use access::{can_access, is_originator};
pub use assignment::{
    next_reviewer, Assignment, AssignmentError, AssignmentLedger, AssignmentScheduler,
    ReviewerRoster,
};
pub use domain::{
    Application, ApplicationDossier, ApplicationId, ApplicationKind, Document, DocumentCategory,
    DocumentId, NewDocument, StorageKey,
};
pub use registry::{ApplicationRegistry, DocumentUpload, RegistryError};
pub use repository::ApplicationRepository;
pub use router::{application_router, PortalState};
pub use service::{ApplicationPortal, PortalError, Submission};
pub use storage::{DocumentStorage, FileSystemStorage, StorageError};
pub use vault::{DocumentVault, ResolvedDocument, VaultError};

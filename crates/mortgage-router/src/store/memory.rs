use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::RepositoryError;
use crate::applications::{
    Application, ApplicationId, ApplicationKind, ApplicationRepository, AssignmentError,
    AssignmentLedger, Document, DocumentId, NewDocument, ReviewerRoster, StorageKey,
};
use crate::identity::{IdentityStore, NewUser, ResetTicket, Role, User, UserId};

/// Every table behind a single mutex, so each trait call (and each assignment) is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<UserId, User>,
    reset_tickets: HashMap<UserId, ResetTicket>,
    applications: BTreeMap<ApplicationId, Application>,
    documents: Vec<Document>,
    cursor: Option<UserId>,
    last_user_id: i64,
    last_application_id: i64,
    last_document_id: i64,
}

impl State {
    fn reviewer_ids(&self) -> Vec<UserId> {
        self.users
            .values()
            .filter(|user| user.role == Role::Admin)
            .map(|user| user.id)
            .collect()
    }

    fn key_taken(&self, key: &StorageKey) -> bool {
        self.documents
            .iter()
            .any(|existing| &existing.storage_key == key)
    }

    fn push_document(&mut self, document: NewDocument) -> Document {
        self.last_document_id += 1;
        let stored = Document {
            id: DocumentId(self.last_document_id),
            application_id: document.application_id,
            category: document.category,
            storage_key: document.storage_key,
            uploaded_at: document.uploaded_at,
        };
        self.documents.push(stored.clone());
        stored
    }
}

impl MemoryStore {
    fn lock(&self) -> Result<MutexGuard<'_, State>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Drop an account, leaving applications and the cursor untouched.
    #[cfg(test)]
    pub(crate) fn retire_user(&self, id: UserId) {
        let mut state = self.lock().expect("memory store lock");
        state.users.remove(&id);
        state.reset_tickets.remove(&id);
    }
}

fn newest_first(mut applications: Vec<Application>) -> Vec<Application> {
    applications.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
    applications
}

impl IdentityStore for MemoryStore {
    fn insert_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        let mut state = self.lock()?;
        if state.users.values().any(|existing| existing.email == user.email) {
            return Err(RepositoryError::Conflict);
        }
        state.last_user_id += 1;
        let stored = User {
            id: UserId(state.last_user_id),
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            profile: user.profile,
            created_at: Utc::now(),
        };
        state.users.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let state = self.lock()?;
        Ok(state.users.values().find(|user| user.email == email).cloned())
    }

    fn user_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    fn reviewer_ids(&self) -> Result<Vec<UserId>, RepositoryError> {
        Ok(self.lock()?.reviewer_ids())
    }

    fn store_reset_ticket(&self, id: UserId, ticket: ResetTicket) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if !state.users.contains_key(&id) {
            return Err(RepositoryError::NotFound);
        }
        state.reset_tickets.insert(id, ticket);
        Ok(())
    }

    fn user_by_reset_digest(
        &self,
        token_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, RepositoryError> {
        let state = self.lock()?;
        let holder = state
            .reset_tickets
            .iter()
            .find(|(_, ticket)| ticket.token_digest == token_digest && ticket.expires_at > now)
            .map(|(id, _)| *id);
        Ok(holder.and_then(|id| state.users.get(&id).cloned()))
    }

    fn update_password(&self, id: UserId, password_hash: &str) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let user = state.users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        user.password_hash = password_hash.to_string();
        state.reset_tickets.remove(&id);
        Ok(())
    }
}

impl ApplicationRepository for MemoryStore {
    fn insert_application(
        &self,
        broker: UserId,
        kind: ApplicationKind,
        created_at: DateTime<Utc>,
    ) -> Result<Application, RepositoryError> {
        let mut state = self.lock()?;
        state.last_application_id += 1;
        let application = Application {
            id: ApplicationId(state.last_application_id),
            broker_id: broker,
            kind,
            assigned_reviewer: None,
            created_at,
        };
        state
            .applications
            .insert(application.id, application.clone());
        Ok(application)
    }

    fn application(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError> {
        Ok(self.lock()?.applications.get(&id).cloned())
    }

    fn assigned_to(&self, reviewer: UserId) -> Result<Vec<Application>, RepositoryError> {
        let state = self.lock()?;
        let assigned = state
            .applications
            .values()
            .filter(|application| application.assigned_reviewer == Some(reviewer))
            .cloned()
            .collect();
        Ok(newest_first(assigned))
    }

    fn originated_by(&self, broker: UserId) -> Result<Vec<Application>, RepositoryError> {
        let state = self.lock()?;
        let originated = state
            .applications
            .values()
            .filter(|application| application.broker_id == broker)
            .cloned()
            .collect();
        Ok(newest_first(originated))
    }

    fn insert_document(&self, document: NewDocument) -> Result<Document, RepositoryError> {
        let mut state = self.lock()?;
        if !state.applications.contains_key(&document.application_id) {
            return Err(RepositoryError::NotFound);
        }
        if state.key_taken(&document.storage_key) {
            return Err(RepositoryError::Conflict);
        }
        Ok(state.push_document(document))
    }

    fn documents_for(&self, application: ApplicationId) -> Result<Vec<Document>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .documents
            .iter()
            .filter(|document| document.application_id == application)
            .cloned()
            .collect())
    }

    fn document_by_key(&self, key: &StorageKey) -> Result<Option<Document>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .documents
            .iter()
            .find(|document| &document.storage_key == key)
            .cloned())
    }
}

impl AssignmentLedger for MemoryStore {
    fn commit_submission(
        &self,
        application: ApplicationId,
        documents: Vec<NewDocument>,
        select: &dyn Fn(&ReviewerRoster) -> Option<UserId>,
    ) -> Result<(UserId, Vec<Document>), AssignmentError> {
        let mut state = self.lock()?;
        let current = state
            .applications
            .get(&application)
            .ok_or(AssignmentError::ApplicationNotFound(application))?;
        if let Some(reviewer) = current.assigned_reviewer {
            return Err(AssignmentError::AlreadyAssigned {
                application,
                reviewer,
            });
        }

        // Validate every row before touching state; there is no rollback here.
        let mut keys = HashSet::new();
        for document in &documents {
            if document.application_id != application {
                return Err(RepositoryError::NotFound.into());
            }
            if state.key_taken(&document.storage_key) || !keys.insert(&document.storage_key) {
                return Err(RepositoryError::Conflict.into());
            }
        }

        let roster = ReviewerRoster {
            reviewers: state.reviewer_ids(),
            cursor: state.cursor,
        };
        let reviewer = select(&roster).ok_or(AssignmentError::NoReviewersAvailable)?;

        let stored = documents
            .into_iter()
            .map(|document| state.push_document(document))
            .collect();
        if let Some(record) = state.applications.get_mut(&application) {
            record.assigned_reviewer = Some(reviewer);
        }
        state.cursor = Some(reviewer);
        Ok((reviewer, stored))
    }

    fn cursor(&self) -> Result<Option<UserId>, RepositoryError> {
        Ok(self.lock()?.cursor)
    }
}

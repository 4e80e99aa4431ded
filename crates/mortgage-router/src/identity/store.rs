use chrono::{DateTime, Utc};

use super::domain::{NewUser, ResetTicket, User, UserId};
use crate::store::RepositoryError;

/// Account storage. The only component allowed to answer "who is this session".
pub trait IdentityStore: Send + Sync {
    /// Insert a new account. Fails with [`RepositoryError::Conflict`] when the email is taken.
    fn insert_user(&self, user: NewUser) -> Result<User, RepositoryError>;
    fn user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
    fn user_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    /// All reviewer ids in ascending order.
    fn reviewer_ids(&self) -> Result<Vec<UserId>, RepositoryError>;
    fn store_reset_ticket(&self, id: UserId, ticket: ResetTicket) -> Result<(), RepositoryError>;
    /// Look up the account holding an unexpired ticket with this digest.
    fn user_by_reset_digest(
        &self,
        token_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, RepositoryError>;
    /// Replace the password hash and drop any pending reset ticket.
    fn update_password(&self, id: UserId, password_hash: &str) -> Result<(), RepositoryError>;
}

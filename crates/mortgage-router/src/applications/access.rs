//! Ownership predicates shared by every handler that exposes application data.

use super::domain::Application;
use crate::identity::{Identity, Role};

/// True iff `identity` is the reviewer on record for `application`.
///
/// Unassigned applications are never accessible. The originating broker plays no part.
pub fn can_access(identity: &Identity, application: &Application) -> bool {
    identity.role == Role::Admin && application.assigned_reviewer == Some(identity.user_id)
}

/// True iff `identity` is the broker who created `application`.
pub fn is_originator(identity: &Identity, application: &Application) -> bool {
    identity.role == Role::Broker && application.broker_id == identity.user_id
}

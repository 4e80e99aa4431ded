use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Database identifier for a user. Assigned monotonically and never reused, so the
/// numeric order doubles as the reviewer rotation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two account roles. Reviewers are called "admin" on the wire and in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Broker,
    Admin,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Broker => "broker",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "broker" => Some(Role::Broker),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Landing page a freshly authenticated user is sent to.
    pub const fn landing_path(self) -> &'static str {
        match self {
            Role::Broker => "/broker",
            Role::Admin => "/admin-dashboard",
        }
    }
}

/// Optional contact details captured at signup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub postal_code: Option<String>,
}

/// Stored account record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.id,
            email: self.email.clone(),
            role: self.role,
        }
    }
}

/// Insert payload for a new account; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub profile: Profile,
}

/// The authenticated caller, resolved once per request and passed explicitly to every
/// operation that makes an authorization decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
    pub role: Role,
}

/// Pending password reset. Only the SHA-256 digest of the token is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetTicket {
    pub token_digest: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_storage_labels() {
        for role in [Role::Broker, Role::Admin] {
            assert_eq!(Role::parse(role.label()), Some(role));
        }
        assert_eq!(Role::parse("superuser"), None);
        assert_eq!(Role::parse("Admin"), None);
    }

    #[test]
    fn landing_path_depends_on_role() {
        assert_eq!(Role::Admin.landing_path(), "/admin-dashboard");
        assert_eq!(Role::Broker.landing_path(), "/broker");
    }
}

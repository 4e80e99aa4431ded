//! Cookie-backed session resolution and role gating.
//!
//! There is no server-side session table. Login hands the browser a `session_email`
//! cookie whose lifetime is carried by its own `Max-Age`/`Expires` attributes; every
//! protected request re-resolves that credential against the [`IdentityStore`].

use std::marker::PhantomData;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::warn;

use super::domain::{Identity, Role};
use super::store::IdentityStore;

pub const SESSION_COOKIE: &str = "session_email";
pub const ANONYMOUS_ENTRY: &str = "/login";

/// Resolves session credentials to identities and enforces role requirements.
#[derive(Clone)]
pub struct SessionGuard {
    identities: Arc<dyn IdentityStore>,
}

impl SessionGuard {
    pub fn new(identities: Arc<dyn IdentityStore>) -> Self {
        Self { identities }
    }

    /// Resolve a credential and check it against `required`.
    ///
    /// A missing or unknown credential is `Unauthenticated`; a known user with the wrong role
    /// is `Forbidden`. Neither case touches storage beyond the read.
    pub fn resolve(
        &self,
        credential: Option<&str>,
        required: Option<Role>,
    ) -> Result<Identity, SessionRejection> {
        let email = match credential.map(str::trim) {
            Some(value) if !value.is_empty() => value,
            _ => return Err(SessionRejection::Unauthenticated),
        };

        let user = self
            .identities
            .user_by_email(email)
            .map_err(|err| SessionRejection::Unavailable(err.to_string()))?
            .ok_or(SessionRejection::Unauthenticated)?;

        if let Some(required) = required {
            if user.role != required {
                warn!(
                    user_id = %user.id,
                    role = user.role.label(),
                    required = required.label(),
                    "role check rejected session"
                );
                return Err(SessionRejection::Forbidden {
                    required,
                    actual: user.role,
                });
            }
        }

        Ok(user.identity())
    }
}

/// Why a request was refused before reaching its handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionRejection {
    #[error("no valid session")]
    Unauthenticated,
    #[error("{} role required, session holds {}", .required.label(), .actual.label())]
    Forbidden { required: Role, actual: Role },
    #[error("identity store unavailable: {0}")]
    Unavailable(String),
}

impl IntoResponse for SessionRejection {
    fn into_response(self) -> Response {
        match self {
            SessionRejection::Unauthenticated => Redirect::to(ANONYMOUS_ENTRY).into_response(),
            SessionRejection::Forbidden { .. } => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "forbidden" })),
            )
                .into_response(),
            SessionRejection::Unavailable(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),
        }
    }
}

/// Compile-time role requirement for [`Authenticated`].
pub trait RoleGate: Send + Sync + 'static {
    const REQUIRED: Option<Role>;
}

/// Any signed-in user.
pub struct AnyRole;
/// Brokers only.
pub struct BrokerOnly;
/// Reviewers only.
pub struct ReviewerOnly;

impl RoleGate for AnyRole {
    const REQUIRED: Option<Role> = None;
}

impl RoleGate for BrokerOnly {
    const REQUIRED: Option<Role> = Some(Role::Broker);
}

impl RoleGate for ReviewerOnly {
    const REQUIRED: Option<Role> = Some(Role::Admin);
}

/// Extractor yielding the resolved identity once the gate `G` has passed.
#[derive(Debug)]
pub struct Authenticated<G> {
    pub identity: Identity,
    gate: PhantomData<fn() -> G>,
}

impl<G> Authenticated<G> {
    pub fn into_identity(self) -> Identity {
        self.identity
    }
}

pub type BrokerSession = Authenticated<BrokerOnly>;
pub type ReviewerSession = Authenticated<ReviewerOnly>;

#[async_trait]
impl<S, G> FromRequestParts<S> for Authenticated<G>
where
    S: Send + Sync,
    SessionGuard: FromRef<S>,
    G: RoleGate,
{
    type Rejection = SessionRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let guard = SessionGuard::from_ref(state);
        let credential = session_credential(&parts.headers);
        let required = G::REQUIRED;
        let identity =
            tokio::task::spawn_blocking(move || guard.resolve(credential.as_deref(), required))
                .await
                .map_err(|err| {
                    SessionRejection::Unavailable(format!("session lookup failed: {err}"))
                })??;
        Ok(Self {
            identity,
            gate: PhantomData,
        })
    }
}

/// Read the session credential from any `Cookie` header on the request.
pub fn session_credential(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value issued at login.
pub fn issue_session_cookie(email: &str, ttl: Duration, now: DateTime<Utc>) -> String {
    let expires = now + ttl;
    format!(
        "{SESSION_COOKIE}={email}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}; Expires={}",
        ttl.num_seconds(),
        http_date(expires)
    )
}

/// `Set-Cookie` value that removes the session. Safe to send when no session exists.
pub fn clear_session_cookie() -> String {
    format!(
        "{SESSION_COOKIE}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0; Expires={}",
        http_date(DateTime::<Utc>::from(std::time::UNIX_EPOCH))
    )
}

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::credentials::{
    hash_password, issue_reset_token, reset_token_digest, verify_password, CredentialError,
};
use super::domain::{Identity, NewUser, Profile, ResetTicket, Role};
use super::session::issue_session_cookie;
use super::store::IdentityStore;
use crate::store::RepositoryError;

/// Tunables for account flows.
#[derive(Debug, Clone)]
pub struct AccountSettings {
    pub session_ttl: Duration,
    pub reset_ttl: Duration,
    pub public_url: String,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            session_ttl: Duration::hours(24),
            reset_ttl: Duration::hours(1),
            public_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Broker signup form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
}

/// Forgot-password form. The names must match the stored profile.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResetRequest {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResetSubmission {
    pub token: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// Outbound delivery of reset links (e-mail, chat, ...).
pub trait ResetNotifier: Send + Sync {
    fn deliver(&self, notice: ResetNotice) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetNotice {
    pub email: String,
    pub reset_link: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Development notifier that only records the notice in the log.
#[derive(Debug, Default, Clone)]
pub struct LogResetNotifier;

impl ResetNotifier for LogResetNotifier {
    fn deliver(&self, notice: ResetNotice) -> Result<(), NotifyError> {
        info!(email = %notice.email, expires_at = %notice.expires_at, "password reset issued");
        debug!(link = %notice.reset_link, "password reset link");
        Ok(())
    }
}

/// Signup, login, reviewer provisioning, and password reset.
pub struct AccountService<S> {
    store: Arc<S>,
    notifier: Arc<dyn ResetNotifier>,
    settings: AccountSettings,
}

impl<S> AccountService<S>
where
    S: IdentityStore + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<dyn ResetNotifier>, settings: AccountSettings) -> Self {
        Self {
            store,
            notifier,
            settings,
        }
    }

    pub fn settings(&self) -> &AccountSettings {
        &self.settings
    }

    /// Create a broker account. Reviewers are never self-registered.
    pub fn register(&self, registration: Registration) -> Result<Identity, AccountError> {
        let email = session_safe_email(&registration.email)?;
        let password = secret("password", &registration.password)?;
        let profile = Profile {
            first_name: optional(registration.first_name),
            last_name: optional(registration.last_name),
            phone: optional(registration.phone),
            postal_code: optional(registration.postal_code),
        };
        let identity = self.create(email, password, Role::Broker, profile)?;
        info!(user_id = %identity.user_id, "broker registered");
        Ok(identity)
    }

    /// Provision a reviewer account (operator CLI and startup seeding).
    pub fn create_reviewer(
        &self,
        email: &str,
        password: &str,
        profile: Profile,
    ) -> Result<Identity, AccountError> {
        let email = session_safe_email(email)?;
        let password = secret("password", password)?;
        let identity = self.create(email, password, Role::Admin, profile)?;
        info!(user_id = %identity.user_id, "reviewer created");
        Ok(identity)
    }

    /// Create the configured reviewer only when no reviewer exists yet.
    pub fn seed_reviewer(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<Identity>, AccountError> {
        if !self.store.reviewer_ids()?.is_empty() {
            return Ok(None);
        }
        let profile = Profile {
            first_name: Some("Admin".to_string()),
            last_name: Some("User".to_string()),
            ..Profile::default()
        };
        self.create_reviewer(email, password, profile).map(Some)
    }

    /// Check an email/password pair. Unknown email and wrong password are indistinguishable.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<Identity, AccountError> {
        let email = email.trim();
        let user = self
            .store
            .user_by_email(email)?
            .ok_or(AccountError::InvalidCredentials)?;
        if !verify_password(password, &user.password_hash) {
            warn!(user_id = %user.id, "password verification failed");
            return Err(AccountError::InvalidCredentials);
        }
        Ok(user.identity())
    }

    /// `Set-Cookie` value for a freshly authenticated identity.
    pub fn session_cookie(&self, identity: &Identity, now: DateTime<Utc>) -> String {
        issue_session_cookie(&identity.email, self.settings.session_ttl, now)
    }

    /// Issue a reset token when email and names match an account.
    ///
    /// Returns `Ok(())` whether or not an account matched so the response does not reveal
    /// which emails are registered.
    pub fn request_password_reset(
        &self,
        request: ResetRequest,
        now: DateTime<Utc>,
    ) -> Result<(), AccountError> {
        let email = required("email", &request.email)?;
        let Some(user) = self.store.user_by_email(&email)? else {
            debug!("password reset requested for unknown email");
            return Ok(());
        };

        let names_match = user.profile.first_name.as_deref().unwrap_or_default()
            == request.first_name.trim()
            && user.profile.last_name.as_deref().unwrap_or_default() == request.last_name.trim();
        if !names_match {
            warn!(user_id = %user.id, "password reset details did not match profile");
            return Ok(());
        }

        let token = issue_reset_token();
        let expires_at = now + self.settings.reset_ttl;
        self.store.store_reset_ticket(
            user.id,
            ResetTicket {
                token_digest: reset_token_digest(&token),
                expires_at,
            },
        )?;

        let reset_link = format!(
            "{}/reset-password?token={token}",
            self.settings.public_url.trim_end_matches('/')
        );
        self.notifier.deliver(ResetNotice {
            email: user.email,
            reset_link,
            expires_at,
        })?;
        Ok(())
    }

    pub fn reset_token_is_valid(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AccountError> {
        if token.trim().is_empty() {
            return Ok(false);
        }
        let found = self
            .store
            .user_by_reset_digest(&reset_token_digest(token.trim()), now)?;
        Ok(found.is_some())
    }

    /// Replace the password behind a valid reset token. The token is consumed.
    pub fn reset_password(
        &self,
        submission: ResetSubmission,
        now: DateTime<Utc>,
    ) -> Result<(), AccountError> {
        let password = secret("new_password", &submission.new_password)?;
        if submission.new_password != submission.confirm_password {
            return Err(AccountError::Validation(
                "passwords do not match".to_string(),
            ));
        }

        let user = self
            .store
            .user_by_reset_digest(&reset_token_digest(submission.token.trim()), now)?
            .ok_or(AccountError::InvalidResetToken)?;

        let hash = hash_password(password)?;
        self.store.update_password(user.id, &hash)?;
        info!(user_id = %user.id, "password reset completed");
        Ok(())
    }

    fn create(
        &self,
        email: String,
        password: &str,
        role: Role,
        profile: Profile,
    ) -> Result<Identity, AccountError> {
        let password_hash = hash_password(password)?;
        let user = self
            .store
            .insert_user(NewUser {
                email,
                password_hash,
                role,
                profile,
            })
            .map_err(|err| match err {
                RepositoryError::Conflict => AccountError::EmailTaken,
                other => AccountError::Repository(other),
            })?;
        Ok(user.identity())
    }
}

fn required(field: &str, value: &str) -> Result<String, AccountError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AccountError::Validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Passwords are kept exactly as typed; only an all-blank value is rejected.
fn secret<'a>(field: &str, value: &'a str) -> Result<&'a str, AccountError> {
    if value.trim().is_empty() {
        return Err(AccountError::Validation(format!("{field} is required")));
    }
    Ok(value)
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// The email doubles as the session cookie value, so it must survive a `Cookie` header.
fn session_safe_email(value: &str) -> Result<String, AccountError> {
    let email = required("email", value)?;
    let unsafe_char = email
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, ';' | ',' | '"' | '\\'));
    if unsafe_char || !email.contains('@') {
        return Err(AccountError::Validation(format!(
            "'{email}' is not a usable email address"
        )));
    }
    Ok(email)
}

/// Error raised by account flows.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),
    #[error("an account with this email already exists")]
    EmailTaken,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid or expired reset token")]
    InvalidResetToken,
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<ResetNotice>>,
    }

    impl ResetNotifier for RecordingNotifier {
        fn deliver(&self, notice: ResetNotice) -> Result<(), NotifyError> {
            self.notices
                .lock()
                .expect("notifier mutex poisoned")
                .push(notice);
            Ok(())
        }
    }

    fn service() -> (AccountService<MemoryStore>, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let service = AccountService::new(
            Arc::new(MemoryStore::default()),
            notifier.clone(),
            AccountSettings::default(),
        );
        (service, notifier)
    }

    fn registration(email: &str) -> Registration {
        Registration {
            email: email.to_string(),
            password: "hunter22".to_string(),
            first_name: Some("Dana".to_string()),
            last_name: Some("Broker".to_string()),
            ..Registration::default()
        }
    }

    fn token_from(notice: &ResetNotice) -> String {
        notice
            .reset_link
            .split_once("token=")
            .map(|(_, token)| token.to_string())
            .expect("link carries token")
    }

    #[test]
    fn register_creates_broker_and_rejects_duplicates() {
        let (service, _) = service();
        let identity = service
            .register(registration(" dana@example.com "))
            .expect("registers");
        assert_eq!(identity.role, Role::Broker);
        assert_eq!(identity.email, "dana@example.com");

        match service.register(registration("dana@example.com")) {
            Err(AccountError::EmailTaken) => {}
            other => panic!("expected duplicate email, got {other:?}"),
        }
    }

    #[test]
    fn register_requires_email_and_password() {
        let (service, _) = service();
        let mut missing_password = registration("dana@example.com");
        missing_password.password = "  ".to_string();
        assert!(matches!(
            service.register(missing_password),
            Err(AccountError::Validation(_))
        ));
        assert!(matches!(
            service.register(registration("dana;admin@example.com")),
            Err(AccountError::Validation(_))
        ));
    }

    #[test]
    fn authenticate_accepts_only_matching_password() {
        let (service, _) = service();
        service
            .register(registration("dana@example.com"))
            .expect("registers");

        let identity = service
            .authenticate("dana@example.com", "hunter22")
            .expect("valid login");
        assert_eq!(identity.role, Role::Broker);

        assert!(matches!(
            service.authenticate("dana@example.com", "wrong"),
            Err(AccountError::InvalidCredentials)
        ));
        assert!(matches!(
            service.authenticate("nobody@example.com", "hunter22"),
            Err(AccountError::InvalidCredentials)
        ));
    }

    #[test]
    fn seed_reviewer_only_runs_on_empty_roster() {
        let (service, _) = service();
        let seeded = service
            .seed_reviewer("admin@company.com", "admin123")
            .expect("seed succeeds");
        assert_eq!(seeded.map(|identity| identity.role), Some(Role::Admin));

        let second = service
            .seed_reviewer("other@company.com", "admin123")
            .expect("seed is a no-op");
        assert!(second.is_none());
    }

    #[test]
    fn password_reset_round_trip_consumes_token() {
        let (service, notifier) = service();
        service
            .register(registration("dana@example.com"))
            .expect("registers");
        let now = Utc::now();

        service
            .request_password_reset(
                ResetRequest {
                    email: "dana@example.com".to_string(),
                    first_name: "Dana".to_string(),
                    last_name: "Broker".to_string(),
                },
                now,
            )
            .expect("reset issued");

        let notice = notifier.notices.lock().expect("lock").pop().expect("notice");
        let token = token_from(&notice);
        assert!(notice.reset_link.starts_with("http://localhost:3000/reset-password?"));
        assert!(service.reset_token_is_valid(&token, now).expect("lookup"));

        service
            .reset_password(
                ResetSubmission {
                    token: token.clone(),
                    new_password: "new-secret".to_string(),
                    confirm_password: "new-secret".to_string(),
                },
                now,
            )
            .expect("reset applies");

        assert!(service.authenticate("dana@example.com", "new-secret").is_ok());
        assert!(!service.reset_token_is_valid(&token, now).expect("lookup"));
    }

    #[test]
    fn reset_request_with_mismatched_names_sends_nothing() {
        let (service, notifier) = service();
        service
            .register(registration("dana@example.com"))
            .expect("registers");

        service
            .request_password_reset(
                ResetRequest {
                    email: "dana@example.com".to_string(),
                    first_name: "Someone".to_string(),
                    last_name: "Else".to_string(),
                },
                Utc::now(),
            )
            .expect("indistinguishable success");
        service
            .request_password_reset(
                ResetRequest {
                    email: "ghost@example.com".to_string(),
                    ..ResetRequest::default()
                },
                Utc::now(),
            )
            .expect("indistinguishable success");

        assert!(notifier.notices.lock().expect("lock").is_empty());
    }

    #[test]
    fn expired_or_mismatched_reset_is_rejected() {
        let (service, notifier) = service();
        service
            .register(registration("dana@example.com"))
            .expect("registers");
        let issued_at = Utc::now();
        service
            .request_password_reset(
                ResetRequest {
                    email: "dana@example.com".to_string(),
                    first_name: "Dana".to_string(),
                    last_name: "Broker".to_string(),
                },
                issued_at,
            )
            .expect("reset issued");
        let token = token_from(&notifier.notices.lock().expect("lock")[0]);

        let mismatch = service.reset_password(
            ResetSubmission {
                token: token.clone(),
                new_password: "a".to_string(),
                confirm_password: "b".to_string(),
            },
            issued_at,
        );
        assert!(matches!(mismatch, Err(AccountError::Validation(_))));

        let expired = service.reset_password(
            ResetSubmission {
                token,
                new_password: "fresh".to_string(),
                confirm_password: "fresh".to_string(),
            },
            issued_at + Duration::hours(2),
        );
        assert!(matches!(expired, Err(AccountError::InvalidResetToken)));
    }

    #[test]
    fn padded_password_is_kept_exactly_as_typed() {
        let (service, _) = service();
        service
            .register(Registration {
                password: " secret pass ".to_string(),
                ..registration("padded@example.com")
            })
            .expect("registers");

        service
            .authenticate("padded@example.com", " secret pass ")
            .expect("exact password logs in");
        assert!(matches!(
            service.authenticate("padded@example.com", "secret pass"),
            Err(AccountError::InvalidCredentials)
        ));
    }

    #[test]
    fn blank_password_is_rejected() {
        let (service, _) = service();
        let blank = service.register(Registration {
            password: "   ".to_string(),
            ..registration("blank@example.com")
        });
        assert!(matches!(blank, Err(AccountError::Validation(_))));
    }

    #[test]
    fn reset_keeps_padded_password_verbatim() {
        let (service, notifier) = service();
        service
            .register(registration("erin@example.com"))
            .expect("registers");
        let now = Utc::now();
        service
            .request_password_reset(
                ResetRequest {
                    email: "erin@example.com".to_string(),
                    first_name: "Dana".to_string(),
                    last_name: "Broker".to_string(),
                },
                now,
            )
            .expect("reset issued");
        let token = token_from(&notifier.notices.lock().expect("lock")[0]);

        service
            .reset_password(
                ResetSubmission {
                    token,
                    new_password: "  new pass".to_string(),
                    confirm_password: "  new pass".to_string(),
                },
                now,
            )
            .expect("password replaced");
        service
            .authenticate("erin@example.com", "  new pass")
            .expect("padded password logs in");
        assert!(service.authenticate("erin@example.com", "new pass").is_err());
    }
}

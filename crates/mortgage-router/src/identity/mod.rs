//! Accounts, credentials, and per-request session resolution.

pub mod accounts;
pub mod credentials;
pub mod domain;
pub mod router;
pub mod session;
pub mod store;

pub use accounts::{
    AccountError, AccountService, AccountSettings, LogResetNotifier, NotifyError, Registration,
    ResetNotice, ResetNotifier, ResetRequest, ResetSubmission,
};
pub use domain::{Identity, NewUser, Profile, ResetTicket, Role, User, UserId};
pub use router::account_router;
pub use session::{
    AnyRole, Authenticated, BrokerOnly, BrokerSession, ReviewerOnly, ReviewerSession, RoleGate,
    SessionGuard, SessionRejection,
};
pub use store::IdentityStore;

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::accounts::{AccountError, AccountService, Registration, ResetRequest, ResetSubmission};
use super::session::{clear_session_cookie, ANONYMOUS_ENTRY};
use super::store::IdentityStore;
use crate::store::RepositoryError;

#[derive(Debug, Deserialize)]
pub(crate) struct LoginForm {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Anonymous account endpoints: login, logout, signup, and password reset.
pub fn account_router<S>(service: Arc<AccountService<S>>) -> Router
where
    S: IdentityStore + 'static,
{
    Router::new()
        .route("/login", get(login_form).post(login_handler::<S>))
        .route("/logout", post(logout_handler))
        .route("/signup", get(signup_form))
        .route("/register", post(register_handler::<S>))
        .route(
            "/forgot-password",
            get(forgot_password_form).post(forgot_password_handler::<S>),
        )
        .route(
            "/reset-password",
            get(reset_password_form::<S>).post(reset_password_handler::<S>),
        )
        .with_state(service)
}

pub(crate) async fn login_form() -> Json<serde_json::Value> {
    Json(json!({
        "form": "login",
        "action": "/login",
        "fields": ["email", "password"],
    }))
}

pub(crate) async fn login_handler<S>(
    State(service): State<Arc<AccountService<S>>>,
    Form(form): Form<LoginForm>,
) -> Response
where
    S: IdentityStore + 'static,
{
    let verified = offload(&service, move |service| {
        service.authenticate(&form.email, &form.password)
    })
    .await;
    match verified {
        Ok(identity) => {
            let cookie = service.session_cookie(&identity, Utc::now());
            (
                [(header::SET_COOKIE, cookie)],
                Redirect::to(identity.role.landing_path()),
            )
                .into_response()
        }
        Err(err) => account_error_response(err),
    }
}

pub(crate) async fn logout_handler() -> Response {
    (
        [(header::SET_COOKIE, clear_session_cookie())],
        Redirect::to(ANONYMOUS_ENTRY),
    )
        .into_response()
}

pub(crate) async fn signup_form() -> Json<serde_json::Value> {
    Json(json!({
        "form": "signup",
        "action": "/register",
        "fields": ["email", "password", "first_name", "last_name", "phone", "postal_code"],
    }))
}

pub(crate) async fn register_handler<S>(
    State(service): State<Arc<AccountService<S>>>,
    Form(registration): Form<Registration>,
) -> Response
where
    S: IdentityStore + 'static,
{
    match offload(&service, move |service| service.register(registration)).await {
        Ok(_) => Redirect::to("/login?registered=true").into_response(),
        Err(err) => account_error_response(err),
    }
}

pub(crate) async fn forgot_password_form() -> Json<serde_json::Value> {
    Json(json!({
        "form": "forgot_password",
        "action": "/forgot-password",
        "fields": ["email", "first_name", "last_name"],
    }))
}

pub(crate) async fn forgot_password_handler<S>(
    State(service): State<Arc<AccountService<S>>>,
    Form(request): Form<ResetRequest>,
) -> Response
where
    S: IdentityStore + 'static,
{
    let requested = offload(&service, move |service| {
        service.request_password_reset(request, Utc::now())
    })
    .await;
    match requested {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "message": "if the details match an account, a reset link has been sent",
            })),
        )
            .into_response(),
        Err(err) => account_error_response(err),
    }
}

pub(crate) async fn reset_password_form<S>(
    State(service): State<Arc<AccountService<S>>>,
    Query(query): Query<TokenQuery>,
) -> Response
where
    S: IdentityStore + 'static,
{
    let Some(token) = query.token.filter(|token| !token.trim().is_empty()) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let checked = offload(&service, move |service| {
        service.reset_token_is_valid(&token, Utc::now())
    })
    .await;
    match checked {
        Ok(valid) => Json(json!({
            "form": "reset_password",
            "action": "/reset-password",
            "fields": ["token", "new_password", "confirm_password"],
            "token_valid": valid,
        }))
        .into_response(),
        Err(err) => account_error_response(err),
    }
}

pub(crate) async fn reset_password_handler<S>(
    State(service): State<Arc<AccountService<S>>>,
    Form(submission): Form<ResetSubmission>,
) -> Response
where
    S: IdentityStore + 'static,
{
    let reset = offload(&service, move |service| {
        service.reset_password(submission, Utc::now())
    })
    .await;
    match reset {
        Ok(()) => Json(json!({ "message": "password updated" })).into_response(),
        Err(err) => account_error_response(err),
    }
}

/// Password hashing and store access block, so account work runs on the blocking pool.
async fn offload<S, T, F>(service: &Arc<AccountService<S>>, work: F) -> Result<T, AccountError>
where
    S: IdentityStore + 'static,
    T: Send + 'static,
    F: FnOnce(&AccountService<S>) -> Result<T, AccountError> + Send + 'static,
{
    let service = Arc::clone(service);
    tokio::task::spawn_blocking(move || work(&service))
        .await
        .map_err(|err| {
            AccountError::Repository(RepositoryError::Unavailable(format!(
                "account task failed: {err}"
            )))
        })?
}

fn account_error_response(err: AccountError) -> Response {
    let status = match &err {
        AccountError::Validation(_) | AccountError::InvalidResetToken => StatusCode::BAD_REQUEST,
        AccountError::EmailTaken => StatusCode::CONFLICT,
        AccountError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        AccountError::Credential(_) | AccountError::Notify(_) | AccountError::Repository(_) => {
            tracing::error!(error = %err, "account operation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

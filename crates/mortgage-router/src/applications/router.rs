use std::sync::Arc;

use axum::{
    extract::{FromRef, Multipart, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::assignment::AssignmentLedger;
use super::domain::{ApplicationId, DocumentCategory};
use super::registry::DocumentUpload;
use super::repository::ApplicationRepository;
use super::service::{ApplicationPortal, PortalError};
use super::storage::DocumentStorage;
use crate::identity::{BrokerSession, ReviewerSession, SessionGuard};
use crate::store::RepositoryError;

/// Shared state for the broker and reviewer routes.
pub struct PortalState<S, B> {
    pub portal: Arc<ApplicationPortal<S, B>>,
    pub guard: SessionGuard,
}

impl<S, B> Clone for PortalState<S, B> {
    fn clone(&self) -> Self {
        Self {
            portal: self.portal.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<S, B> FromRef<PortalState<S, B>> for SessionGuard {
    fn from_ref(state: &PortalState<S, B>) -> Self {
        state.guard.clone()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartForm {
    #[serde(default)]
    application_type: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IdQuery {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BrokerQuery {
    #[serde(default)]
    submitted: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DocumentQuery {
    #[serde(default)]
    path: Option<String>,
}

const APPLICATION_ID_FIELD: &str = "application_id";

/// Router exposing the broker intake flow and the reviewer dashboard.
pub fn application_router<S, B>(portal: Arc<ApplicationPortal<S, B>>, guard: SessionGuard) -> Router
where
    S: ApplicationRepository + AssignmentLedger + 'static,
    B: DocumentStorage + 'static,
{
    Router::new()
        .route("/broker", get(broker_handler::<S, B>))
        .route("/application", post(start_handler::<S, B>))
        .route(
            "/application-form",
            get(form_handler::<S, B>).post(submit_handler::<S, B>),
        )
        .route("/admin-dashboard", get(dashboard_handler::<S, B>))
        .route("/view-application", get(view_handler::<S, B>))
        .route("/serve-document", get(serve_handler::<S, B>))
        .with_state(PortalState { portal, guard })
}

pub(crate) async fn broker_handler<S, B>(
    State(state): State<PortalState<S, B>>,
    session: BrokerSession,
    Query(query): Query<BrokerQuery>,
) -> Response
where
    S: ApplicationRepository + AssignmentLedger + 'static,
    B: DocumentStorage + 'static,
{
    let identity = session.into_identity();
    let broker = identity.email.clone();
    match offload(&state.portal, move |portal| portal.broker_overview(&identity)).await {
        Ok(applications) => Json(json!({
            "broker": broker,
            "submitted": query.submitted.unwrap_or(false),
            "applications": applications,
        }))
        .into_response(),
        Err(err) => portal_error_response(err),
    }
}

pub(crate) async fn start_handler<S, B>(
    State(state): State<PortalState<S, B>>,
    session: BrokerSession,
    Form(form): Form<StartForm>,
) -> Response
where
    S: ApplicationRepository + AssignmentLedger + 'static,
    B: DocumentStorage + 'static,
{
    let identity = session.into_identity();
    let started = offload(&state.portal, move |portal| {
        portal.start_application(&identity, &form.application_type)
    })
    .await;
    match started {
        Ok(application) => {
            Redirect::to(&format!("/application-form?id={}", application.id)).into_response()
        }
        Err(err) => portal_error_response(err),
    }
}

pub(crate) async fn form_handler<S, B>(
    State(state): State<PortalState<S, B>>,
    session: BrokerSession,
    Query(query): Query<IdQuery>,
) -> Response
where
    S: ApplicationRepository + AssignmentLedger + 'static,
    B: DocumentStorage + 'static,
{
    let id = match parse_application_id(query.id.as_deref()) {
        Ok(id) => id,
        Err(err) => return portal_error_response(err),
    };
    let identity = session.into_identity();
    match offload(&state.portal, move |portal| portal.application_form(&identity, id)).await {
        Ok(dossier) => {
            let categories: Vec<&str> = DocumentCategory::ALL
                .iter()
                .map(|category| category.field_name())
                .collect();
            Json(json!({
                "form": "application",
                "action": "/application-form",
                "application_id": id,
                "categories": categories,
                "application": dossier,
            }))
            .into_response()
        }
        Err(err) => portal_error_response(err),
    }
}

pub(crate) async fn submit_handler<S, B>(
    State(state): State<PortalState<S, B>>,
    session: BrokerSession,
    multipart: Multipart,
) -> Response
where
    S: ApplicationRepository + AssignmentLedger + 'static,
    B: DocumentStorage + 'static,
{
    let (raw_id, uploads) = match read_upload_form(multipart).await {
        Ok(parts) => parts,
        Err(err) => return portal_error_response(err),
    };
    let id = match parse_application_id(raw_id.as_deref()) {
        Ok(id) => id,
        Err(err) => return portal_error_response(err),
    };

    let identity = session.into_identity();
    match offload(&state.portal, move |portal| portal.submit(&identity, id, uploads)).await {
        Ok(_) => Redirect::to("/broker?submitted=true").into_response(),
        Err(err) => portal_error_response(err),
    }
}

pub(crate) async fn dashboard_handler<S, B>(
    State(state): State<PortalState<S, B>>,
    session: ReviewerSession,
) -> Response
where
    S: ApplicationRepository + AssignmentLedger + 'static,
    B: DocumentStorage + 'static,
{
    let identity = session.into_identity();
    let reviewer = identity.email.clone();
    match offload(&state.portal, move |portal| portal.dashboard(&identity)).await {
        Ok(applications) => Json(json!({
            "reviewer": reviewer,
            "applications": applications,
        }))
        .into_response(),
        Err(err) => portal_error_response(err),
    }
}

pub(crate) async fn view_handler<S, B>(
    State(state): State<PortalState<S, B>>,
    session: ReviewerSession,
    Query(query): Query<IdQuery>,
) -> Response
where
    S: ApplicationRepository + AssignmentLedger + 'static,
    B: DocumentStorage + 'static,
{
    let id = match parse_application_id(query.id.as_deref()) {
        Ok(id) => id,
        Err(err) => return portal_error_response(err),
    };
    let identity = session.into_identity();
    match offload(&state.portal, move |portal| portal.view(&identity, id)).await {
        Ok(dossier) => Json(dossier).into_response(),
        Err(err) => portal_error_response(err),
    }
}

pub(crate) async fn serve_handler<S, B>(
    State(state): State<PortalState<S, B>>,
    session: ReviewerSession,
    Query(query): Query<DocumentQuery>,
) -> Response
where
    S: ApplicationRepository + AssignmentLedger + 'static,
    B: DocumentStorage + 'static,
{
    let Some(path) = query.path else {
        return portal_error_response(PortalError::DocumentNotFound);
    };
    let identity = session.into_identity();
    match offload(&state.portal, move |portal| portal.serve(&identity, &path)).await {
        Ok(document) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, document.content_type),
                (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
            ],
            document.bytes,
        )
            .into_response(),
        Err(err) => portal_error_response(err),
    }
}

/// Buffer the upload form. Empty file parts are skipped and unknown fields ignored.
async fn read_upload_form(
    mut multipart: Multipart,
) -> Result<(Option<String>, Vec<DocumentUpload>), PortalError> {
    let malformed = |err: axum::extract::multipart::MultipartError| {
        PortalError::Validation(format!("malformed upload: {err}"))
    };

    let mut application_id = None;
    let mut uploads = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == APPLICATION_ID_FIELD {
            application_id = Some(field.text().await.map_err(malformed)?);
            continue;
        }
        let Some(category) = DocumentCategory::from_field_name(&name) else {
            continue;
        };
        let original_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(malformed)?;
        if bytes.is_empty() {
            continue;
        }
        uploads.push(DocumentUpload {
            category,
            original_name,
            bytes: bytes.to_vec(),
        });
    }
    Ok((application_id, uploads))
}

/// Repository locks and document file I/O block, so portal work runs on the blocking pool.
async fn offload<S, B, T, F>(
    portal: &Arc<ApplicationPortal<S, B>>,
    work: F,
) -> Result<T, PortalError>
where
    S: ApplicationRepository + AssignmentLedger + 'static,
    B: DocumentStorage + 'static,
    T: Send + 'static,
    F: FnOnce(&ApplicationPortal<S, B>) -> Result<T, PortalError> + Send + 'static,
{
    let portal = Arc::clone(portal);
    tokio::task::spawn_blocking(move || work(&portal))
        .await
        .map_err(|err| {
            PortalError::Repository(RepositoryError::Unavailable(format!(
                "portal task failed: {err}"
            )))
        })?
}

fn parse_application_id(raw: Option<&str>) -> Result<ApplicationId, PortalError> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<i64>().ok())
        .map(ApplicationId)
        .ok_or_else(|| PortalError::Validation("a numeric application id is required".to_string()))
}

fn portal_error_response(err: PortalError) -> Response {
    match err {
        PortalError::Validation(message) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
        }
        PortalError::NotFound(_) | PortalError::DocumentNotFound => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": err.to_string() }))).into_response()
        }
        PortalError::Forbidden => {
            (StatusCode::FORBIDDEN, Json(json!({ "error": "forbidden" }))).into_response()
        }
        PortalError::AlreadyAssigned { .. } => {
            (StatusCode::CONFLICT, Json(json!({ "error": err.to_string() }))).into_response()
        }
        PortalError::NoReviewersAvailable => {
            let payload = json!({
                "error": err.to_string(),
                "retryable": true,
            });
            (StatusCode::SERVICE_UNAVAILABLE, Json(payload)).into_response()
        }
        PortalError::Storage(_) | PortalError::Repository(_) => {
            tracing::error!(error = %err, "application request failed");
            let payload = json!({
                "error": err.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
        }
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use serde_json::Value;

use crate::applications::storage::{DocumentStorage, StorageError};
use crate::applications::{
    application_router, ApplicationPortal, DocumentCategory, DocumentUpload, StorageKey,
};
use crate::identity::{Identity, IdentityStore, NewUser, Profile, Role, SessionGuard};
use crate::store::MemoryStore;

pub(super) const BOUNDARY: &str = "mortgage-router-boundary";

/// Blob storage kept in a map so tests can inspect what was written.
#[derive(Default)]
pub(super) struct MemoryBlobs {
    blobs: Mutex<HashMap<StorageKey, Vec<u8>>>,
}

impl MemoryBlobs {
    pub(super) fn len(&self) -> usize {
        self.blobs.lock().expect("blob mutex poisoned").len()
    }

    pub(super) fn forget(&self, key: &StorageKey) {
        self.blobs.lock().expect("blob mutex poisoned").remove(key);
    }
}

impl DocumentStorage for MemoryBlobs {
    fn put(&self, key: &StorageKey, bytes: &[u8]) -> Result<(), StorageError> {
        let mut blobs = self.blobs.lock().expect("blob mutex poisoned");
        if blobs.contains_key(key) {
            return Err(StorageError::AlreadyExists(key.clone()));
        }
        blobs.insert(key.clone(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &StorageKey) -> Result<Vec<u8>, StorageError> {
        self.blobs
            .lock()
            .expect("blob mutex poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::Missing(key.clone()))
    }

    fn remove(&self, key: &StorageKey) -> Result<(), StorageError> {
        self.blobs.lock().expect("blob mutex poisoned").remove(key);
        Ok(())
    }
}

/// Blob storage that stalls on every write, widening the window between two submissions.
pub(super) struct SlowBlobs {
    pub(super) inner: MemoryBlobs,
    pub(super) delay: Duration,
}

impl DocumentStorage for SlowBlobs {
    fn put(&self, key: &StorageKey, bytes: &[u8]) -> Result<(), StorageError> {
        std::thread::sleep(self.delay);
        self.inner.put(key, bytes)
    }

    fn get(&self, key: &StorageKey) -> Result<Vec<u8>, StorageError> {
        self.inner.get(key)
    }

    fn remove(&self, key: &StorageKey) -> Result<(), StorageError> {
        self.inner.remove(key)
    }
}

/// Storage whose disk is always full.
pub(super) struct FullDisk;

impl DocumentStorage for FullDisk {
    fn put(&self, key: &StorageKey, _bytes: &[u8]) -> Result<(), StorageError> {
        Err(StorageError::Io {
            key: key.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"),
        })
    }

    fn get(&self, key: &StorageKey) -> Result<Vec<u8>, StorageError> {
        Err(StorageError::Missing(key.clone()))
    }

    fn remove(&self, _key: &StorageKey) -> Result<(), StorageError> {
        Ok(())
    }
}

pub(super) struct Fixture {
    pub(super) store: Arc<MemoryStore>,
    pub(super) blobs: Arc<MemoryBlobs>,
    pub(super) portal: Arc<ApplicationPortal<MemoryStore, MemoryBlobs>>,
}

impl Fixture {
    pub(super) fn new() -> Self {
        let store = Arc::new(MemoryStore::default());
        let blobs = Arc::new(MemoryBlobs::default());
        let portal = Arc::new(ApplicationPortal::new(store.clone(), blobs.clone()));
        Self {
            store,
            blobs,
            portal,
        }
    }

    pub(super) fn broker(&self, email: &str) -> Identity {
        add_user(self.store.as_ref(), email, Role::Broker)
    }

    pub(super) fn reviewer(&self, email: &str) -> Identity {
        add_user(self.store.as_ref(), email, Role::Admin)
    }

    pub(super) fn router(&self) -> axum::Router {
        application_router(self.portal.clone(), SessionGuard::new(self.store.clone()))
    }
}

pub(super) fn add_user(store: &dyn IdentityStore, email: &str, role: Role) -> Identity {
    store
        .insert_user(NewUser {
            email: email.to_string(),
            password_hash: "unused".to_string(),
            role,
            profile: Profile::default(),
        })
        .expect("user inserted")
        .identity()
}

pub(super) fn upload(category: DocumentCategory, name: &str, bytes: &[u8]) -> DocumentUpload {
    DocumentUpload {
        category,
        original_name: Some(name.to_string()),
        bytes: bytes.to_vec(),
    }
}

pub(super) fn get(uri: &str, session: Option<&Identity>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(identity) = session {
        builder = builder.header(header::COOKIE, format!("session_email={}", identity.email));
    }
    builder.body(Body::empty()).expect("request builds")
}

pub(super) fn form_post(uri: &str, session: &Identity, body: &str) -> Request<Body> {
    Request::post(uri)
        .header(header::COOKIE, format!("session_email={}", session.email))
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

/// `multipart/form-data` submission of the application form.
pub(super) fn upload_post(
    session: &Identity,
    application_id: &str,
    files: &[(&str, &str, &str)],
) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"application_id\"\r\n\r\n{application_id}\r\n"
        )
        .as_bytes(),
    );
    for (field, filename, content) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/application-form")
        .header(header::COOKIE, format!("session_email={}", session.email))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request builds")
}

pub(super) fn location(response: &Response) -> Option<&str> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
}

pub(super) async fn read_body(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body")
        .to_vec()
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = read_body(response).await;
    serde_json::from_slice(&body).expect("json payload")
}

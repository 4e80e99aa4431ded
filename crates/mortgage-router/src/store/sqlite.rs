use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::RepositoryError;
use crate::applications::{
    Application, ApplicationId, ApplicationKind, ApplicationRepository, AssignmentError,
    AssignmentLedger, Document, DocumentCategory, DocumentId, NewDocument, ReviewerRoster,
    StorageKey,
};
use crate::identity::{IdentityStore, NewUser, Profile, ResetTicket, Role, User, UserId};

const CURSOR_KEY: &str = "last_assigned_admin_id";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('broker', 'admin')),
    first_name TEXT,
    last_name TEXT,
    phone TEXT,
    postal_code TEXT,
    reset_token_digest TEXT,
    reset_expires_at TEXT,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS applications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    broker_id INTEGER NOT NULL REFERENCES users(id),
    application_type TEXT NOT NULL,
    assigned_admin_id INTEGER REFERENCES users(id),
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS applications_assigned_admin ON applications(assigned_admin_id);
CREATE INDEX IF NOT EXISTS applications_broker ON applications(broker_id);
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    application_id INTEGER NOT NULL REFERENCES applications(id),
    category TEXT NOT NULL,
    storage_key TEXT NOT NULL UNIQUE,
    uploaded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS documents_application ON documents(application_id);
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const USER_COLUMNS: &str = "id, email, password_hash, role, first_name, last_name, phone, \
                            postal_code, created_at";
const APPLICATION_COLUMNS: &str = "id, broker_id, application_type, assigned_admin_id, created_at";
const DOCUMENT_COLUMNS: &str = "id, application_id, category, storage_key, uploaded_at";

/// SQLite-backed store. One connection behind a mutex; assignment runs in a
/// `BEGIN IMMEDIATE` transaction so the cursor read and both writes commit together.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Private database that lives as long as the store.
    pub fn in_memory() -> Result<Self, RepositoryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, RepositoryError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.conn.lock().map_err(|_| {
            RepositoryError::Unavailable("sqlite connection lock poisoned".to_string())
        })
    }

    fn read_cursor(conn: &Connection) -> rusqlite::Result<Option<UserId>> {
        let raw = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![CURSOR_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        // An unparseable value is treated like an unset cursor.
        Ok(raw.and_then(|value| value.trim().parse::<i64>().ok()).map(UserId))
    }

    fn write_cursor(conn: &Connection, reviewer: UserId) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO settings(key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![CURSOR_KEY, reviewer.0.to_string()],
        )?;
        Ok(())
    }

    fn reviewer_ids_with(conn: &Connection) -> rusqlite::Result<Vec<UserId>> {
        let mut stmt = conn.prepare("SELECT id FROM users WHERE role = ?1 ORDER BY id ASC")?;
        let ids = stmt
            .query_map(params![Role::Admin.label()], |row| row.get::<_, i64>(0))?
            .map(|id| id.map(UserId))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn application_with(
        conn: &Connection,
        id: ApplicationId,
    ) -> rusqlite::Result<Option<Application>> {
        conn.query_row(
            &format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1"),
            params![id.0],
            application_from_row,
        )
        .optional()
    }

    fn insert_document_with(
        conn: &Connection,
        document: NewDocument,
    ) -> rusqlite::Result<Document> {
        conn.execute(
            "INSERT INTO documents (application_id, category, storage_key, uploaded_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                document.application_id.0,
                document.category.field_name(),
                document.storage_key.as_str(),
                stored_timestamp(document.uploaded_at),
            ],
        )?;
        Ok(Document {
            id: DocumentId(conn.last_insert_rowid()),
            application_id: document.application_id,
            category: document.category,
            storage_key: document.storage_key,
            uploaded_at: document.uploaded_at,
        })
    }

    fn applications_where(
        &self,
        column: &str,
        value: UserId,
    ) -> Result<Vec<Application>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE {column} = ?1 \
             ORDER BY created_at DESC, id DESC"
        ))?;
        let applications = stmt
            .query_map(params![value.0], application_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(applications)
    }

    fn user_where(
        &self,
        clause: &str,
        value: &dyn rusqlite::ToSql,
    ) -> Result<Option<User>, RepositoryError> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE {clause}"),
                params![value],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                RepositoryError::Conflict
            }
            rusqlite::Error::QueryReturnedNoRows => RepositoryError::NotFound,
            other => RepositoryError::Unavailable(other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognised {column} value `{value}`")]
struct UnknownLabel {
    column: &'static str,
    value: String,
}

fn conversion_error(
    index: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn labelled<T>(
    row: &Row<'_>,
    index: usize,
    column: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let value: String = row.get(index)?;
    parse(&value).ok_or_else(|| conversion_error(index, UnknownLabel { column, value }))
}

fn timestamp(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| conversion_error(index, err))
}

fn stored_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get(0)?),
        email: row.get(1)?,
        password_hash: row.get(2)?,
        role: labelled(row, 3, "role", Role::parse)?,
        profile: Profile {
            first_name: row.get(4)?,
            last_name: row.get(5)?,
            phone: row.get(6)?,
            postal_code: row.get(7)?,
        },
        created_at: timestamp(row, 8)?,
    })
}

fn application_from_row(row: &Row<'_>) -> rusqlite::Result<Application> {
    Ok(Application {
        id: ApplicationId(row.get(0)?),
        broker_id: UserId(row.get(1)?),
        kind: labelled(row, 2, "application_type", ApplicationKind::parse)?,
        assigned_reviewer: row.get::<_, Option<i64>>(3)?.map(UserId),
        created_at: timestamp(row, 4)?,
    })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: DocumentId(row.get(0)?),
        application_id: ApplicationId(row.get(1)?),
        category: labelled(row, 2, "category", DocumentCategory::from_field_name)?,
        storage_key: StorageKey::from_stored(row.get(3)?),
        uploaded_at: timestamp(row, 4)?,
    })
}

impl IdentityStore for SqliteStore {
    fn insert_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        let conn = self.lock()?;
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO users (email, password_hash, role, first_name, last_name, phone, \
             postal_code, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user.email,
                user.password_hash,
                user.role.label(),
                user.profile.first_name,
                user.profile.last_name,
                user.profile.phone,
                user.profile.postal_code,
                stored_timestamp(created_at),
            ],
        )?;
        Ok(User {
            id: UserId(conn.last_insert_rowid()),
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            profile: user.profile,
            created_at,
        })
    }

    fn user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        self.user_where("email = ?1", &email)
    }

    fn user_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        self.user_where("id = ?1", &id.0)
    }

    fn reviewer_ids(&self) -> Result<Vec<UserId>, RepositoryError> {
        let conn = self.lock()?;
        Ok(Self::reviewer_ids_with(&conn)?)
    }

    fn store_reset_ticket(&self, id: UserId, ticket: ResetTicket) -> Result<(), RepositoryError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE users SET reset_token_digest = ?1, reset_expires_at = ?2 WHERE id = ?3",
            params![
                ticket.token_digest,
                stored_timestamp(ticket.expires_at),
                id.0
            ],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    fn user_by_reset_digest(
        &self,
        token_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, RepositoryError> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users \
                     WHERE reset_token_digest = ?1 AND reset_expires_at > ?2"
                ),
                params![token_digest, stored_timestamp(now)],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn update_password(&self, id: UserId, password_hash: &str) -> Result<(), RepositoryError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE users SET password_hash = ?1, reset_token_digest = NULL, \
             reset_expires_at = NULL WHERE id = ?2",
            params![password_hash, id.0],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

impl ApplicationRepository for SqliteStore {
    fn insert_application(
        &self,
        broker: UserId,
        kind: ApplicationKind,
        created_at: DateTime<Utc>,
    ) -> Result<Application, RepositoryError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO applications (broker_id, application_type, created_at) \
             VALUES (?1, ?2, ?3)",
            params![broker.0, kind.label(), stored_timestamp(created_at)],
        )?;
        Ok(Application {
            id: ApplicationId(conn.last_insert_rowid()),
            broker_id: broker,
            kind,
            assigned_reviewer: None,
            created_at,
        })
    }

    fn application(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError> {
        let conn = self.lock()?;
        Ok(Self::application_with(&conn, id)?)
    }

    fn assigned_to(&self, reviewer: UserId) -> Result<Vec<Application>, RepositoryError> {
        self.applications_where("assigned_admin_id", reviewer)
    }

    fn originated_by(&self, broker: UserId) -> Result<Vec<Application>, RepositoryError> {
        self.applications_where("broker_id", broker)
    }

    fn insert_document(&self, document: NewDocument) -> Result<Document, RepositoryError> {
        let conn = self.lock()?;
        if Self::application_with(&conn, document.application_id)?.is_none() {
            return Err(RepositoryError::NotFound);
        }
        Ok(Self::insert_document_with(&conn, document)?)
    }

    fn documents_for(&self, application: ApplicationId) -> Result<Vec<Document>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE application_id = ?1 ORDER BY id ASC"
        ))?;
        let documents = stmt
            .query_map(params![application.0], document_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(documents)
    }

    fn document_by_key(&self, key: &StorageKey) -> Result<Option<Document>, RepositoryError> {
        let conn = self.lock()?;
        let document = conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE storage_key = ?1"),
                params![key.as_str()],
                document_from_row,
            )
            .optional()?;
        Ok(document)
    }
}

impl AssignmentLedger for SqliteStore {
    fn commit_submission(
        &self,
        application: ApplicationId,
        documents: Vec<NewDocument>,
        select: &dyn Fn(&ReviewerRoster) -> Option<UserId>,
    ) -> Result<(UserId, Vec<Document>), AssignmentError> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE TRANSACTION;")
            .map_err(RepositoryError::from)?;

        let outcome = (|| -> Result<(UserId, Vec<Document>), AssignmentError> {
            let current = Self::application_with(&conn, application)
                .map_err(RepositoryError::from)?
                .ok_or(AssignmentError::ApplicationNotFound(application))?;
            if let Some(reviewer) = current.assigned_reviewer {
                return Err(AssignmentError::AlreadyAssigned {
                    application,
                    reviewer,
                });
            }

            let mut stored = Vec::with_capacity(documents.len());
            for document in documents {
                if document.application_id != application {
                    return Err(RepositoryError::NotFound.into());
                }
                stored.push(
                    Self::insert_document_with(&conn, document).map_err(RepositoryError::from)?,
                );
            }

            let roster = ReviewerRoster {
                reviewers: Self::reviewer_ids_with(&conn).map_err(RepositoryError::from)?,
                cursor: Self::read_cursor(&conn).map_err(RepositoryError::from)?,
            };
            let reviewer = select(&roster).ok_or(AssignmentError::NoReviewersAvailable)?;

            conn.execute(
                "UPDATE applications SET assigned_admin_id = ?1 \
                 WHERE id = ?2 AND assigned_admin_id IS NULL",
                params![reviewer.0, application.0],
            )
            .map_err(RepositoryError::from)?;
            Self::write_cursor(&conn, reviewer).map_err(RepositoryError::from)?;
            Ok((reviewer, stored))
        })();

        match outcome {
            Ok(committed) => {
                if let Err(err) = conn.execute_batch("COMMIT;") {
                    let _ = conn.execute_batch("ROLLBACK;");
                    return Err(RepositoryError::from(err).into());
                }
                Ok(committed)
            }
            Err(err) => {
                let _ = conn.execute_batch("ROLLBACK;");
                Err(err)
            }
        }
    }

    fn cursor(&self) -> Result<Option<UserId>, RepositoryError> {
        let conn = self.lock()?;
        Ok(Self::read_cursor(&conn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applications::next_reviewer;

    fn user(email: &str, role: Role) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            role,
            profile: Profile {
                first_name: Some("Dana".to_string()),
                ..Profile::default()
            },
        }
    }

    fn round_robin(roster: &ReviewerRoster) -> Option<UserId> {
        next_reviewer(&roster.reviewers, roster.cursor)
    }

    #[test]
    fn users_round_trip_with_profile() {
        let store = SqliteStore::in_memory().expect("store");
        let inserted = store
            .insert_user(user("dana@example.com", Role::Broker))
            .expect("insert");
        let fetched = store
            .user_by_email("dana@example.com")
            .expect("lookup")
            .expect("present");
        assert_eq!(fetched.id, inserted.id);
        assert_eq!(fetched.role, Role::Broker);
        assert_eq!(fetched.profile.first_name.as_deref(), Some("Dana"));
        assert!(matches!(
            store.insert_user(user("dana@example.com", Role::Admin)),
            Err(RepositoryError::Conflict)
        ));
    }

    #[test]
    fn cursor_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.db");

        let (first_reviewer, application) = {
            let store = SqliteStore::open(&path).expect("open");
            let broker = store
                .insert_user(user("b@example.com", Role::Broker))
                .expect("broker");
            let reviewer = store
                .insert_user(user("r@example.com", Role::Admin))
                .expect("reviewer");
            store
                .insert_user(user("r2@example.com", Role::Admin))
                .expect("reviewer");
            let application = store
                .insert_application(broker.id, ApplicationKind::SomeoneElse, Utc::now())
                .expect("application");
            let assigned = store
                .commit_assignment(application.id, &round_robin)
                .expect("assigned");
            assert_eq!(assigned, reviewer.id);
            (reviewer.id, application.id)
        };

        let reopened = SqliteStore::open(&path).expect("reopen");
        assert_eq!(reopened.cursor().expect("cursor"), Some(first_reviewer));
        let stored = reopened
            .application(application)
            .expect("fetch")
            .expect("present");
        assert_eq!(stored.assigned_reviewer, Some(first_reviewer));
        assert_eq!(stored.kind, ApplicationKind::SomeoneElse);
    }

    #[test]
    fn failed_assignment_rolls_back() {
        let store = SqliteStore::in_memory().expect("store");
        let broker = store
            .insert_user(user("b@example.com", Role::Broker))
            .expect("broker");
        let application = store
            .insert_application(broker.id, ApplicationKind::SelfApplicant, Utc::now())
            .expect("application");

        assert!(matches!(
            store.commit_assignment(application.id, &round_robin),
            Err(AssignmentError::NoReviewersAvailable)
        ));
        assert_eq!(store.cursor().expect("cursor"), None);

        // The connection must be usable again after the rollback.
        store
            .insert_user(user("r@example.com", Role::Admin))
            .expect("reviewer after rollback");
        assert!(store.commit_assignment(application.id, &round_robin).is_ok());
        assert!(matches!(
            store.commit_assignment(application.id, &round_robin),
            Err(AssignmentError::AlreadyAssigned { .. })
        ));
    }

    #[test]
    fn submission_documents_commit_with_the_assignment() {
        let store = SqliteStore::in_memory().expect("store");
        let broker = store
            .insert_user(user("b@example.com", Role::Broker))
            .expect("broker");
        let application = store
            .insert_application(broker.id, ApplicationKind::SelfApplicant, Utc::now())
            .expect("application");
        let filed = |name: &str| NewDocument {
            application_id: application.id,
            category: DocumentCategory::ProofOfIncome,
            storage_key: StorageKey::generate(
                application.id,
                DocumentCategory::ProofOfIncome,
                Some(name),
            ),
            uploaded_at: Utc::now(),
        };

        let refused =
            store.commit_submission(application.id, vec![filed("a.pdf")], &round_robin);
        assert!(matches!(refused, Err(AssignmentError::NoReviewersAvailable)));
        assert!(store.documents_for(application.id).expect("documents").is_empty());

        let reviewer = store
            .insert_user(user("r@example.com", Role::Admin))
            .expect("reviewer");
        let (assigned, documents) = store
            .commit_submission(application.id, vec![filed("b.pdf")], &round_robin)
            .expect("submitted");
        assert_eq!(assigned, reviewer.id);
        assert_eq!(store.documents_for(application.id).expect("documents"), documents);

        let late =
            store.commit_submission(application.id, vec![filed("c.pdf")], &round_robin);
        assert!(matches!(late, Err(AssignmentError::AlreadyAssigned { .. })));
        assert_eq!(store.documents_for(application.id).expect("documents").len(), 1);
    }

    #[test]
    fn documents_keep_upload_order_and_unique_keys() {
        let store = SqliteStore::in_memory().expect("store");
        let broker = store
            .insert_user(user("b@example.com", Role::Broker))
            .expect("broker");
        let application = store
            .insert_application(broker.id, ApplicationKind::SelfApplicant, Utc::now())
            .expect("application");

        let mut keys = Vec::new();
        for category in [
            DocumentCategory::Identification,
            DocumentCategory::Identification,
            DocumentCategory::PropertyDetails,
        ] {
            let key = StorageKey::generate(application.id, category, Some("scan.pdf"));
            store
                .insert_document(NewDocument {
                    application_id: application.id,
                    category,
                    storage_key: key.clone(),
                    uploaded_at: Utc::now(),
                })
                .expect("document");
            keys.push(key);
        }

        let documents = store.documents_for(application.id).expect("documents");
        let stored: Vec<_> = documents.iter().map(|doc| doc.storage_key.clone()).collect();
        assert_eq!(stored, keys);

        let duplicate = store.insert_document(NewDocument {
            application_id: application.id,
            category: DocumentCategory::Identification,
            storage_key: keys[0].clone(),
            uploaded_at: Utc::now(),
        });
        assert!(matches!(duplicate, Err(RepositoryError::Conflict)));

        let found = store
            .document_by_key(&keys[2])
            .expect("lookup")
            .expect("present");
        assert_eq!(found.category, DocumentCategory::PropertyDetails);
    }

    #[test]
    fn reset_ticket_is_cleared_by_password_update() {
        let store = SqliteStore::in_memory().expect("store");
        let broker = store
            .insert_user(user("b@example.com", Role::Broker))
            .expect("broker");
        let now = Utc::now();
        store
            .store_reset_ticket(
                broker.id,
                ResetTicket {
                    token_digest: "digest".to_string(),
                    expires_at: now + chrono::Duration::hours(1),
                },
            )
            .expect("ticket");
        assert!(store
            .user_by_reset_digest("digest", now)
            .expect("lookup")
            .is_some());

        store.update_password(broker.id, "new-hash").expect("update");
        assert!(store
            .user_by_reset_digest("digest", now)
            .expect("lookup")
            .is_none());
        assert_eq!(
            store
                .user_by_id(broker.id)
                .expect("lookup")
                .expect("present")
                .password_hash,
            "new-hash"
        );
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::UserId;

/// Identifier wrapper for mortgage applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub i64);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether the broker files for themselves or on behalf of someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationKind {
    #[serde(rename = "self")]
    SelfApplicant,
    #[serde(rename = "someone_else")]
    SomeoneElse,
}

impl ApplicationKind {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationKind::SelfApplicant => "self",
            ApplicationKind::SomeoneElse => "someone_else",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "self" => Some(ApplicationKind::SelfApplicant),
            "someone_else" => Some(ApplicationKind::SomeoneElse),
            _ => None,
        }
    }
}

/// One mortgage application. `assigned_reviewer` is written once by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Application {
    pub id: ApplicationId,
    pub broker_id: UserId,
    pub kind: ApplicationKind,
    pub assigned_reviewer: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Application {
    pub fn is_assigned(&self) -> bool {
        self.assigned_reviewer.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub i64);

/// Upload categories requested on the application form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentCategory {
    #[serde(rename = "Proof_of_income")]
    ProofOfIncome,
    #[serde(rename = "Identification")]
    Identification,
    #[serde(rename = "Basic_financial_information")]
    BasicFinancialInformation,
    #[serde(rename = "Down_payment_confirmation")]
    DownPaymentConfirmation,
    #[serde(rename = "Property_details")]
    PropertyDetails,
}

impl DocumentCategory {
    pub const ALL: [DocumentCategory; 5] = [
        DocumentCategory::ProofOfIncome,
        DocumentCategory::Identification,
        DocumentCategory::BasicFinancialInformation,
        DocumentCategory::DownPaymentConfirmation,
        DocumentCategory::PropertyDetails,
    ];

    /// Multipart field name on the upload form; also the stored label.
    pub const fn field_name(self) -> &'static str {
        match self {
            DocumentCategory::ProofOfIncome => "Proof_of_income",
            DocumentCategory::Identification => "Identification",
            DocumentCategory::BasicFinancialInformation => "Basic_financial_information",
            DocumentCategory::DownPaymentConfirmation => "Down_payment_confirmation",
            DocumentCategory::PropertyDetails => "Property_details",
        }
    }

    pub fn from_field_name(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.field_name() == value)
    }

    fn slug(self) -> &'static str {
        match self {
            DocumentCategory::ProofOfIncome => "proof_of_income",
            DocumentCategory::Identification => "identification",
            DocumentCategory::BasicFinancialInformation => "basic_financial_information",
            DocumentCategory::DownPaymentConfirmation => "down_payment_confirmation",
            DocumentCategory::PropertyDetails => "property_details",
        }
    }
}

const MAX_KEY_LEN: usize = 128;
const MAX_EXTENSION_LEN: usize = 8;

/// Opaque, generated location of a document's bytes inside the upload root.
///
/// Keys look like `app-42/proof_of_income-<uuid>.pdf`. Only keys of exactly that shape
/// parse, so a caller-supplied key can never name a path outside the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    /// Mint a fresh key. Only the extension of `original_name` survives, lowercased and
    /// restricted to ASCII alphanumerics.
    pub fn generate(
        application: ApplicationId,
        category: DocumentCategory,
        original_name: Option<&str>,
    ) -> Self {
        let extension = original_name
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| {
                !ext.is_empty()
                    && ext.len() <= MAX_EXTENSION_LEN
                    && ext.chars().all(|c| c.is_ascii_alphanumeric())
            });
        let stem = format!(
            "app-{}/{}-{}",
            application.0,
            category.slug(),
            Uuid::new_v4().simple()
        );
        match extension {
            Some(ext) => Self(format!("{stem}.{ext}")),
            None => Self(stem),
        }
    }

    /// Accept a caller-supplied key only if it has the generated shape.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.len() > MAX_KEY_LEN {
            return None;
        }
        let (folder, file) = raw.split_once('/')?;
        let folder_ok = folder
            .strip_prefix("app-")
            .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()));
        let file_ok = !file.is_empty()
            && !file.starts_with('.')
            && !file.contains("..")
            && file
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.'));
        (folder_ok && file_ok).then(|| Self(raw.to_string()))
    }

    /// Rebuild a key read back from storage.
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extension used to guess the served content type.
    pub fn extension(&self) -> Option<&str> {
        let file = self.0.rsplit('/').next()?;
        file.rsplit_once('.').map(|(_, ext)| ext)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata row for an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub id: DocumentId,
    pub application_id: ApplicationId,
    pub category: DocumentCategory,
    pub storage_key: StorageKey,
    pub uploaded_at: DateTime<Utc>,
}

/// Insert payload for a document row; the repository assigns the id.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub application_id: ApplicationId,
    pub category: DocumentCategory,
    pub storage_key: StorageKey,
    pub uploaded_at: DateTime<Utc>,
}

/// An application together with the documents attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationDossier {
    #[serde(flatten)]
    pub application: Application,
    pub documents: Vec<Document>,
}

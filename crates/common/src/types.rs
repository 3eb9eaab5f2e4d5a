use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audience classes a notification can be addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipientType {
    Institution,
    Admin,
    Student,
    Branch,
}

impl RecipientType {
    /// Parse the wire value (`"INSTITUTION"`, `"ADMIN"`, ...). Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INSTITUTION" => Some(RecipientType::Institution),
            "ADMIN" => Some(RecipientType::Admin),
            "STUDENT" => Some(RecipientType::Student),
            "BRANCH" => Some(RecipientType::Branch),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecipientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientType::Institution => write!(f, "INSTITUTION"),
            RecipientType::Admin => write!(f, "ADMIN"),
            RecipientType::Student => write!(f, "STUDENT"),
            RecipientType::Branch => write!(f, "BRANCH"),
        }
    }
}

/// A resolved recipient: the audience class together with its required reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Institution(String),
    Admin(String),
    Student(String),
    Branch(String),
}

impl Recipient {
    /// Real-time channel this recipient listens on, e.g. `student:S1`.
    pub fn channel_name(&self) -> String {
        match self {
            Recipient::Institution(id) => format!("institution:{}", id),
            Recipient::Admin(id) => format!("institutionAdmin:{}", id),
            Recipient::Student(id) => format!("student:{}", id),
            Recipient::Branch(id) => format!("branch:{}", id),
        }
    }
}

/// Notification creation request, as handed to the producer.
///
/// Everything except the recipient fields is opaque to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Raw recipient type; kept as a string so unknown values survive the round trip.
    pub recipient_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_admin: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl NotificationPayload {
    /// Resolve the addressed recipient.
    ///
    /// Returns `None` when the type is unknown or its reference field is
    /// absent or empty.
    pub fn recipient(&self) -> Option<Recipient> {
        let kind = RecipientType::parse(&self.recipient_type)?;
        let reference = match kind {
            RecipientType::Institution => self.institution.as_deref(),
            RecipientType::Admin => self.institution_admin.as_deref(),
            RecipientType::Student => self.student.as_deref(),
            RecipientType::Branch => self.branch.as_deref(),
        }
        .filter(|r| !r.is_empty())?
        .to_string();

        Some(match kind {
            RecipientType::Institution => Recipient::Institution(reference),
            RecipientType::Admin => Recipient::Admin(reference),
            RecipientType::Student => Recipient::Student(reference),
            RecipientType::Branch => Recipient::Branch(reference),
        })
    }
}

/// The canonical notification entity.
///
/// The same value is pushed to live subscribers and later written to storage,
/// so both views share `id`, `created_at` and `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub payload: NotificationPayload,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Materialize a payload into a record with a fresh id and one creation timestamp.
    ///
    /// Timestamps are truncated to milliseconds so the value read back from
    /// Postgres (microsecond precision) compares equal to the one emitted live.
    pub fn materialize(payload: NotificationPayload) -> Self {
        let now = Utc::now().trunc_subsecs(3);
        Self {
            id: Uuid::new_v4(),
            payload,
            read: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A transactional email handed to the email queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An in-progress recording persisted for recovery. Promoted drafts are
/// deleted, never converted.
#[derive(Serialize, Deserialize)]
pub struct Draft {
    pub id: i64,
    pub user_id: String,
    pub audio_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbDraft {
    pub id: Option<i64>,
    pub user_id: Option<String>,
    pub audio_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<DbDraft> for Draft {
    fn from(draft: DbDraft) -> Self {
        Self {
            id: draft.id.unwrap_or_default(),
            user_id: draft.user_id.unwrap_or_default(),
            audio_url: draft.audio_url.unwrap_or_default(),
            created_at: draft.created_at.unwrap_or_else(Utc::now),
            updated_at: draft.updated_at.unwrap_or_else(Utc::now),
        }
    }
}

/// A finalized patient consultation. Clinical fields stay editable after
/// creation; identity and ownership do not. Optional sections use the empty
/// string as "absent".
#[derive(Serialize, Deserialize, Clone)]
pub struct PatientSession {
    pub id: i64,
    pub name: String,
    pub age: i64,
    pub transcript: String,
    pub summary: String,
    pub suggested_diagnosis: String,
    pub suggested_prescription: String,
    pub final_diagnosis: String,
    pub final_prescription: String,
    pub examination_results: String,
    pub treatment_plan: String,
    pub doctor_notes: String,
    pub document_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbPatientSession {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub age: Option<i64>,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub suggested_diagnosis: Option<String>,
    pub suggested_prescription: Option<String>,
    pub final_diagnosis: Option<String>,
    pub final_prescription: Option<String>,
    pub examination_results: Option<String>,
    pub treatment_plan: Option<String>,
    pub doctor_notes: Option<String>,
    pub document_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<DbPatientSession> for PatientSession {
    fn from(db: DbPatientSession) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            name: db.name.unwrap_or_default(),
            age: db.age.unwrap_or_default(),
            transcript: db.transcript.unwrap_or_default(),
            summary: db.summary.unwrap_or_default(),
            suggested_diagnosis: db.suggested_diagnosis.unwrap_or_default(),
            suggested_prescription: db.suggested_prescription.unwrap_or_default(),
            final_diagnosis: db.final_diagnosis.unwrap_or_default(),
            final_prescription: db.final_prescription.unwrap_or_default(),
            examination_results: db.examination_results.unwrap_or_default(),
            treatment_plan: db.treatment_plan.unwrap_or_default(),
            doctor_notes: db.doctor_notes.unwrap_or_default(),
            document_url: db.document_url.unwrap_or_default(),
            created_at: db.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Fields accepted when creating a session. `draft_id` marks the draft to
/// clean up once the session row exists.
pub struct NewSession {
    pub user_id: String,
    pub patient_name: String,
    pub patient_age: i64,
    pub transcript: String,
    pub summary: String,
    pub suggested_diagnosis: String,
    pub suggested_prescription: String,
    pub final_diagnosis: String,
    pub final_prescription: String,
    pub examination_results: String,
    pub treatment_plan: String,
    pub doctor_notes: String,
    pub draft_id: Option<i64>,
}

/// Structured partial update for a session: each `Some` field is written,
/// each `None` left alone. Applied through a single parameterized update.
#[derive(Default, Clone)]
pub struct SessionUpdate {
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub examination_results: Option<String>,
    pub final_diagnosis: Option<String>,
    pub final_prescription: Option<String>,
    pub treatment_plan: Option<String>,
    pub doctor_notes: Option<String>,
}

impl SessionUpdate {
    pub fn is_empty(&self) -> bool {
        self.transcript.is_none()
            && self.summary.is_none()
            && self.examination_results.is_none()
            && self.final_diagnosis.is_none()
            && self.final_prescription.is_none()
            && self.treatment_plan.is_none()
            && self.doctor_notes.is_none()
    }
}

/// Per-user prompt configuration, one row per user.
#[derive(Serialize, Deserialize, Clone)]
pub struct UserSettings {
    pub clinic_prompt: String,
    pub summary_prompt: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUserSettings {
    pub clinic_prompt: Option<String>,
    pub summary_prompt: Option<String>,
}

impl From<DbUserSettings> for UserSettings {
    fn from(db: DbUserSettings) -> Self {
        Self {
            clinic_prompt: db.clinic_prompt.unwrap_or_default(),
            summary_prompt: db.summary_prompt.unwrap_or_default(),
        }
    }
}

/// Accumulated transcription minutes for one user and billing period.
#[derive(Serialize, Deserialize, Clone)]
pub struct UsageRecord {
    pub year: i64,
    pub month: i64,
    pub minutes_used: f64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUsageRecord {
    pub year: Option<i64>,
    pub month: Option<i64>,
    pub minutes_used: Option<f64>,
}

impl From<DbUsageRecord> for UsageRecord {
    fn from(db: DbUsageRecord) -> Self {
        Self {
            year: db.year.unwrap_or_default(),
            month: db.month.unwrap_or_default(),
            minutes_used: db.minutes_used.unwrap_or_default(),
        }
    }
}

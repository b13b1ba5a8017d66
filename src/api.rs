use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{Datelike, Utc};
use rocket::serde::{json::Json, Deserialize, Serialize};
use rocket::State;
use validator::Validate;

use crate::db;
use crate::error::AppError;
use crate::gateway::PromptSet;
use crate::models::{Draft, NewSession, PatientSession, SessionUpdate, UsageRecord, UserSettings};
use crate::storage;
use crate::validation::{ErrorBody, ValidateRequest};
use crate::workflow::{self, clamp_age, WorkflowDeps};

fn require_user_id(user_id: Option<String>) -> Result<String, AppError> {
    match user_id {
        Some(user_id) if !user_id.is_empty() => Ok(user_id),
        _ => Err(AppError::Validation("User ID is required".to_string())),
    }
}

/// Splits a base64 data URL (`data:audio/webm;base64,...`) into decoded
/// bytes and the declared MIME type. A bare base64 payload is treated as
/// webm.
fn decode_audio_blob(audio_blob: &str) -> Result<(Vec<u8>, String), AppError> {
    let (mime, payload) = match audio_blob.split_once(',') {
        Some((header, payload)) => {
            let mime = header
                .strip_prefix("data:")
                .and_then(|header| header.split(';').next())
                .filter(|mime| !mime.is_empty())
                .unwrap_or("audio/webm")
                .to_string();
            (mime, payload)
        }
        None => ("audio/webm".to_string(), audio_blob),
    };

    let bytes = BASE64
        .decode(payload)
        .map_err(|e| AppError::Validation(format!("Invalid base64 audio payload: {}", e)))?;

    Ok((bytes, mime))
}

// ---------------------------------------------------------------------------
// Drafts

#[derive(Serialize, Deserialize)]
pub struct DraftsResponse {
    pub drafts: Vec<Draft>,
}

#[derive(Deserialize, Validate)]
pub struct SaveDraftRequest {
    #[validate(length(min = 1, message = "User ID is required"))]
    user_id: String,
    #[validate(length(min = 1, message = "Audio data is required"))]
    audio_blob: String,
    #[serde(default)]
    is_final: bool,
}

#[derive(Serialize, Deserialize)]
pub struct SaveDraftResponse {
    pub draft_id: i64,
    pub audio_url: String,
}

#[get("/drafts?<user_id>")]
pub async fn api_list_drafts(
    user_id: Option<String>,
    deps: &State<WorkflowDeps>,
) -> Result<Json<DraftsResponse>, AppError> {
    let user_id = require_user_id(user_id)?;
    let drafts = db::list_drafts(&deps.pool, &user_id).await?;
    Ok(Json(DraftsResponse { drafts }))
}

#[post("/drafts", data = "<request>")]
pub async fn api_create_draft(
    request: Json<SaveDraftRequest>,
    deps: &State<WorkflowDeps>,
) -> Result<Json<SaveDraftResponse>, AppError> {
    request.validate_request()?;
    tracing::info!(is_final = request.is_final, "Saving new draft");

    let (bytes, mime) = decode_audio_blob(&request.audio_blob)?;
    let key = storage::draft_audio_key(&request.user_id, Utc::now().timestamp_millis(), &mime);
    let audio_url = deps.store.put(&key, bytes, &mime).await?;

    let draft_id = db::create_draft(&deps.pool, &request.user_id, &audio_url).await?;

    Ok(Json(SaveDraftResponse {
        draft_id,
        audio_url,
    }))
}

#[put("/drafts/<id>", data = "<request>")]
pub async fn api_update_draft(
    id: i64,
    request: Json<SaveDraftRequest>,
    deps: &State<WorkflowDeps>,
) -> Result<Json<SaveDraftResponse>, AppError> {
    request.validate_request()?;
    tracing::info!(is_final = request.is_final, "Updating draft");

    let (bytes, mime) = decode_audio_blob(&request.audio_blob)?;
    let key = storage::draft_audio_key(&request.user_id, Utc::now().timestamp_millis(), &mime);
    let audio_url = deps.store.put(&key, bytes, &mime).await?;

    db::update_draft(&deps.pool, id, &request.user_id, &audio_url).await?;

    Ok(Json(SaveDraftResponse {
        draft_id: id,
        audio_url,
    }))
}

// ---------------------------------------------------------------------------
// Sessions

#[derive(Serialize, Deserialize)]
pub struct SessionsResponse {
    pub sessions: Vec<PatientSession>,
}

#[derive(Serialize, Deserialize)]
pub struct SessionResponse {
    pub session: PatientSession,
}

#[derive(Deserialize, Validate)]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, message = "User ID is required"))]
    user_id: String,
    #[validate(length(min = 1, message = "Patient name is required"))]
    patient_name: String,
    #[validate(length(min = 1, message = "Patient age is required"))]
    patient_age: String,
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    suggested_diagnosis: String,
    #[serde(default)]
    suggested_prescription: String,
    #[validate(length(min = 1, message = "Final diagnosis is required"))]
    final_diagnosis: String,
    #[validate(length(min = 1, message = "Final prescription is required"))]
    final_prescription: String,
    #[serde(default)]
    examination_results: String,
    #[serde(default)]
    treatment_plan: String,
    #[serde(default)]
    doctor_notes: String,
    #[serde(default)]
    draft_id: Option<i64>,
}

#[derive(Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub success: bool,
    pub session_id: i64,
    pub document_url: String,
}

#[get("/sessions?<user_id>")]
pub async fn api_list_sessions(
    user_id: Option<String>,
    deps: &State<WorkflowDeps>,
) -> Result<Json<SessionsResponse>, AppError> {
    let user_id = require_user_id(user_id)?;
    let sessions = db::list_sessions(&deps.pool, &user_id).await?;
    Ok(Json(SessionsResponse { sessions }))
}

#[post("/sessions", data = "<request>")]
pub async fn api_create_session(
    request: Json<CreateSessionRequest>,
    deps: &State<WorkflowDeps>,
) -> Result<Json<CreateSessionResponse>, AppError> {
    request.validate_request()?;

    let age_text = clamp_age(&request.patient_age);
    if age_text.is_empty() {
        return Err(AppError::Validation(
            "Patient age must be a number".to_string(),
        ));
    }
    let patient_age: i64 = age_text
        .parse()
        .map_err(|_| AppError::Validation("Patient age must be a number".to_string()))?;

    let new = NewSession {
        user_id: request.user_id.clone(),
        patient_name: request.patient_name.clone(),
        patient_age,
        transcript: request.transcript.clone(),
        summary: request.summary.clone(),
        suggested_diagnosis: request.suggested_diagnosis.clone(),
        suggested_prescription: request.suggested_prescription.clone(),
        final_diagnosis: request.final_diagnosis.clone(),
        final_prescription: request.final_prescription.clone(),
        examination_results: request.examination_results.clone(),
        treatment_plan: request.treatment_plan.clone(),
        doctor_notes: request.doctor_notes.clone(),
        draft_id: request.draft_id,
    };

    let commit = workflow::commit_session(&deps.pool, deps.store.as_ref(), &new).await?;

    Ok(Json(CreateSessionResponse {
        success: true,
        session_id: commit.session_id,
        document_url: commit.document_url,
    }))
}

#[get("/sessions/<id>")]
pub async fn api_get_session(
    id: i64,
    deps: &State<WorkflowDeps>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = db::get_session(&deps.pool, id).await?;
    Ok(Json(SessionResponse { session }))
}

#[derive(Deserialize)]
pub struct UpdateSessionRequest {
    transcript: Option<String>,
    summary: Option<String>,
    examination_results: Option<String>,
    diagnosis: Option<String>,
    prescription: Option<String>,
    treatment_plan: Option<String>,
    doctor_notes: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct UpdateSessionResponse {
    pub success: bool,
    pub document_url: String,
}

#[patch("/sessions/<id>?<user_id>", data = "<request>")]
pub async fn api_update_session(
    id: i64,
    user_id: Option<String>,
    request: Json<UpdateSessionRequest>,
    deps: &State<WorkflowDeps>,
) -> Result<Json<UpdateSessionResponse>, AppError> {
    let user_id = require_user_id(user_id)?;

    let update = SessionUpdate {
        transcript: request.transcript.clone(),
        summary: request.summary.clone(),
        examination_results: request.examination_results.clone(),
        final_diagnosis: request.diagnosis.clone(),
        final_prescription: request.prescription.clone(),
        treatment_plan: request.treatment_plan.clone(),
        doctor_notes: request.doctor_notes.clone(),
    };

    let document_url =
        workflow::update_session_document(&deps.pool, deps.store.as_ref(), id, &user_id, &update)
            .await?;

    Ok(Json(UpdateSessionResponse {
        success: true,
        document_url,
    }))
}

#[derive(Deserialize)]
pub struct DeleteSessionRequest {
    user_id: String,
}

#[derive(Serialize, Deserialize)]
pub struct DeleteSessionResponse {
    pub success: bool,
    pub message: String,
}

#[delete("/sessions/<id>", data = "<request>")]
pub async fn api_delete_session(
    id: i64,
    request: Json<DeleteSessionRequest>,
    deps: &State<WorkflowDeps>,
) -> Result<Json<DeleteSessionResponse>, AppError> {
    if request.user_id.is_empty() {
        return Err(AppError::Validation("User ID is required".to_string()));
    }

    db::delete_session(&deps.pool, id, &request.user_id).await?;

    Ok(Json(DeleteSessionResponse {
        success: true,
        message: "Session deleted successfully".to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Analysis

#[derive(Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[validate(length(min = 1, message = "User ID is required"))]
    user_id: String,
    #[validate(length(min = 1, message = "Transcript is required"))]
    transcript: String,
}

#[derive(Serialize, Deserialize)]
pub struct AnalysisBody {
    pub summary: String,
    pub suggested_diagnosis: String,
    pub suggested_prescription: String,
}

#[derive(Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub analysis: AnalysisBody,
}

#[post("/sessions/analyze", data = "<request>")]
pub async fn api_analyze_transcript(
    request: Json<AnalyzeRequest>,
    deps: &State<WorkflowDeps>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    request.validate_request()?;

    let settings = db::get_settings(&deps.pool, &request.user_id).await?;
    let prompts = PromptSet::for_user(settings.as_ref());

    let analysis = deps.analyst.analyze(&request.transcript, &prompts).await?;

    Ok(Json(AnalyzeResponse {
        success: true,
        analysis: AnalysisBody {
            summary: analysis.summary,
            suggested_diagnosis: analysis.suggested_diagnosis,
            suggested_prescription: analysis.suggested_prescription,
        },
    }))
}

// ---------------------------------------------------------------------------
// Settings

#[derive(Serialize, Deserialize)]
pub struct SettingsResponse {
    pub settings: UserSettings,
}

#[derive(Deserialize, Validate)]
pub struct SaveSettingsRequest {
    #[validate(length(min = 1, message = "User ID is required"))]
    user_id: String,
    #[serde(default)]
    clinic_prompt: String,
    #[serde(default)]
    summary_prompt: String,
}

#[derive(Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[get("/settings?<user_id>")]
pub async fn api_get_settings(
    user_id: Option<String>,
    deps: &State<WorkflowDeps>,
) -> Result<Json<SettingsResponse>, AppError> {
    let user_id = require_user_id(user_id)?;

    // Unset settings read back as empty prompts; the analysis defaults only
    // apply at analyze time.
    let settings = db::get_settings(&deps.pool, &user_id)
        .await?
        .unwrap_or(UserSettings {
            clinic_prompt: String::new(),
            summary_prompt: String::new(),
        });

    Ok(Json(SettingsResponse { settings }))
}

#[post("/settings", data = "<request>")]
pub async fn api_save_settings(
    request: Json<SaveSettingsRequest>,
    deps: &State<WorkflowDeps>,
) -> Result<Json<SuccessResponse>, AppError> {
    request.validate_request()?;

    db::upsert_settings(
        &deps.pool,
        &request.user_id,
        &request.clinic_prompt,
        &request.summary_prompt,
    )
    .await?;

    Ok(Json(SuccessResponse { success: true }))
}

// ---------------------------------------------------------------------------
// Usage

#[derive(Serialize, Deserialize)]
pub struct UsageResponse {
    pub usage: Vec<UsageRecord>,
}

#[derive(Deserialize, Validate)]
pub struct RecordUsageRequest {
    #[validate(length(min = 1, message = "User ID is required"))]
    user_id: String,
    #[validate(range(min = 0.0, message = "Minutes must not be negative"))]
    minutes: f64,
}

#[get("/usage?<user_id>&<year>&<month>")]
pub async fn api_get_usage(
    user_id: Option<String>,
    year: Option<i64>,
    month: Option<i64>,
    deps: &State<WorkflowDeps>,
) -> Result<Json<UsageResponse>, AppError> {
    let user_id = require_user_id(user_id)?;

    let period = match (year, month) {
        (Some(year), Some(month)) => Some((year, month)),
        _ => None,
    };

    let usage = db::get_usage(&deps.pool, &user_id, period).await?;
    Ok(Json(UsageResponse { usage }))
}

#[post("/transcription/usage", data = "<request>")]
pub async fn api_record_usage(
    request: Json<RecordUsageRequest>,
    deps: &State<WorkflowDeps>,
) -> Result<Json<SuccessResponse>, AppError> {
    request.validate_request()?;

    let now = Utc::now();
    db::record_usage(
        &deps.pool,
        &request.user_id,
        now.year() as i64,
        now.month() as i64,
        request.minutes,
    )
    .await?;

    Ok(Json(SuccessResponse { success: true }))
}

// ---------------------------------------------------------------------------

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

#[catch(400)]
pub fn bad_request() -> Json<ErrorBody> {
    Json(ErrorBody::new("Bad request"))
}

#[catch(404)]
pub fn not_found() -> Json<ErrorBody> {
    Json(ErrorBody::new("Resource not found"))
}

#[catch(422)]
pub fn unprocessable_entity() -> Json<ErrorBody> {
    Json(ErrorBody::new("Invalid request body"))
}

#[catch(500)]
pub fn internal_error() -> Json<ErrorBody> {
    Json(ErrorBody::new("An unexpected error occurred"))
}

//! The session capture-and-document workflow: recording or file upload,
//! incremental draft persistence, transcription, analysis, review/edit and
//! the final transactional commit. One value of [`SessionWorkflow`] is one
//! consultation in progress; parallel consultations are independent values
//! with their own draft ids.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::db;
use crate::document::{self, ConsultationRecord};
use crate::error::AppError;
use crate::gateway::transcription::is_supported_language;
use crate::gateway::{Analysis, AnalysisGateway, PromptSet, TranscriptionGateway};
use crate::models::{NewSession, SessionUpdate};
use crate::storage::{self, ObjectStore};

pub const MAX_AUDIO_BYTES: usize = 30 * 1024 * 1024;

pub const MIN_PATIENT_AGE: i64 = 0;
pub const MAX_PATIENT_AGE: i64 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStep {
    Recording,
    Review,
    Complete,
}

/// Captured or uploaded audio held in memory until the draft is persisted.
#[derive(Clone)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Capture device boundary. The controller only ever drives these four
/// operations; it never inspects recorder internals.
pub trait Recorder {
    fn start(&mut self) -> Result<(), AppError>;
    /// Suspends capture and returns a snapshot of everything captured so far.
    fn pause(&mut self) -> Result<AudioClip, AppError>;
    fn resume(&mut self) -> Result<(), AppError>;
    /// Ends capture and returns the full recording.
    fn stop(&mut self) -> Result<AudioClip, AppError>;
}

/// Collaborators injected into a workflow. Constructed once at startup and
/// shared; the workflow holds no global state.
#[derive(Clone)]
pub struct WorkflowDeps {
    pub pool: Pool<Sqlite>,
    pub store: Arc<dyn ObjectStore>,
    pub transcriber: Arc<dyn TranscriptionGateway>,
    pub analyst: Arc<dyn AnalysisGateway>,
}

/// Editable final fields of the Complete step. AI suggestions pre-populate
/// diagnosis and prescription; everything else starts empty.
#[derive(Default, Clone)]
pub struct SessionFields {
    pub patient_name: String,
    pub patient_age: String,
    pub final_diagnosis: String,
    pub final_prescription: String,
    pub examination_results: String,
    pub treatment_plan: String,
    pub doctor_notes: String,
}

pub struct SessionCommit {
    pub session_id: i64,
    pub document_url: String,
}

pub struct SessionWorkflow {
    deps: WorkflowDeps,
    user_id: String,
    step: WorkflowStep,
    draft_id: Option<i64>,
    audio: Option<AudioClip>,
    language: Option<String>,
    transcript: Option<String>,
    analysis: Option<Analysis>,
    pub fields: SessionFields,
}

impl SessionWorkflow {
    pub fn new(deps: WorkflowDeps, user_id: &str) -> Self {
        Self {
            deps,
            user_id: user_id.to_string(),
            step: WorkflowStep::Recording,
            draft_id: None,
            audio: None,
            language: None,
            transcript: None,
            analysis: None,
            fields: SessionFields::default(),
        }
    }

    pub fn step(&self) -> WorkflowStep {
        self.step
    }

    pub fn draft_id(&self) -> Option<i64> {
        self.draft_id
    }

    pub fn audio(&self) -> Option<&AudioClip> {
        self.audio.as_ref()
    }

    pub fn transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        self.analysis.as_ref()
    }

    fn require_step(&self, expected: WorkflowStep, action: &str) -> Result<(), AppError> {
        if self.step != expected {
            return Err(AppError::Validation(format!(
                "{} is not available at this step",
                action
            )));
        }
        Ok(())
    }

    pub fn start_recording(&mut self, recorder: &mut dyn Recorder) -> Result<(), AppError> {
        self.require_step(WorkflowStep::Recording, "Recording")?;
        recorder.start()
    }

    /// Pauses capture and persists the audio so far as a draft. A failed
    /// draft save is non-fatal: the snapshot stays in memory and the save
    /// can be retried.
    #[instrument(skip_all)]
    pub async fn pause_recording(&mut self, recorder: &mut dyn Recorder) -> Result<(), AppError> {
        self.require_step(WorkflowStep::Recording, "Pausing")?;
        let clip = recorder.pause()?;
        self.audio = Some(clip);
        self.save_draft().await
    }

    pub fn resume_recording(&mut self, recorder: &mut dyn Recorder) -> Result<(), AppError> {
        self.require_step(WorkflowStep::Recording, "Resuming")?;
        recorder.resume()
    }

    /// Stops capture, persists the final draft and moves to Review. On a
    /// failed draft save the workflow stays in Recording with the audio
    /// retained; the user may retry the save or proceed without a draft.
    #[instrument(skip_all)]
    pub async fn finish_recording(&mut self, recorder: &mut dyn Recorder) -> Result<(), AppError> {
        self.require_step(WorkflowStep::Recording, "Finishing the recording")?;
        let clip = recorder.stop()?;
        self.audio = Some(clip);
        self.save_draft().await?;
        self.step = WorkflowStep::Review;
        Ok(())
    }

    /// Accepts a dropped or selected audio file instead of a live capture.
    /// No draft is persisted on this path.
    pub fn accept_file(&mut self, clip: AudioClip) -> Result<(), AppError> {
        self.require_step(WorkflowStep::Recording, "File upload")?;
        validate_audio(&clip)?;
        self.audio = Some(clip);
        self.step = WorkflowStep::Review;
        Ok(())
    }

    /// Retries the draft save for audio already held in memory.
    pub async fn retry_draft_save(&mut self) -> Result<(), AppError> {
        self.save_draft().await
    }

    /// Moves to Review without a persisted draft, after the user chose to
    /// proceed past a failed draft save.
    pub fn proceed_to_review(&mut self) -> Result<(), AppError> {
        self.require_step(WorkflowStep::Recording, "Review")?;
        if self.audio.is_none() {
            return Err(AppError::Validation(
                "No audio has been recorded yet".to_string(),
            ));
        }
        self.step = WorkflowStep::Review;
        Ok(())
    }

    /// The explicit back transition: discards the in-review audio reference
    /// and returns to Recording. The draft id is kept so a later save
    /// updates rather than duplicates.
    pub fn back_to_recording(&mut self) -> Result<(), AppError> {
        self.require_step(WorkflowStep::Review, "Going back")?;
        self.audio = None;
        self.step = WorkflowStep::Recording;
        Ok(())
    }

    pub fn set_language(&mut self, code: Option<&str>) -> Result<(), AppError> {
        if let Some(code) = code {
            if !is_supported_language(code) {
                return Err(AppError::Validation(format!(
                    "Unsupported language code: {}",
                    code
                )));
            }
        }
        self.language = code.map(String::from);
        Ok(())
    }

    /// "Transcribe & Analyze": transcription, then analysis, in order. The
    /// transcript is committed to workflow state as soon as transcription
    /// succeeds, so a retry after an analysis failure skips the
    /// transcription call. Analysis results are only committed once the
    /// call succeeds; any failure leaves the workflow in Review.
    #[instrument(skip_all)]
    pub async fn transcribe_and_analyze(&mut self) -> Result<(), AppError> {
        self.require_step(WorkflowStep::Review, "Transcription")?;

        if self.transcript.is_none() {
            let clip = self.audio.as_ref().ok_or_else(|| {
                AppError::Validation("No audio available for transcription".to_string())
            })?;

            let transcription = self
                .deps
                .transcriber
                .transcribe(&clip.bytes, &clip.mime, self.language.as_deref())
                .await?;

            self.transcript = Some(transcription.transcript);
            self.report_usage(transcription.audio_minutes).await;
        }

        let transcript = self.transcript.clone().unwrap_or_default();

        let settings = db::get_settings(&self.deps.pool, &self.user_id).await?;
        let prompts = PromptSet::for_user(settings.as_ref());
        let analysis = self.deps.analyst.analyze(&transcript, &prompts).await?;

        self.fields.final_diagnosis = analysis.suggested_diagnosis.clone();
        self.fields.final_prescription = analysis.suggested_prescription.clone();
        self.analysis = Some(analysis);
        self.step = WorkflowStep::Complete;
        Ok(())
    }

    /// Usage reporting is best-effort: a failed write logs a warning and
    /// never fails the transcription that produced it.
    async fn report_usage(&self, minutes: f64) {
        let now = Utc::now();
        if let Err(e) = db::record_usage(
            &self.deps.pool,
            &self.user_id,
            now.year() as i64,
            now.month() as i64,
            minutes,
        )
        .await
        {
            warn!(error = %e, "Failed to record transcription usage");
        }
    }

    /// Clamps and stores the patient age. Out-of-range values are clamped
    /// to [0, 150]; non-numeric input clears the field.
    pub fn set_patient_age(&mut self, input: &str) {
        self.fields.patient_age = clamp_age(input);
    }

    fn summary(&self) -> String {
        self.analysis
            .as_ref()
            .map(|analysis| analysis.summary.clone())
            .unwrap_or_default()
    }

    fn record(&self) -> ConsultationRecord {
        ConsultationRecord {
            patient_name: self.fields.patient_name.clone(),
            patient_age: self.fields.patient_age.clone(),
            date: Utc::now().format("%Y-%m-%d").to_string(),
            summary: self.summary(),
            examination_results: self.fields.examination_results.clone(),
            diagnosis: self.fields.final_diagnosis.clone(),
            prescription: self.fields.final_prescription.clone(),
            treatment_plan: self.fields.treatment_plan.clone(),
            doctor_notes: self.fields.doctor_notes.clone(),
        }
    }

    /// "Copy to Clipboard": pure formatting of the current fields.
    pub fn clipboard_text(&self) -> String {
        document::clipboard_text(&self.record())
    }

    /// "Generate Document": validates the required fields, renders and
    /// uploads the document, commits the session transactionally and cleans
    /// up the originating draft. On failure the workflow stays in Complete
    /// so the user can retry; a succeeded upload is not rolled back.
    #[instrument(skip_all)]
    pub async fn generate_document(&mut self) -> Result<SessionCommit, AppError> {
        self.require_step(WorkflowStep::Complete, "Document generation")?;

        if self.fields.patient_name.is_empty()
            || self.fields.patient_age.is_empty()
            || self.fields.final_diagnosis.is_empty()
            || self.fields.final_prescription.is_empty()
        {
            return Err(AppError::Validation(
                "Please fill out all required fields: name, age, final diagnosis, management"
                    .to_string(),
            ));
        }

        let age: i64 = self
            .fields
            .patient_age
            .parse()
            .map_err(|_| AppError::Validation("Patient age must be a number".to_string()))?;

        let analysis = self.analysis.clone();
        let new = NewSession {
            user_id: self.user_id.clone(),
            patient_name: self.fields.patient_name.clone(),
            patient_age: age,
            transcript: self.transcript.clone().unwrap_or_default(),
            summary: self.summary(),
            suggested_diagnosis: analysis
                .as_ref()
                .map(|a| a.suggested_diagnosis.clone())
                .unwrap_or_default(),
            suggested_prescription: analysis
                .as_ref()
                .map(|a| a.suggested_prescription.clone())
                .unwrap_or_default(),
            final_diagnosis: self.fields.final_diagnosis.clone(),
            final_prescription: self.fields.final_prescription.clone(),
            examination_results: self.fields.examination_results.clone(),
            treatment_plan: self.fields.treatment_plan.clone(),
            doctor_notes: self.fields.doctor_notes.clone(),
            draft_id: self.draft_id,
        };

        let commit = commit_session(&self.deps.pool, self.deps.store.as_ref(), &new).await?;

        info!(session_id = commit.session_id, "Session committed");
        self.draft_id = None;
        Ok(commit)
    }

    /// Create-or-update keyed by the workflow-held draft id: the first save
    /// creates the row, later saves update it in place.
    async fn save_draft(&mut self) -> Result<(), AppError> {
        let clip = self.audio.as_ref().ok_or_else(|| {
            AppError::Validation("No recorded audio to save".to_string())
        })?;

        let key = storage::draft_audio_key(
            &self.user_id,
            Utc::now().timestamp_millis(),
            &clip.mime,
        );
        let audio_url = self
            .deps
            .store
            .put(&key, clip.bytes.clone(), &clip.mime)
            .await?;

        match self.draft_id {
            Some(draft_id) => {
                db::update_draft(&self.deps.pool, draft_id, &self.user_id, &audio_url).await?
            }
            None => {
                let draft_id = db::create_draft(&self.deps.pool, &self.user_id, &audio_url).await?;
                self.draft_id = Some(draft_id);
            }
        }

        Ok(())
    }
}

/// Acceptance rules for uploaded audio: MIME must be `audio/*` and the file
/// at most 30 MiB.
pub fn validate_audio(clip: &AudioClip) -> Result<(), AppError> {
    if !clip.mime.starts_with("audio/") {
        return Err(AppError::Validation(
            "Please upload an audio file (mp3, wav, etc.)".to_string(),
        ));
    }
    if clip.bytes.len() > MAX_AUDIO_BYTES {
        return Err(AppError::Validation(
            "File size exceeds 30MB limit".to_string(),
        ));
    }
    Ok(())
}

/// Clamps an age string to [0, 150]. Non-numeric input yields the empty
/// string, matching a cleared field.
pub fn clamp_age(input: &str) -> String {
    match input.trim().parse::<i64>() {
        Ok(age) if age < MIN_PATIENT_AGE => MIN_PATIENT_AGE.to_string(),
        Ok(age) if age > MAX_PATIENT_AGE => MAX_PATIENT_AGE.to_string(),
        Ok(age) => age.to_string(),
        Err(_) => String::new(),
    }
}

/// Renders the document, uploads it and writes the session plus its
/// ownership link in one transaction, deleting the originating draft when
/// one is named. Shared by the workflow and the session-creation endpoint.
#[instrument(skip_all, fields(user_id = %new.user_id))]
pub async fn commit_session(
    pool: &Pool<Sqlite>,
    store: &dyn ObjectStore,
    new: &NewSession,
) -> Result<SessionCommit, AppError> {
    let record = ConsultationRecord {
        patient_name: new.patient_name.clone(),
        patient_age: new.patient_age.to_string(),
        date: Utc::now().format("%Y-%m-%d").to_string(),
        summary: new.summary.clone(),
        examination_results: new.examination_results.clone(),
        diagnosis: new.final_diagnosis.clone(),
        prescription: new.final_prescription.clone(),
        treatment_plan: new.treatment_plan.clone(),
        doctor_notes: new.doctor_notes.clone(),
    };

    let html = document::render(&record);
    let key = storage::new_document_key();
    let document_url = store.put(&key, html.into_bytes(), "text/html").await?;

    let session_id = db::create_session(pool, new, &document_url).await?;

    Ok(SessionCommit {
        session_id,
        document_url,
    })
}

/// Applies a partial update to a session, re-renders its document at the
/// stable per-session key and stores the new URL, all in one transaction
/// with an explicit rollback on failure.
#[instrument(skip_all)]
pub async fn update_session_document(
    pool: &Pool<Sqlite>,
    store: &dyn ObjectStore,
    session_id: i64,
    user_id: &str,
    update: &SessionUpdate,
) -> Result<String, AppError> {
    let mut tx = pool.begin().await?;

    match apply_update_and_render(&mut tx, store, session_id, user_id, update).await {
        Ok(document_url) => {
            tx.commit().await?;
            Ok(document_url)
        }
        Err(e) => {
            tx.rollback().await.ok();
            Err(e)
        }
    }
}

async fn apply_update_and_render(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    store: &dyn ObjectStore,
    session_id: i64,
    user_id: &str,
    update: &SessionUpdate,
) -> Result<String, AppError> {
    db::apply_session_update(&mut **tx, session_id, update).await?;

    let session = db::get_session_tx(tx, session_id).await?;

    let record = ConsultationRecord {
        patient_name: session.name.clone(),
        patient_age: session.age.to_string(),
        date: Utc::now().format("%Y-%m-%d").to_string(),
        summary: session.summary.clone(),
        examination_results: session.examination_results.clone(),
        diagnosis: session.final_diagnosis.clone(),
        prescription: session.final_prescription.clone(),
        treatment_plan: session.treatment_plan.clone(),
        doctor_notes: session.doctor_notes.clone(),
    };

    let html = document::render(&record);
    let key = storage::session_document_key(user_id, session_id);
    let document_url = store.put(&key, html.into_bytes(), "text/html").await?;

    db::set_document_url(&mut **tx, session_id, &document_url).await?;

    Ok(document_url)
}

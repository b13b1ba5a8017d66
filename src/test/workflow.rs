use std::sync::atomic::Ordering;

use crate::db::{get_session, get_usage, list_drafts};
use crate::error::AppError;
use crate::test::utils::{ScriptedRecorder, TestContext, DIARIZED_TRANSCRIPT};
use crate::workflow::{clamp_age, validate_audio, AudioClip, WorkflowStep, MAX_AUDIO_BYTES};

fn clip(bytes: &[u8], mime: &str) -> AudioClip {
    AudioClip {
        bytes: bytes.to_vec(),
        mime: mime.to_string(),
    }
}

#[test]
fn test_audio_acceptance_rules() {
    assert!(validate_audio(&clip(b"abc", "audio/mp3")).is_ok());
    assert!(validate_audio(&clip(&vec![0u8; MAX_AUDIO_BYTES], "audio/wav")).is_ok());

    let too_large = validate_audio(&clip(&vec![0u8; MAX_AUDIO_BYTES + 1], "audio/wav"));
    assert!(matches!(too_large, Err(AppError::Validation(_))));

    let not_audio = validate_audio(&clip(b"abc", "application/pdf"));
    assert!(matches!(not_audio, Err(AppError::Validation(_))));
}

#[test]
fn test_clamp_age() {
    assert_eq!(clamp_age("200"), "150");
    assert_eq!(clamp_age("-5"), "0");
    assert_eq!(clamp_age("45"), "45");
    assert_eq!(clamp_age("0"), "0");
    assert_eq!(clamp_age("150"), "150");
    assert_eq!(clamp_age("abc"), "");
}

#[rocket::async_test]
async fn test_accept_file_moves_to_review() {
    let ctx = TestContext::new().await;
    let mut workflow = ctx.workflow("doctor-1");

    workflow
        .accept_file(clip(b"fake-mp3", "audio/mp3"))
        .expect("Upload rejected");

    assert_eq!(workflow.step(), WorkflowStep::Review);
    assert!(workflow.audio().is_some());
    // Uploaded files are not persisted as drafts.
    assert!(workflow.draft_id().is_none());
}

#[rocket::async_test]
async fn test_accept_file_rejects_invalid_audio_without_transition() {
    let ctx = TestContext::new().await;
    let mut workflow = ctx.workflow("doctor-1");

    let result = workflow.accept_file(clip(&vec![0u8; MAX_AUDIO_BYTES + 1], "audio/mp3"));
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(workflow.step(), WorkflowStep::Recording);
    assert!(workflow.audio().is_none());

    let result = workflow.accept_file(clip(b"plain text", "text/plain"));
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(workflow.step(), WorkflowStep::Recording);
}

#[rocket::async_test]
async fn test_pause_creates_draft_and_stop_updates_it() {
    let ctx = TestContext::new().await;
    let mut workflow = ctx.workflow("doctor-1");
    let mut recorder = ScriptedRecorder::new();

    workflow
        .start_recording(&mut recorder)
        .expect("Failed to start");
    recorder.feed(b"first-chunk");

    workflow
        .pause_recording(&mut recorder)
        .await
        .expect("Pause failed");

    let draft_id = workflow.draft_id().expect("No draft created on pause");
    assert_eq!(workflow.step(), WorkflowStep::Recording);

    workflow
        .resume_recording(&mut recorder)
        .expect("Resume failed");
    recorder.feed(b"second-chunk");

    workflow
        .finish_recording(&mut recorder)
        .await
        .expect("Finish failed");

    // Same draft updated in place, not duplicated.
    assert_eq!(workflow.draft_id(), Some(draft_id));
    assert_eq!(workflow.step(), WorkflowStep::Review);

    let drafts = list_drafts(&ctx.deps.pool, "doctor-1")
        .await
        .expect("Failed to list drafts");
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].id, draft_id);

    // The saves uploaded audio under the user's draft prefix.
    let keys = ctx.store.keys();
    assert!(keys.iter().any(|key| key.starts_with("drafts/doctor-1/")));
}

#[rocket::async_test]
async fn test_draft_save_failure_is_non_fatal() {
    let ctx = TestContext::new().await;
    let mut workflow = ctx.workflow("doctor-1");
    let mut recorder = ScriptedRecorder::new();

    workflow
        .start_recording(&mut recorder)
        .expect("Failed to start");
    recorder.feed(b"audio-bytes");

    ctx.store.fail.store(true, Ordering::SeqCst);
    let result = workflow.finish_recording(&mut recorder).await;

    assert!(result.is_err());
    assert_eq!(workflow.step(), WorkflowStep::Recording);
    // The captured audio is retained for retry.
    assert!(workflow.audio().is_some());
    assert!(workflow.draft_id().is_none());

    // Retry once the store recovers.
    ctx.store.fail.store(false, Ordering::SeqCst);
    workflow.retry_draft_save().await.expect("Retry failed");
    assert!(workflow.draft_id().is_some());

    workflow.proceed_to_review().expect("Proceed failed");
    assert_eq!(workflow.step(), WorkflowStep::Review);
}

#[rocket::async_test]
async fn test_proceed_without_draft_after_failed_save() {
    let ctx = TestContext::new().await;
    let mut workflow = ctx.workflow("doctor-1");
    let mut recorder = ScriptedRecorder::new();

    workflow
        .start_recording(&mut recorder)
        .expect("Failed to start");
    recorder.feed(b"audio-bytes");

    ctx.store.fail.store(true, Ordering::SeqCst);
    assert!(workflow.finish_recording(&mut recorder).await.is_err());

    // The user may proceed to review without a persisted draft.
    workflow.proceed_to_review().expect("Proceed failed");
    assert_eq!(workflow.step(), WorkflowStep::Review);
    assert!(workflow.draft_id().is_none());
}

#[rocket::async_test]
async fn test_back_to_recording_discards_audio_keeps_draft() {
    let ctx = TestContext::new().await;
    let mut workflow = ctx.workflow("doctor-1");
    let mut recorder = ScriptedRecorder::new();

    workflow
        .start_recording(&mut recorder)
        .expect("Failed to start");
    recorder.feed(b"audio-bytes");
    workflow
        .finish_recording(&mut recorder)
        .await
        .expect("Finish failed");

    let draft_id = workflow.draft_id();
    workflow.back_to_recording().expect("Back failed");

    assert_eq!(workflow.step(), WorkflowStep::Recording);
    assert!(workflow.audio().is_none());
    assert_eq!(workflow.draft_id(), draft_id);
}

#[rocket::async_test]
async fn test_language_hint_validation() {
    let ctx = TestContext::new().await;
    let mut workflow = ctx.workflow("doctor-1");

    workflow.set_language(Some("en")).expect("en rejected");
    workflow.set_language(None).expect("auto-detect rejected");

    let result = workflow.set_language(Some("xx"));
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[rocket::async_test]
async fn test_transcribe_and_analyze_populates_fields() {
    let ctx = TestContext::new().await;
    let mut workflow = ctx.workflow("doctor-1");

    workflow
        .accept_file(clip(b"fake-mp3", "audio/mp3"))
        .expect("Upload rejected");
    workflow.set_language(Some("en")).expect("Language rejected");

    workflow
        .transcribe_and_analyze()
        .await
        .expect("Transcribe & analyze failed");

    assert_eq!(workflow.step(), WorkflowStep::Complete);
    assert_eq!(workflow.transcript(), Some(DIARIZED_TRANSCRIPT));

    let analysis = workflow.analysis().expect("No analysis");
    assert_eq!(analysis.suggested_diagnosis, "Acute pharyngitis.");

    // Suggestions pre-populate the editable final fields.
    assert_eq!(workflow.fields.final_diagnosis, "Acute pharyngitis.");
    assert_eq!(
        workflow.fields.final_prescription,
        "Paracetamol 500mg three times daily."
    );

    // Usage minutes were reported for the current period.
    let usage = get_usage(&ctx.deps.pool, "doctor-1", None)
        .await
        .expect("Failed to fetch usage");
    assert_eq!(usage.len(), 1);
    assert!((usage[0].minutes_used - 2.5).abs() < f64::EPSILON);
}

#[rocket::async_test]
async fn test_transcription_failure_keeps_review_state() {
    let ctx = TestContext::new().await;
    let mut workflow = ctx.workflow("doctor-1");

    workflow
        .accept_file(clip(b"fake-mp3", "audio/mp3"))
        .expect("Upload rejected");

    ctx.transcriber.fail.store(true, Ordering::SeqCst);
    let result = workflow.transcribe_and_analyze().await;

    assert!(result.is_err());
    assert_eq!(workflow.step(), WorkflowStep::Review);
    assert!(workflow.transcript().is_none());
    assert!(workflow.analysis().is_none());
}

#[rocket::async_test]
async fn test_analysis_retry_does_not_retranscribe() {
    let ctx = TestContext::new().await;
    let mut workflow = ctx.workflow("doctor-1");

    workflow
        .accept_file(clip(b"fake-mp3", "audio/mp3"))
        .expect("Upload rejected");

    ctx.analyst.fail.store(true, Ordering::SeqCst);
    let result = workflow.transcribe_and_analyze().await;

    assert!(result.is_err());
    assert_eq!(workflow.step(), WorkflowStep::Review);
    // The transcript survives the analysis failure.
    assert_eq!(workflow.transcript(), Some(DIARIZED_TRANSCRIPT));
    assert_eq!(ctx.transcriber.calls.load(Ordering::SeqCst), 1);

    ctx.analyst.fail.store(false, Ordering::SeqCst);
    workflow
        .transcribe_and_analyze()
        .await
        .expect("Retry failed");

    assert_eq!(workflow.step(), WorkflowStep::Complete);
    // The retry reused the stored transcript.
    assert_eq!(ctx.transcriber.calls.load(Ordering::SeqCst), 1);
}

#[rocket::async_test]
async fn test_generate_document_validates_required_fields() {
    let ctx = TestContext::new().await;
    let mut workflow = ctx.workflow("doctor-1");

    workflow
        .accept_file(clip(b"fake-mp3", "audio/mp3"))
        .expect("Upload rejected");
    workflow
        .transcribe_and_analyze()
        .await
        .expect("Transcribe & analyze failed");

    // Name and age still missing.
    let result = workflow.generate_document().await;
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(workflow.step(), WorkflowStep::Complete);

    let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patient_sessions")
        .fetch_one(&ctx.deps.pool)
        .await
        .expect("Failed to count sessions");
    assert_eq!(sessions, 0);
}

#[rocket::async_test]
async fn test_full_flow_commits_session_and_cleans_draft() {
    let ctx = TestContext::new().await;
    let mut workflow = ctx.workflow("doctor-1");
    let mut recorder = ScriptedRecorder::new();

    workflow
        .start_recording(&mut recorder)
        .expect("Failed to start");
    recorder.feed(b"consultation-audio");
    workflow
        .finish_recording(&mut recorder)
        .await
        .expect("Finish failed");
    workflow
        .transcribe_and_analyze()
        .await
        .expect("Transcribe & analyze failed");

    workflow.fields.patient_name = "Jane Doe".to_string();
    workflow.set_patient_age("200");
    assert_eq!(workflow.fields.patient_age, "150");
    workflow.fields.treatment_plan = "Review in two weeks".to_string();

    let commit = workflow
        .generate_document()
        .await
        .expect("Document generation failed");

    assert!(commit.document_url.ends_with(".html"));
    assert!(workflow.draft_id().is_none());

    let session = get_session(&ctx.deps.pool, commit.session_id)
        .await
        .expect("Session missing");
    assert_eq!(session.name, "Jane Doe");
    assert_eq!(session.age, 150);
    assert_eq!(session.transcript, DIARIZED_TRANSCRIPT);
    assert_eq!(session.treatment_plan, "Review in two weeks");

    // The originating draft was promoted away.
    let drafts = list_drafts(&ctx.deps.pool, "doctor-1")
        .await
        .expect("Failed to list drafts");
    assert!(drafts.is_empty());

    // The rendered document was uploaded and carries the plan section.
    let document_key = ctx
        .store
        .keys()
        .into_iter()
        .find(|key| key.ends_with(".html"))
        .expect("No document uploaded");
    let html = ctx.store.object_text(&document_key).expect("No document body");
    assert!(html.contains(r#"<div class="section-title">Plan</div>"#));
    assert!(html.contains("Review in two weeks"));
}

#[rocket::async_test]
async fn test_commit_failure_leaves_workflow_in_complete() {
    let ctx = TestContext::new().await;
    let mut workflow = ctx.workflow("doctor-1");

    workflow
        .accept_file(clip(b"fake-mp3", "audio/mp3"))
        .expect("Upload rejected");
    workflow
        .transcribe_and_analyze()
        .await
        .expect("Transcribe & analyze failed");

    workflow.fields.patient_name = "Jane Doe".to_string();
    workflow.set_patient_age("45");

    ctx.store.fail.store(true, Ordering::SeqCst);
    let result = workflow.generate_document().await;

    assert!(result.is_err());
    assert_eq!(workflow.step(), WorkflowStep::Complete);

    // Nothing was committed; the user can retry.
    let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patient_sessions")
        .fetch_one(&ctx.deps.pool)
        .await
        .expect("Failed to count sessions");
    assert_eq!(sessions, 0);

    ctx.store.fail.store(false, Ordering::SeqCst);
    workflow.generate_document().await.expect("Retry failed");
}

#[rocket::async_test]
async fn test_clipboard_text_uses_current_fields() {
    let ctx = TestContext::new().await;
    let mut workflow = ctx.workflow("doctor-1");

    workflow
        .accept_file(clip(b"fake-mp3", "audio/mp3"))
        .expect("Upload rejected");
    workflow
        .transcribe_and_analyze()
        .await
        .expect("Transcribe & analyze failed");

    workflow.fields.patient_name = "Jane Doe".to_string();
    workflow.set_patient_age("45");

    let text = workflow.clipboard_text();

    assert!(text.starts_with("Patient: Jane Doe; Age: 45"));
    assert!(text.contains("Acute pharyngitis."));
    assert!(text.contains("Paracetamol 500mg three times daily."));
}

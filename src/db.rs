use chrono::Utc;
use sqlx::{Pool, QueryBuilder, Sqlite, SqliteConnection};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{
    DbDraft, DbPatientSession, DbUsageRecord, DbUserSettings, Draft, NewSession, PatientSession,
    SessionUpdate, UserSettings, UsageRecord,
};

#[instrument(skip(pool))]
pub async fn list_drafts(pool: &Pool<Sqlite>, user_id: &str) -> Result<Vec<Draft>, AppError> {
    info!("Listing drafts for user");
    let rows = sqlx::query_as::<_, DbDraft>(
        "SELECT id, user_id, audio_url, created_at, updated_at
         FROM draft_sessions
         WHERE user_id = ?
         ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Draft::from).collect())
}

#[instrument(skip(pool, audio_url))]
pub async fn create_draft(
    pool: &Pool<Sqlite>,
    user_id: &str,
    audio_url: &str,
) -> Result<i64, AppError> {
    info!("Creating draft");
    let now = Utc::now();
    let res = sqlx::query(
        "INSERT INTO draft_sessions (user_id, audio_url, created_at, updated_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(audio_url)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, audio_url))]
pub async fn update_draft(
    pool: &Pool<Sqlite>,
    draft_id: i64,
    user_id: &str,
    audio_url: &str,
) -> Result<(), AppError> {
    info!("Updating draft audio");
    let now = Utc::now();
    let res = sqlx::query(
        "UPDATE draft_sessions
         SET audio_url = ?, updated_at = ?
         WHERE id = ? AND user_id = ?",
    )
    .bind(audio_url)
    .bind(now)
    .bind(draft_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Draft with id {} not found",
            draft_id
        )));
    }

    Ok(())
}

/// Creates the session row, its ownership link and the optional draft
/// cleanup as one transaction. Any failure rolls the whole transaction back
/// before the error propagates, so a session row is never visible without
/// an owner.
#[instrument(skip(pool, new, document_url))]
pub async fn create_session(
    pool: &Pool<Sqlite>,
    new: &NewSession,
    document_url: &str,
) -> Result<i64, AppError> {
    info!("Creating patient session");
    let mut tx = pool.begin().await?;

    match insert_session_with_owner(&mut tx, new, document_url).await {
        Ok(session_id) => {
            tx.commit().await?;
            Ok(session_id)
        }
        Err(e) => {
            tx.rollback().await.ok();
            Err(e)
        }
    }
}

async fn insert_session_with_owner(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    new: &NewSession,
    document_url: &str,
) -> Result<i64, AppError> {
    let now = Utc::now();
    let res = sqlx::query(
        "INSERT INTO patient_sessions (
             name, age, transcript, summary,
             suggested_diagnosis, suggested_prescription,
             final_diagnosis, final_prescription,
             examination_results, treatment_plan, doctor_notes,
             document_url, created_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&new.patient_name)
    .bind(new.patient_age)
    .bind(&new.transcript)
    .bind(&new.summary)
    .bind(&new.suggested_diagnosis)
    .bind(&new.suggested_prescription)
    .bind(&new.final_diagnosis)
    .bind(&new.final_prescription)
    .bind(&new.examination_results)
    .bind(&new.treatment_plan)
    .bind(&new.doctor_notes)
    .bind(document_url)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    let session_id = res.last_insert_rowid();

    sqlx::query("INSERT INTO user_sessions (user_id, session_id) VALUES (?, ?)")
        .bind(&new.user_id)
        .bind(session_id)
        .execute(&mut **tx)
        .await?;

    // Promotion deletes the draft rather than linking it. Scoped to the
    // owning user so a mismatched id deletes nothing.
    if let Some(draft_id) = new.draft_id {
        sqlx::query("DELETE FROM draft_sessions WHERE id = ? AND user_id = ?")
            .bind(draft_id)
            .bind(&new.user_id)
            .execute(&mut **tx)
            .await?;
    }

    Ok(session_id)
}

#[instrument(skip(pool))]
pub async fn list_sessions(
    pool: &Pool<Sqlite>,
    user_id: &str,
) -> Result<Vec<PatientSession>, AppError> {
    info!("Listing sessions for user");
    let rows = sqlx::query_as::<_, DbPatientSession>(
        "SELECT ps.id, ps.name, ps.age, ps.transcript, ps.summary,
                ps.suggested_diagnosis, ps.suggested_prescription,
                ps.final_diagnosis, ps.final_prescription,
                ps.examination_results, ps.treatment_plan, ps.doctor_notes,
                ps.document_url, ps.created_at
         FROM patient_sessions ps
         JOIN user_sessions us ON ps.id = us.session_id
         WHERE us.user_id = ?
         ORDER BY ps.created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(PatientSession::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_session(pool: &Pool<Sqlite>, id: i64) -> Result<PatientSession, AppError> {
    info!("Fetching session by id");
    fetch_session(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Session with id {} not found", id)))
}

async fn fetch_session<'e, E>(executor: E, id: i64) -> Result<Option<PatientSession>, AppError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, DbPatientSession>(
        "SELECT id, name, age, transcript, summary,
                suggested_diagnosis, suggested_prescription,
                final_diagnosis, final_prescription,
                examination_results, treatment_plan, doctor_notes,
                document_url, created_at
         FROM patient_sessions
         WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(PatientSession::from))
}

pub async fn get_session_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    id: i64,
) -> Result<PatientSession, AppError> {
    fetch_session(&mut **tx, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Session with id {} not found", id)))
}

/// Applies a structured partial update: every `Some` field becomes one
/// assignment in a single parameterized UPDATE. A no-op update is skipped.
pub async fn apply_session_update(
    conn: &mut SqliteConnection,
    id: i64,
    update: &SessionUpdate,
) -> Result<(), AppError> {
    if update.is_empty() {
        return Ok(());
    }

    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE patient_sessions SET ");
    {
        let mut assignments = builder.separated(", ");
        if let Some(transcript) = &update.transcript {
            assignments
                .push("transcript = ")
                .push_bind_unseparated(transcript);
        }
        if let Some(summary) = &update.summary {
            assignments
                .push("summary = ")
                .push_bind_unseparated(summary);
        }
        if let Some(examination_results) = &update.examination_results {
            assignments
                .push("examination_results = ")
                .push_bind_unseparated(examination_results);
        }
        if let Some(final_diagnosis) = &update.final_diagnosis {
            assignments
                .push("final_diagnosis = ")
                .push_bind_unseparated(final_diagnosis);
        }
        if let Some(final_prescription) = &update.final_prescription {
            assignments
                .push("final_prescription = ")
                .push_bind_unseparated(final_prescription);
        }
        if let Some(treatment_plan) = &update.treatment_plan {
            assignments
                .push("treatment_plan = ")
                .push_bind_unseparated(treatment_plan);
        }
        if let Some(doctor_notes) = &update.doctor_notes {
            assignments
                .push("doctor_notes = ")
                .push_bind_unseparated(doctor_notes);
        }
    }
    builder.push(" WHERE id = ").push_bind(id);

    builder.build().execute(conn).await?;

    Ok(())
}

pub async fn set_document_url(
    conn: &mut SqliteConnection,
    id: i64,
    document_url: &str,
) -> Result<(), AppError> {
    sqlx::query("UPDATE patient_sessions SET document_url = ? WHERE id = ?")
        .bind(document_url)
        .bind(id)
        .execute(conn)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_session(
    pool: &Pool<Sqlite>,
    id: i64,
    user_id: &str,
) -> Result<(), AppError> {
    info!("Deleting session");
    // Ownership is checked through the link table; link rows cascade.
    let res = sqlx::query(
        "DELETE FROM patient_sessions
         WHERE id = ?
           AND id IN (SELECT session_id FROM user_sessions WHERE user_id = ?)",
    )
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(
            "Session not found or access denied".to_string(),
        ));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_settings(
    pool: &Pool<Sqlite>,
    user_id: &str,
) -> Result<Option<UserSettings>, AppError> {
    info!("Fetching user settings");
    let row = sqlx::query_as::<_, DbUserSettings>(
        "SELECT clinic_prompt, summary_prompt FROM user_settings WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(UserSettings::from))
}

#[instrument(skip(pool, clinic_prompt, summary_prompt))]
pub async fn upsert_settings(
    pool: &Pool<Sqlite>,
    user_id: &str,
    clinic_prompt: &str,
    summary_prompt: &str,
) -> Result<(), AppError> {
    info!("Upserting user settings");
    sqlx::query(
        "INSERT INTO user_settings (user_id, clinic_prompt, summary_prompt)
         VALUES (?, ?, ?)
         ON CONFLICT (user_id)
         DO UPDATE SET clinic_prompt = excluded.clinic_prompt,
                       summary_prompt = excluded.summary_prompt",
    )
    .bind(user_id)
    .bind(clinic_prompt)
    .bind(summary_prompt)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn record_usage(
    pool: &Pool<Sqlite>,
    user_id: &str,
    year: i64,
    month: i64,
    minutes: f64,
) -> Result<(), AppError> {
    info!(minutes = %minutes, "Recording transcription usage");
    sqlx::query(
        "INSERT INTO transcription_usage (user_id, year, month, minutes_used)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (user_id, year, month)
         DO UPDATE SET minutes_used = minutes_used + excluded.minutes_used",
    )
    .bind(user_id)
    .bind(year)
    .bind(month)
    .bind(minutes)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_usage(
    pool: &Pool<Sqlite>,
    user_id: &str,
    period: Option<(i64, i64)>,
) -> Result<Vec<UsageRecord>, AppError> {
    info!("Fetching transcription usage");
    let rows = match period {
        Some((year, month)) => {
            sqlx::query_as::<_, DbUsageRecord>(
                "SELECT year, month, minutes_used
                 FROM transcription_usage
                 WHERE user_id = ? AND year = ? AND month = ?",
            )
            .bind(user_id)
            .bind(year)
            .bind(month)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, DbUsageRecord>(
                "SELECT year, month, minutes_used
                 FROM transcription_usage
                 WHERE user_id = ?
                 ORDER BY year DESC, month DESC",
            )
            .bind(user_id)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows.into_iter().map(UsageRecord::from).collect())
}

#[macro_use]
extern crate rocket;

mod api;
mod db;
mod document;
mod env;
mod error;
mod gateway;
mod models;
mod storage;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;
mod workflow;

use std::str::FromStr;
use std::sync::Arc;

use rocket::{Build, Rocket};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use tracing::{error, info};

use api::{
    api_analyze_transcript, api_create_draft, api_create_session, api_delete_session,
    api_get_session, api_get_settings, api_get_usage, api_list_drafts, api_list_sessions,
    api_record_usage, api_save_settings, api_update_draft, api_update_session, bad_request,
    health, internal_error, not_found, unprocessable_entity,
};
use env::AppConfig;
use error::AppError;
use gateway::{ChatCompletionGateway, ElevenLabsGateway};
use storage::{ObjectStore, R2Store};
use telemetry::{init_tracing, TelemetryFairing};
use workflow::WorkflowDeps;

#[launch]
async fn rocket() -> _ {
    init_tracing();

    if let Err(e) = env::load_environment() {
        error!("Failed to load environment files: {}", e);
    }

    let config = AppConfig::from_env().expect("Invalid configuration");

    let options = SqliteConnectOptions::from_str(&config.database_url)
        .expect("Invalid DATABASE_URL")
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(options)
        .await
        .expect("Failed to connect to SQLite database");

    info!("Running database migrations...");
    match sqlx::migrate!("./migrations").run(&pool).await {
        Ok(_) => info!("Migrations completed successfully"),
        Err(e) => {
            error!("Failed to run migrations: {}", e);
            panic!("Database migration failed: {}", e);
        }
    }

    let deps = build_deps(pool, &config).expect("Failed to construct service gateways");

    init_rocket(deps).await
}

/// Builds the injected collaborator set: object store, transcription and
/// analysis gateways, all sharing the one pool opened at startup.
pub fn build_deps(pool: SqlitePool, config: &AppConfig) -> Result<WorkflowDeps, AppError> {
    let store: Arc<dyn ObjectStore> = Arc::new(R2Store::new(config.r2.clone()));

    let transcriber = Arc::new(ElevenLabsGateway::new(
        config.elevenlabs_base_url.clone(),
        config.elevenlabs_api_key.clone(),
    )?);

    let analyst = Arc::new(ChatCompletionGateway::new(
        config.deepseek_base_url.clone(),
        config.deepseek_api_key.clone(),
        config.deepseek_model.clone(),
    )?);

    Ok(WorkflowDeps {
        pool,
        store,
        transcriber,
        analyst,
    })
}

pub async fn init_rocket(deps: WorkflowDeps) -> Rocket<Build> {
    info!("Starting clinic scribe");

    rocket::build()
        .manage(deps)
        .mount(
            "/api",
            routes![
                api_list_drafts,
                api_create_draft,
                api_update_draft,
                api_list_sessions,
                api_create_session,
                api_get_session,
                api_update_session,
                api_delete_session,
                api_analyze_transcript,
                api_get_settings,
                api_save_settings,
                api_get_usage,
                api_record_usage,
                health,
            ],
        )
        .register(
            "/api",
            catchers![bad_request, not_found, unprocessable_entity, internal_error],
        )
        .attach(TelemetryFairing)
}

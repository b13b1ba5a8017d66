use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use rocket::local::asynchronous::Client;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::error::AppError;
use crate::gateway::analysis::parse_analysis;
use crate::gateway::{Analysis, AnalysisGateway, PromptSet, Transcription, TranscriptionGateway};
use crate::init_rocket;
use crate::storage::{public_url, ObjectStore};
use crate::workflow::{AudioClip, Recorder, SessionWorkflow, WorkflowDeps};

static INIT: Once = Once::new();

pub const TEST_PUBLIC_BASE: &str = "https://cdn.example.com";

pub const MODEL_RESPONSE: &str = "Summary: Patient reports a sore throat and mild fever.\nDiagnosis: Acute pharyngitis.\nPrescription: Paracetamol 500mg three times daily.";

pub const DIARIZED_TRANSCRIPT: &str =
    "Speaker 0: What brings you in today?\n\nSpeaker 1: I have had a sore throat for three days.";

/// In-memory object store recording every upload. `fail` simulates an
/// unavailable store.
pub struct FakeStore {
    pub objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    pub fail: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn object_text(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(bytes, _)| String::from_utf8_lossy(bytes).to_string())
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, AppError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::ExternalService(
                "Object store unavailable".to_string(),
            ));
        }

        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (bytes, content_type.to_string()));

        Ok(public_url(TEST_PUBLIC_BASE, key))
    }
}

/// Canned transcription gateway counting its calls.
pub struct FakeTranscriber {
    pub transcript: String,
    pub minutes: f64,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl FakeTranscriber {
    pub fn new() -> Self {
        Self {
            transcript: DIARIZED_TRANSCRIPT.to_string(),
            minutes: 2.5,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TranscriptionGateway for FakeTranscriber {
    async fn transcribe(
        &self,
        _audio: &[u8],
        _mime: &str,
        _language: Option<&str>,
    ) -> Result<Transcription, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::ExternalService(
                "Transcription service unavailable".to_string(),
            ));
        }

        Ok(Transcription {
            transcript: self.transcript.clone(),
            audio_minutes: self.minutes,
        })
    }
}

/// Canned analysis gateway. Parses its configured raw model response with
/// the production parser and records every system prompt it sees.
pub struct FakeAnalyst {
    pub response: Mutex<String>,
    pub seen_prompts: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl FakeAnalyst {
    pub fn new() -> Self {
        Self {
            response: Mutex::new(MODEL_RESPONSE.to_string()),
            seen_prompts: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_response(&self, response: &str) {
        *self.response.lock().unwrap() = response.to_string();
    }
}

#[async_trait]
impl AnalysisGateway for FakeAnalyst {
    async fn analyze(&self, _transcript: &str, prompts: &PromptSet) -> Result<Analysis, AppError> {
        self.seen_prompts
            .lock()
            .unwrap()
            .push(prompts.system_prompt());

        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::ExternalService(
                "Analysis service unavailable".to_string(),
            ));
        }

        let response = self.response.lock().unwrap().clone();
        Ok(parse_analysis(&response))
    }
}

/// Scripted capture device for workflow tests: feed bytes between recorder
/// calls to simulate speech.
pub struct ScriptedRecorder {
    pub started: bool,
    pub paused: bool,
    captured: Vec<u8>,
    mime: String,
}

impl ScriptedRecorder {
    pub fn new() -> Self {
        Self {
            started: false,
            paused: false,
            captured: Vec::new(),
            mime: "audio/webm".to_string(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.captured.extend_from_slice(bytes);
    }

    fn snapshot(&self) -> AudioClip {
        AudioClip {
            bytes: self.captured.clone(),
            mime: self.mime.clone(),
        }
    }
}

impl Recorder for ScriptedRecorder {
    fn start(&mut self) -> Result<(), AppError> {
        self.started = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<AudioClip, AppError> {
        self.paused = true;
        Ok(self.snapshot())
    }

    fn resume(&mut self) -> Result<(), AppError> {
        self.paused = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<AudioClip, AppError> {
        self.started = false;
        Ok(self.snapshot())
    }
}

/// One isolated application instance: in-memory database with migrations
/// applied, fake gateways and store, and the same dependency bundle the
/// real process injects.
pub struct TestContext {
    pub deps: WorkflowDeps,
    pub store: Arc<FakeStore>,
    pub transcriber: Arc<FakeTranscriber>,
    pub analyst: Arc<FakeAnalyst>,
}

impl TestContext {
    pub async fn new() -> Self {
        INIT.call_once(|| {
            let _ = env_logger::builder()
                .parse_filters("debug")
                .is_test(true)
                .try_init();
        });

        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .expect("Invalid test database URL")
            .foreign_keys(true);

        // One connection keeps the in-memory database shared across queries.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .expect("Failed to create in-memory database");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        let store = Arc::new(FakeStore::new());
        let transcriber = Arc::new(FakeTranscriber::new());
        let analyst = Arc::new(FakeAnalyst::new());

        let deps = WorkflowDeps {
            pool,
            store: store.clone(),
            transcriber: transcriber.clone(),
            analyst: analyst.clone(),
        };

        Self {
            deps,
            store,
            transcriber,
            analyst,
        }
    }

    pub fn workflow(&self, user_id: &str) -> SessionWorkflow {
        SessionWorkflow::new(self.deps.clone(), user_id)
    }
}

pub async fn setup_test_client(ctx: &TestContext) -> Client {
    Client::tracked(init_rocket(ctx.deps.clone()).await)
        .await
        .expect("valid rocket instance")
}

pub fn audio_data_url(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    format!("data:audio/webm;base64,{}", BASE64.encode(bytes))
}

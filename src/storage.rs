//! Object-store boundary. Rendered documents and raw audio live at
//! deterministic keys under a public base URL.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::AppError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads `bytes` at `key` and returns the public URL of the object.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<String, AppError>;
}

#[derive(Clone)]
pub struct R2Config {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub public_base_url: String,
}

/// S3-compatible store backed by Cloudflare R2.
pub struct R2Store {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base_url: String,
}

impl R2Store {
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "clinic-scribe",
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .endpoint_url(format!(
                "https://{}.r2.cloudflarestorage.com",
                config.account_id
            ))
            .credentials_provider(credentials)
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket,
            public_base_url: config.public_base_url,
        }
    }
}

#[async_trait]
impl ObjectStore for R2Store {
    #[instrument(skip(self, bytes))]
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, AppError> {
        info!(size = bytes.len(), "Uploading object");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Failed to upload {}: {}", key, e)))?;

        Ok(public_url(&self.public_base_url, key))
    }
}

pub fn public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

/// `drafts/<user>/<millis>.<ext>` — one object per draft save.
pub fn draft_audio_key(user_id: &str, saved_at_millis: i64, mime: &str) -> String {
    format!(
        "drafts/{}/{}.{}",
        user_id,
        saved_at_millis,
        audio_extension(mime)
    )
}

/// `<uuid>.html` — documents generated at session creation.
pub fn new_document_key() -> String {
    format!("{}.html", Uuid::new_v4())
}

/// `documents/<user>/<session-id>.html` — documents re-rendered on edit.
pub fn session_document_key(user_id: &str, session_id: i64) -> String {
    format!("documents/{}/{}.html", user_id, session_id)
}

pub fn audio_extension(mime: &str) -> &'static str {
    // MIME may carry a codec suffix, e.g. "audio/webm;codecs=opus".
    match mime.split(';').next().unwrap_or_default().trim() {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" => "ogg",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "m4a",
        "audio/flac" => "flac",
        _ => "webm",
    }
}

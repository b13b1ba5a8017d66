use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::error::AppError;
use crate::storage::audio_extension;

/// Result of one speech-to-text call: the diarized transcript plus the
/// elapsed audio minutes for usage billing.
pub struct Transcription {
    pub transcript: String,
    pub audio_minutes: f64,
}

#[async_trait]
pub trait TranscriptionGateway: Send + Sync {
    async fn transcribe(
        &self,
        audio: &[u8],
        mime: &str,
        language: Option<&str>,
    ) -> Result<Transcription, AppError>;
}

/// Language hints offered for transcription. `None` means auto-detect.
pub struct LanguageOption {
    pub label: &'static str,
    pub code: Option<&'static str>,
}

pub const LANGUAGE_OPTIONS: &[LanguageOption] = &[
    LanguageOption { label: "Detect", code: None },
    LanguageOption { label: "English", code: Some("en") },
    LanguageOption { label: "Bahasa Malaysia", code: Some("ms") },
    LanguageOption { label: "Tamil", code: Some("ta") },
    LanguageOption { label: "Mandarin", code: Some("zh") },
    LanguageOption { label: "Hindi", code: Some("hi") },
    LanguageOption { label: "Cantonese", code: Some("yue") },
];

pub fn is_supported_language(code: &str) -> bool {
    LANGUAGE_OPTIONS
        .iter()
        .any(|option| option.code == Some(code))
}

#[derive(Debug, Deserialize)]
struct SpeechToTextResponse {
    #[serde(default)]
    words: Vec<TranscriptWord>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TranscriptWord {
    #[serde(default)]
    pub text: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub speaker_id: Option<String>,
    #[serde(default)]
    pub end: Option<f64>,
}

/// Diarizing speech-to-text client.
pub struct ElevenLabsGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

pub const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";

impl ElevenLabsGateway {
    pub fn new(base_url: String, api_key: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl TranscriptionGateway for ElevenLabsGateway {
    #[instrument(skip_all, fields(language))]
    async fn transcribe(
        &self,
        audio: &[u8],
        mime: &str,
        language: Option<&str>,
    ) -> Result<Transcription, AppError> {
        info!(size = audio.len(), "Requesting transcription");

        let part = multipart::Part::bytes(audio.to_vec())
            .file_name(format!("recording.{}", audio_extension(mime)))
            .mime_str(mime)
            .map_err(|e| AppError::Validation(format!("Invalid audio MIME type: {}", e)))?;

        let mut form = multipart::Form::new()
            .part("file", part)
            .text("model_id", "scribe_v1")
            .text("diarize", "true");

        if let Some(code) = language {
            form = form.text("language_code", code.to_string());
        }

        let response = self
            .client
            .post(format!("{}/v1/speech-to-text", self.base_url))
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Transcription service returned {}: {}",
                status, body
            )));
        }

        let parsed: SpeechToTextResponse = response.json().await?;

        let audio_minutes = parsed
            .words
            .last()
            .and_then(|word| word.end)
            .unwrap_or(0.0)
            / 60.0;

        Ok(Transcription {
            transcript: assemble_transcript(&parsed.words),
            audio_minutes,
        })
    }
}

/// Merges the speaker-tagged word list into `Speaker <id>: <utterance>`
/// blocks. A turn runs until the speaker tag changes; spacing entries are
/// skipped.
pub(crate) fn assemble_transcript(words: &[TranscriptWord]) -> String {
    struct Segment {
        speaker_id: String,
        speech: String,
    }

    let mut segments: Vec<Segment> = Vec::new();
    let mut current_speaker = words
        .first()
        .and_then(|word| word.speaker_id.clone())
        .unwrap_or_default();
    let mut current_speech = String::new();

    for word in words {
        if word.kind == "spacing" {
            continue;
        }

        let speaker = word.speaker_id.clone().unwrap_or_default();
        if speaker != current_speaker {
            if !current_speech.trim().is_empty() {
                segments.push(Segment {
                    speaker_id: current_speaker,
                    speech: current_speech.trim().to_string(),
                });
            }
            current_speaker = speaker;
            current_speech = word.text.clone();
        } else {
            if !current_speech.is_empty() {
                current_speech.push(' ');
            }
            current_speech.push_str(&word.text);
        }
    }

    if !current_speech.trim().is_empty() {
        segments.push(Segment {
            speaker_id: current_speaker,
            speech: current_speech.trim().to_string(),
        });
    }

    segments
        .iter()
        .map(|segment| format!("Speaker {}: {}", segment.speaker_id, segment.speech))
        .collect::<Vec<_>>()
        .join("\n\n")
}

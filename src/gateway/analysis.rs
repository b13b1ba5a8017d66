use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::UserSettings;

/// Suggestions extracted from the model reply. Missing sections carry their
/// placeholder text rather than failing the call.
#[derive(Clone)]
pub struct Analysis {
    pub summary: String,
    pub suggested_diagnosis: String,
    pub suggested_prescription: String,
}

pub const NO_SUMMARY: &str = "No summary available";
pub const NO_DIAGNOSIS: &str = "No diagnosis suggestion available";
pub const NO_PRESCRIPTION: &str = "No prescription suggestion available";

#[async_trait]
pub trait AnalysisGateway: Send + Sync {
    async fn analyze(&self, transcript: &str, prompts: &PromptSet) -> Result<Analysis, AppError>;
}

const DEFAULT_CLINIC_PROMPT: &str = "You are a medical assistant AI. Analyze the following doctor-patient conversation and provide a diagnosis and prescription. Be professional and return in point form, only containing necessary information. The doctor and patient are not labeled so you would need to identify which is which. Sometimes, multiple languages may be present but you only need to return results in English, translate as necessary.";

const DEFAULT_SUMMARY_PROMPT: &str = "You are a medical assistant AI. Analyze the following doctor-patient conversation and provide a concise summary. Be professional and summarize only critical information. The doctor and patient are not labeled so you would need to identify which is which. There may be multiple patients. Sometimes, multiple languages may be present but you only need to return results in English, translate as necessary.";

const FORMAT_INSTRUCTION: &str = "Please provide the summary, diagnosis and prescription in the following format: Summary: <summary>\nDiagnosis: <diagnosis>\nPrescription: <prescription>";

/// The two prompt templates driving one analysis call, already combined
/// with the user's configured clinic profile and summary instructions.
pub struct PromptSet {
    pub clinic_prompt: String,
    pub summary_prompt: String,
}

impl PromptSet {
    /// Builds the prompts for a user. Absent or empty settings fall back to
    /// the fixed defaults; configured values are appended to them.
    pub fn for_user(settings: Option<&UserSettings>) -> Self {
        let mut clinic_prompt = DEFAULT_CLINIC_PROMPT.to_string();
        let mut summary_prompt = DEFAULT_SUMMARY_PROMPT.to_string();

        if let Some(settings) = settings {
            if !settings.clinic_prompt.is_empty() {
                clinic_prompt = format!(
                    "{} Here is a clinic profile to help you better diagnose and prescribe: {}",
                    DEFAULT_CLINIC_PROMPT, settings.clinic_prompt
                );
            }
            if !settings.summary_prompt.is_empty() {
                summary_prompt = format!(
                    "{} Below are instructions for the summary: {}",
                    DEFAULT_SUMMARY_PROMPT, settings.summary_prompt
                );
            }
        }

        Self {
            clinic_prompt,
            summary_prompt,
        }
    }

    /// The single system message sent to the model. The format instruction
    /// goes last so the section markers are always requested.
    pub fn system_prompt(&self) -> String {
        format!(
            "{}\n\n{}\n\n{}",
            self.clinic_prompt, self.summary_prompt, FORMAT_INSTRUCTION
        )
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_MODEL: &str = "deepseek-chat";

/// OpenAI-compatible chat-completion client.
pub struct ChatCompletionGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionGateway {
    pub fn new(base_url: String, api_key: String, model: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl AnalysisGateway for ChatCompletionGateway {
    #[instrument(skip_all)]
    async fn analyze(&self, transcript: &str, prompts: &PromptSet) -> Result<Analysis, AppError> {
        info!("Requesting transcript analysis");

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: prompts.system_prompt(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: transcript.to_string(),
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Analysis service returned {}: {}",
                status, body
            )));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let content = parsed
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .unwrap_or_default();

        Ok(parse_analysis(content))
    }
}

static SUMMARY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)Summary:(.*?)(?:Diagnosis:|$)").unwrap());
static DIAGNOSIS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)Diagnosis:(.*?)(?:Prescription:|$)").unwrap());
static PRESCRIPTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)Prescription:(.*)$").unwrap());

/// Extracts the three sections from the model reply using the fixed
/// markers. A missing section yields its placeholder.
pub fn parse_analysis(response: &str) -> Analysis {
    let extract = |pattern: &Regex, fallback: &str| {
        pattern
            .captures(response)
            .and_then(|captures| captures.get(1))
            .map(|section| section.as_str().trim().to_string())
            .filter(|section| !section.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    };

    Analysis {
        summary: extract(&SUMMARY_PATTERN, NO_SUMMARY),
        suggested_diagnosis: extract(&DIAGNOSIS_PATTERN, NO_DIAGNOSIS),
        suggested_prescription: extract(&PRESCRIPTION_PATTERN, NO_PRESCRIPTION),
    }
}

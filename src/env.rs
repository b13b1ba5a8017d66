use std::path::Path;

use tracing::{info, warn};

use crate::gateway::analysis::{DEEPSEEK_BASE_URL, DEEPSEEK_MODEL};
use crate::gateway::transcription::ELEVENLABS_BASE_URL;
use crate::storage::R2Config;

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

/// Everything the process reads from the environment, gathered once at
/// startup. Gateways and the object store are constructed from this and
/// injected; nothing reads environment variables afterwards.
pub struct AppConfig {
    pub database_url: String,
    pub elevenlabs_base_url: String,
    pub elevenlabs_api_key: String,
    pub deepseek_base_url: String,
    pub deepseek_api_key: String,
    pub deepseek_model: String,
    pub r2: R2Config,
}

fn required(name: &str) -> Result<String, anyhow::Error> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("{} environment variable not set", name))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            elevenlabs_base_url: optional("ELEVENLABS_BASE_URL", ELEVENLABS_BASE_URL),
            elevenlabs_api_key: required("ELEVENLABS_API_KEY")?,
            deepseek_base_url: optional("DEEPSEEK_BASE_URL", DEEPSEEK_BASE_URL),
            deepseek_api_key: required("DEEPSEEK_API_KEY")?,
            deepseek_model: optional("DEEPSEEK_MODEL", DEEPSEEK_MODEL),
            r2: R2Config {
                account_id: required("CLOUDFLARE_ACCOUNT_ID")?,
                access_key_id: required("R2_ACCESS_KEY_ID")?,
                secret_access_key: required("R2_SECRET_ACCESS_KEY")?,
                bucket: required("R2_BUCKET_NAME")?,
                public_base_url: required("R2_PUBLIC_DOMAIN")?,
            },
        })
    }
}

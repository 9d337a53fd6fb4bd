//! Explicit, validated-once application configuration (spec §6.4).
//!
//! Replaces the teacher's scattered `env::var(...).unwrap_or_else(...)`
//! calls (see `rate_limit.rs::RateLimitConfig::from_env`) with a single
//! struct built once at process startup and passed into every component's
//! constructor, per REDESIGN FLAGS §9.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub kv_url: Option<String>,

    pub meta_app_secret: String,
    pub ig_verify_token: String,

    pub manychat_api_key: Option<String>,
    pub manychat_webhook_secret: Option<String>,

    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_base_url: String,

    pub encryption_key_hex: String,

    pub cors_origins: Vec<String>,

    pub worker_concurrency: usize,
    pub per_tenant_concurrency: usize,

    pub window_hours: i64,
    pub window_grace_minutes: i64,

    pub circuit_fail_threshold: u32,
    pub circuit_cooldown: Duration,

    pub production: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),
    #[error("malformed configuration for {0}: {1}")]
    Malformed(&'static str, String),
    #[error("CORS_ORIGINS is empty — refusing to start with an open/undefined CORS policy")]
    EmptyCors,
}

fn var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn var_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.is_empty())
}

fn var_parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|_| ConfigError::Malformed(name, v)),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Build configuration from the process environment, validating
    /// presence and well-formedness of every required option. Aborts the
    /// process with a readable report on failure (spec §6.4).
    pub fn from_env() -> Result<Self, ConfigError> {
        let encryption_key_hex = var("ENCRYPTION_KEY_HEX")?;
        let key_bytes = hex::decode(&encryption_key_hex)
            .map_err(|e| ConfigError::Malformed("ENCRYPTION_KEY_HEX", e.to_string()))?;
        if key_bytes.len() != 32 {
            return Err(ConfigError::Malformed(
                "ENCRYPTION_KEY_HEX",
                format!("expected 32 bytes (256 bits), got {}", key_bytes.len()),
            ));
        }

        let cors_raw = var("CORS_ORIGINS")?;
        let cors_origins: Vec<String> = cors_raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if cors_origins.is_empty() {
            return Err(ConfigError::EmptyCors);
        }

        Ok(AppConfig {
            database_path: env::var("DATABASE_URL").unwrap_or_else(|_| "data/relay.db".into()),
            kv_url: var_opt("KV_URL"),

            meta_app_secret: var("META_APP_SECRET")?,
            ig_verify_token: var("IG_VERIFY_TOKEN")?,

            manychat_api_key: var_opt("MANYCHAT_API_KEY"),
            manychat_webhook_secret: var_opt("MANYCHAT_WEBHOOK_SECRET"),

            llm_api_key: var("LLM_API_KEY")?,
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),

            encryption_key_hex,
            cors_origins,

            worker_concurrency: var_parsed("WORKER_CONCURRENCY", 8usize)?,
            per_tenant_concurrency: var_parsed("PER_TENANT_CONCURRENCY", 16usize)?,

            window_hours: var_parsed("WINDOW_HOURS", 24i64)?,
            window_grace_minutes: var_parsed("WINDOW_GRACE_MINUTES", 5i64)?,

            circuit_fail_threshold: var_parsed("CIRCUIT_FAIL_THRESHOLD", 5u32)?,
            circuit_cooldown: Duration::from_secs(var_parsed("CIRCUIT_COOLDOWN_SECONDS", 30u64)?),

            production: env::var("ROCKET_PROFILE").map(|p| p == "release").unwrap_or(false),
        })
    }

    /// Build a config suitable for tests: no real secrets required, all
    /// defaults, isolated temp database. Not `#[cfg(test)]`-gated: the
    /// external `tests/integration.rs` binary compiles the library without
    /// `--cfg test`, so this has to be an ordinary `pub` function.
    pub fn for_test(db_path: &str) -> Self {
        AppConfig {
            database_path: db_path.to_string(),
            kv_url: None,
            meta_app_secret: "test-app-secret".into(),
            ig_verify_token: "test-verify-token".into(),
            manychat_api_key: None,
            manychat_webhook_secret: Some("test-manychat-secret".into()),
            llm_api_key: "test-llm-key".into(),
            llm_model: "gpt-4o-mini".into(),
            llm_base_url: "http://127.0.0.1:0".into(),
            encryption_key_hex: "00".repeat(32),
            cors_origins: vec!["http://localhost".into()],
            worker_concurrency: 2,
            per_tenant_concurrency: 4,
            window_hours: 24,
            window_grace_minutes: 5,
            circuit_fail_threshold: 5,
            circuit_cooldown: Duration::from_secs(30),
            production: false,
        }
    }
}

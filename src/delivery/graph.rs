//! C13 — Graph API Adapter: direct Instagram/Facebook Graph API sends,
//! with template fallback and tenant-serialized token refresh (spec §4.13).

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;

use crate::crypto::aead::AeadKey;
use crate::db::{credentials, TenantScope};
use crate::error::AppError;

const GRAPH_BASE_URL: &str = "https://graph.facebook.com/v19.0";

#[derive(Debug)]
pub enum GraphError {
    Transient(String),
    Terminal(String),
    /// 429/190-style token expiry: caller should refresh then retry once.
    TokenExpired,
}

pub struct SendOutcome {
    pub upstream_message_id: String,
    /// `X-App-Usage` / `X-Business-Use-Case-Usage` call_count percentage,
    /// forwarded to C6 by the caller (spec §4.13).
    pub usage_pct: Option<f64>,
}

pub struct GraphAdapter {
    http: reqwest::Client,
    refresh_locks: Mutex<HashMap<String, std::sync::Arc<AsyncMutex<()>>>>,
}

impl Default for GraphAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphAdapter {
    pub fn new() -> Self {
        GraphAdapter { http: reqwest::Client::new(), refresh_locks: Mutex::new(HashMap::new()) }
    }

    pub async fn send_text(
        &self,
        scope: &TenantScope,
        key: &AeadKey,
        recipient: &str,
        text: &str,
        idempotency_key: &str,
    ) -> Result<SendOutcome, GraphError> {
        let token = self.token_for(scope, key, "instagram")?;
        self.post_message(
            &token,
            &json!({"recipient": {"id": recipient}, "message": {"text": text}}),
            idempotency_key,
        )
        .await
    }

    /// Allowed outside the reply window (spec §4.11, §4.13).
    pub async fn send_template(
        &self,
        scope: &TenantScope,
        key: &AeadKey,
        recipient: &str,
        template_id: &str,
        params: &serde_json::Value,
        idempotency_key: &str,
    ) -> Result<SendOutcome, GraphError> {
        let token = self.token_for(scope, key, "instagram")?;
        self.post_message(
            &token,
            &json!({
                "recipient": {"id": recipient},
                "message": {"attachment": {"type": "template", "payload": {"template_id": template_id, "params": params}}},
            }),
            idempotency_key,
        )
        .await
    }

    fn token_for(&self, scope: &TenantScope, key: &AeadKey, platform: &str) -> Result<String, GraphError> {
        let bytes = credentials::decrypt_token(scope, key, platform)
            .map_err(|e: AppError| GraphError::Terminal(e.to_string()))?;
        String::from_utf8(bytes).map_err(|_| GraphError::Terminal("corrupt access token".into()))
    }

    async fn post_message(
        &self,
        access_token: &str,
        body: &serde_json::Value,
        idempotency_key: &str,
    ) -> Result<SendOutcome, GraphError> {
        let resp = self
            .http
            .post(format!("{GRAPH_BASE_URL}/me/messages"))
            .bearer_auth(access_token)
            .header("Idempotency-Key", idempotency_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GraphError::Transient(e.to_string()))?;

        let usage_pct = extract_usage_pct(&resp);

        if resp.status().as_u16() == 429 || resp.status().as_u16() == 190 {
            return Err(GraphError::TokenExpired);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(if status.is_server_error() {
                GraphError::Transient(format!("graph http {status}"))
            } else {
                GraphError::Terminal(format!("graph http {status}"))
            });
        }

        #[derive(Deserialize)]
        struct SendResponse {
            message_id: String,
        }
        let parsed: SendResponse = resp.json().await.map_err(|e| GraphError::Transient(e.to_string()))?;
        Ok(SendOutcome { upstream_message_id: parsed.message_id, usage_pct })
    }

    /// Serialized per tenant to avoid a thundering herd of concurrent
    /// refreshes for the same credential (spec §4.13).
    pub async fn refresh_token(&self, scope: &TenantScope, key: &AeadKey) -> Result<(), AppError> {
        let lock = {
            let mut locks = self.refresh_locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(scope.tenant_id().to_string())
                .or_insert_with(|| std::sync::Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        let cred = credentials::get(scope, "instagram")?;
        let current = key.open(&cred.encrypted_token)?;
        let http = &self.http;
        let resp = http
            .get(format!("{GRAPH_BASE_URL}/oauth/access_token"))
            .query(&[("grant_type", "fb_exchange_token"), ("fb_exchange_token", &String::from_utf8_lossy(&current))])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AppError::UpstreamTerminal(format!("token refresh failed: {}", resp.status())));
        }

        #[derive(Deserialize)]
        struct RefreshResponse {
            access_token: String,
        }
        let parsed: RefreshResponse = resp.json().await?;
        credentials::upsert(scope, key, "instagram", &cred.platform_account_id, parsed.access_token.as_bytes())?;
        Ok(())
    }
}

fn extract_usage_pct(resp: &reqwest::Response) -> Option<f64> {
    let header = resp
        .headers()
        .get("x-app-usage")
        .or_else(|| resp.headers().get("x-business-use-case-usage"))?;
    let raw = header.to_str().ok()?;
    let parsed: serde_json::Value = serde_json::from_str(raw).ok()?;
    parsed.get("call_count").and_then(|v| v.as_f64())
}

impl From<GraphError> for AppError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::Transient(msg) => AppError::UpstreamTransient(msg),
            GraphError::Terminal(msg) => AppError::UpstreamTerminal(msg),
            GraphError::TokenExpired => AppError::Auth("credential expired".into()),
        }
    }
}

//! C12 — ManyChat Adapter. Grounded on the teacher's `webhooks.rs` outbound
//! dispatcher (`reqwest::Client` + JSON POST + classified retry), extended
//! with the subscriber lookup/upsert/tagging surface C11 needs.

use serde::Deserialize;
use serde_json::json;

use crate::config::AppConfig;
use crate::error::AppError;

const BASE_URL: &str = "https://api.manychat.com";

pub struct ManyChatAdapter {
    http: reqwest::Client,
    api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubscriberRecord {
    pub subscriber_id: String,
    pub subscribed: bool,
}

#[derive(Debug)]
pub enum ManyChatError {
    /// Breaker-observable transient: 5xx, 429, or an open upstream.
    Transient(String),
    /// Not a breaker failure: bad subscriber, bad flow, unsubscribed, etc.
    Terminal(String),
}

impl ManyChatAdapter {
    pub fn new(config: &AppConfig) -> Self {
        ManyChatAdapter {
            http: reqwest::Client::new(),
            api_key: config.manychat_api_key.clone(),
        }
    }

    fn api_key(&self) -> Result<&str, ManyChatError> {
        self.api_key.as_deref().ok_or_else(|| ManyChatError::Terminal("manychat not configured for tenant".into()))
    }

    /// Returns the upstream message id on success.
    pub async fn send(
        &self,
        subscriber_ref: &str,
        content: &str,
        message_tag: &str,
        flow_id: Option<&str>,
        idempotency_key: &str,
    ) -> Result<String, ManyChatError> {
        let api_key = self.api_key()?;
        let resp = self
            .http
            .post(format!("{BASE_URL}/fb/sending/sendContent"))
            .bearer_auth(api_key)
            .header("Idempotency-Key", idempotency_key)
            .json(&json!({
                "subscriber_id": subscriber_ref,
                "message_tag": message_tag,
                "flow_ns": flow_id,
                "data": {"version": "v2", "content": {"messages": [{"type": "text", "text": content}]}},
            }))
            .send()
            .await
            .map_err(|e| ManyChatError::Transient(e.to_string()))?;

        classify_and_extract(resp).await
    }

    pub async fn lookup_subscriber(&self, platform_user_ref: &str) -> Result<SubscriberRecord, ManyChatError> {
        let api_key = self.api_key()?;
        #[derive(Deserialize)]
        struct LookupResponse {
            data: LookupData,
        }
        #[derive(Deserialize)]
        struct LookupData {
            id: String,
            subscribed: Option<String>,
        }

        let resp = self
            .http
            .get(format!("{BASE_URL}/fb/subscriber/findByCustomField"))
            .bearer_auth(api_key)
            .query(&[("field_id", "platform_user_ref"), ("field_value", platform_user_ref)])
            .send()
            .await
            .map_err(|e| ManyChatError::Transient(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(classify_status(resp.status()));
        }
        let parsed: LookupResponse = resp.json().await.map_err(|e| ManyChatError::Transient(e.to_string()))?;
        Ok(SubscriberRecord {
            subscriber_id: parsed.data.id,
            subscribed: parsed.data.subscribed.as_deref() == Some("subscribed"),
        })
    }

    pub async fn upsert_subscriber(&self, attributes: &serde_json::Value) -> Result<(), ManyChatError> {
        let api_key = self.api_key()?;
        let resp = self
            .http
            .post(format!("{BASE_URL}/fb/subscriber/createSubscriber"))
            .bearer_auth(api_key)
            .json(attributes)
            .send()
            .await
            .map_err(|e| ManyChatError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(classify_status(resp.status()));
        }
        Ok(())
    }

    pub async fn add_tags(&self, subscriber_id: &str, tags: &[String]) -> Result<(), ManyChatError> {
        let api_key = self.api_key()?;
        for tag in tags {
            let resp = self
                .http
                .post(format!("{BASE_URL}/fb/subscriber/addTag"))
                .bearer_auth(api_key)
                .json(&json!({"subscriber_id": subscriber_id, "tag_name": tag}))
                .send()
                .await
                .map_err(|e| ManyChatError::Transient(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(classify_status(resp.status()));
            }
        }
        Ok(())
    }
}

async fn classify_and_extract(resp: reqwest::Response) -> Result<String, ManyChatError> {
    if !resp.status().is_success() {
        return Err(classify_status(resp.status()));
    }
    #[derive(Deserialize)]
    struct SendResponse {
        message_id: Option<String>,
    }
    let parsed: SendResponse = resp.json().await.map_err(|e| ManyChatError::Transient(e.to_string()))?;
    parsed.message_id.ok_or_else(|| ManyChatError::Terminal("manychat response missing message_id".into()))
}

/// `rate_limited` is transient; `invalid_subscriber`/`policy_violation`-shaped
/// 4xxs are terminal (spec §4.12).
fn classify_status(status: reqwest::StatusCode) -> ManyChatError {
    if status.is_server_error() || status.as_u16() == 429 {
        ManyChatError::Transient(format!("manychat http {status}"))
    } else {
        ManyChatError::Terminal(format!("manychat http {status}"))
    }
}

impl From<ManyChatError> for AppError {
    fn from(e: ManyChatError) -> Self {
        match e {
            ManyChatError::Transient(msg) => AppError::UpstreamTransient(msg),
            ManyChatError::Terminal(msg) => AppError::UpstreamTerminal(msg),
        }
    }
}

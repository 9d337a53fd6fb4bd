//! Data model structs (spec §3). Plain serde structs per entity, same
//! convention as the teacher's `models.rs`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Trialing,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Trialing => "trialing",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "suspended" => TenantStatus::Suspended,
            "trialing" => TenantStatus::Trialing,
            _ => TenantStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub display_name: String,
    pub status: String,
    /// AI tone, language, working hours, templates, ManyChat settings.
    pub config: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    Whatsapp,
    Facebook,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::Whatsapp => "whatsapp",
            Platform::Facebook => "facebook",
        }
    }

    /// Canonical casing is always lowercase (spec §9 Open Question #1).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "instagram" => Some(Platform::Instagram),
            "whatsapp" => Some(Platform::Whatsapp),
            "facebook" => Some(Platform::Facebook),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub id: String,
    pub tenant_id: String,
    pub platform: String,
    pub platform_account_id: String,
    /// nonce || ciphertext || tag — never returned in cleartext outside
    /// `db::credentials`.
    pub encrypted_token: Vec<u8>,
    pub refresh_metadata: Option<serde_json::Value>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStage {
    Greeting,
    Discovery,
    Negotiation,
    Closing,
    Support,
    Resolved,
}

impl ConversationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStage::Greeting => "greeting",
            ConversationStage::Discovery => "discovery",
            ConversationStage::Negotiation => "negotiation",
            ConversationStage::Closing => "closing",
            ConversationStage::Support => "support",
            ConversationStage::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "discovery" => ConversationStage::Discovery,
            "negotiation" => ConversationStage::Negotiation,
            "closing" => ConversationStage::Closing,
            "support" => ConversationStage::Support,
            "resolved" => ConversationStage::Resolved,
            _ => ConversationStage::Greeting,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub tenant_id: String,
    pub customer_id: String,
    pub platform: String,
    pub stage: String,
    pub last_customer_message_at: Option<String>,
    pub last_outbound_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub direction: String,
    pub platform_message_id: Option<String>,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub ai_confidence: Option<f64>,
    pub ai_intent: Option<String>,
    pub processing_time_ms: Option<i64>,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: String,
    pub platform: String,
    pub received_at: String,
    pub status: String,
    pub raw_body_digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ProcessWebhook,
    GenerateReply,
    DeliverOutbound,
    FollowUp,
    Cleanup,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ProcessWebhook => "process_webhook",
            JobType::GenerateReply => "generate_reply",
            JobType::DeliverOutbound => "deliver_outbound",
            JobType::FollowUp => "follow_up",
            JobType::Cleanup => "cleanup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "process_webhook" => Some(JobType::ProcessWebhook),
            "generate_reply" => Some(JobType::GenerateReply),
            "deliver_outbound" => Some(JobType::DeliverOutbound),
            "follow_up" => Some(JobType::FollowUp),
            "cleanup" => Some(JobType::Cleanup),
            _ => None,
        }
    }

    /// Max attempts per type, spec §4.5.
    pub fn max_attempts(&self) -> u32 {
        match self {
            JobType::ProcessWebhook => 5,
            JobType::GenerateReply => 3,
            JobType::DeliverOutbound => 5,
            JobType::FollowUp => 8,
            JobType::Cleanup => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "low" => Priority::Low,
            "high" => Priority::High,
            "urgent" => Priority::Urgent,
            _ => Priority::Normal,
        }
    }

    /// Higher priority dequeues first; this rank sorts descending in SQL
    /// via `ORDER BY priority_rank DESC`.
    pub fn rank(&self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InFlight => "in_flight",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub tenant_id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub priority: String,
    pub attempt_count: u32,
    pub next_attempt_at: String,
    pub status: String,
    pub deadline_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Manychat,
    GraphDirect,
    TemplateFallback,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Manychat => "manychat",
            Channel::GraphDirect => "graph_direct",
            Channel::TemplateFallback => "template_fallback",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub id: String,
    pub job_id: String,
    pub conversation_id: String,
    pub channel: String,
    pub outcome: String,
    pub upstream_message_id: Option<String>,
    pub attempt_number: u32,
    pub latency_ms: i64,
    pub error_class: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: String,
    pub job_id: String,
    pub tenant_id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub last_error: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub actor_id: String,
    pub tenant_id: Option<String>,
    pub action: String,
    pub target: String,
    pub before_digest: Option<String>,
    pub after_digest: Option<String>,
    pub created_at: String,
}

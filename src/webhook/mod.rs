//! # Webhook Execution
//!
//! Types and client for executing a single webhook call ("Do") or a single
//! poll call ("Poll") against an externally described webhook.
//!
//! The webhook descriptor is owned by the Director and fetched fresh on every
//! reconcile; this module only renders its templates and performs the call.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::RequestObject;

pub mod client;
pub mod templates;

pub use client::DefaultWebhookClient;

/// Webhook descriptor fetched from the Director
///
/// Templates are opaque handlebars text rendered against the Operation's
/// request object (URL/input/headers) or the raw HTTP response
/// (output/status).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: String,
    pub mode: WebhookMode,
    /// Per-webhook timeout override (seconds)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Poll spacing for async webhooks (seconds)
    #[serde(default)]
    pub retry_interval_secs: Option<u64>,
    #[serde(default)]
    pub url_template: Option<String>,
    #[serde(default)]
    pub input_template: Option<String>,
    #[serde(default)]
    pub header_template: Option<String>,
    #[serde(default)]
    pub output_template: Option<String>,
    #[serde(default)]
    pub status_template: Option<String>,
    /// Header name the correlation id is injected under when the rendered
    /// headers don't already carry it
    #[serde(default)]
    pub correlation_id_key: Option<String>,
}

/// Invocation mode of a webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum WebhookMode {
    #[serde(alias = "SYNC")]
    Sync,
    #[serde(alias = "ASYNC")]
    Async,
}

/// A single webhook invocation
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub webhook: Webhook,
    pub request_object: RequestObject,
    pub correlation_id: String,
}

impl WebhookRequest {
    pub fn new(webhook: Webhook, request_object: RequestObject, correlation_id: String) -> Self {
        Self {
            webhook,
            request_object,
            correlation_id,
        }
    }
}

/// A single poll of a previously started async webhook
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub webhook: Webhook,
    pub request_object: RequestObject,
    pub correlation_id: String,
    pub poll_url: String,
}

impl PollRequest {
    pub fn new(
        webhook: Webhook,
        request_object: RequestObject,
        correlation_id: String,
        poll_url: String,
    ) -> Self {
        Self {
            webhook,
            request_object,
            correlation_id,
            poll_url,
        }
    }
}

/// Typed result of a successful "Do" call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    /// Poll URL for async webhooks; `None` for sync webhooks
    pub location: Option<String>,
}

/// Typed result of a successful "Poll" call
///
/// The raw status string is matched against the identifiers declared by the
/// descriptor's status template; anything not covered lands in `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded,
    Failed,
    InProgress,
    Unknown(String),
}

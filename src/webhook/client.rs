//! # Webhook Client
//!
//! Executes a single webhook invocation or poll over HTTP. Each call is
//! bounded by the remaining time until the per-call webhook deadline; an
//! expired deadline fails the call before any request is sent.
//!
//! Error classification: template and output-parsing failures are fatal,
//! the descriptor's declared gone status code maps to the gone kind, and
//! everything else (connect errors, unmet success status, an error string in
//! the rendered output) is transient.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::controller::reconciler::traits::WebhookClient;
use crate::errors::WebhookError;
use crate::webhook::templates;
use crate::webhook::{PollOutcome, PollRequest, WebhookMode, WebhookRequest, WebhookResponse};

/// Production webhook client backed by reqwest
#[derive(Debug, Clone)]
pub struct DefaultWebhookClient {
    http: reqwest::Client,
}

impl DefaultWebhookClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
        })
    }

    /// Build the outgoing header map from the rendered header template plus
    /// the correlation id, injected unless the rendered headers already
    /// carry it
    fn build_headers(
        rendered: BTreeMap<String, Vec<String>>,
        correlation_id_key: Option<&str>,
        correlation_id: &str,
    ) -> Result<HeaderMap, WebhookError> {
        let mut headers = HeaderMap::new();
        for (name, values) in &rendered {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| WebhookError::fatal(format!("invalid webhook header {name:?}: {e}")))?;
            for value in values {
                let header_value = HeaderValue::from_str(value).map_err(|e| {
                    WebhookError::fatal(format!("invalid webhook header value for {name:?}: {e}"))
                })?;
                headers.append(header_name.clone(), header_value);
            }
        }

        if let Some(key) = correlation_id_key {
            if !correlation_id.is_empty() && !rendered.contains_key(key) {
                let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                    WebhookError::fatal(format!("invalid correlation id header {key:?}: {e}"))
                })?;
                let header_value = HeaderValue::from_str(correlation_id).map_err(|e| {
                    WebhookError::fatal(format!("invalid correlation id value: {e}"))
                })?;
                headers.insert(header_name, header_value);
            }
        }

        Ok(headers)
    }

    /// Time left until the per-call deadline; an already-expired deadline is
    /// a transient failure the reconciler converts to webhook-timeout
    fn remaining(deadline: DateTime<Utc>) -> Result<Duration, WebhookError> {
        (deadline - Utc::now())
            .to_std()
            .map_err(|_| WebhookError::transient("webhook deadline already expired"))
    }

    /// Perform the HTTP exchange and capture status, headers, and JSON body
    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<String>,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<RawResponse, WebhookError> {
        let mut request = self.http.request(method, url).headers(headers).timeout(timeout);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WebhookError::transient(format!("unable to execute webhook request: {e}")))?;

        let status_code = response.status().as_u16();
        let mut header_map = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                header_map.insert(name.as_str().to_string(), value.to_string());
            }
        }
        let text = response
            .text()
            .await
            .map_err(|e| WebhookError::transient(format!("unable to read webhook response: {e}")))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);

        Ok(RawResponse {
            status_code,
            headers: header_map,
            body,
        })
    }
}

/// Captured HTTP response the output/status templates render against
#[derive(Debug, Clone)]
struct RawResponse {
    status_code: u16,
    headers: BTreeMap<String, String>,
    body: Value,
}

#[async_trait]
impl WebhookClient for DefaultWebhookClient {
    async fn do_request(
        &self,
        request: &WebhookRequest,
        deadline: DateTime<Utc>,
    ) -> Result<WebhookResponse, WebhookError> {
        let webhook = &request.webhook;
        let data = templates::request_data(&request.request_object);

        let url_spec = templates::render_url(webhook.url_template.as_deref(), &data)?;
        let body = templates::render_input(webhook.input_template.as_deref(), &data)?;
        let rendered_headers = templates::render_headers(webhook.header_template.as_deref(), &data)?;
        let headers = Self::build_headers(
            rendered_headers,
            webhook.correlation_id_key.as_deref(),
            &request.correlation_id,
        )?;
        let method = Method::from_bytes(url_spec.method.as_bytes())
            .map_err(|e| WebhookError::fatal(format!("invalid webhook method {:?}: {e}", url_spec.method)))?;

        let timeout = Self::remaining(deadline)?;
        let response = self
            .execute(method, &url_spec.path, Some(body), headers, timeout)
            .await?;

        let response_body = templates::response_data(&response.headers, &response.body);
        let output = templates::render_output(webhook.output_template.as_deref(), &response_body)?;

        if let Some(gone_status_code) = output.gone_status_code {
            if response.status_code == gone_status_code {
                return Err(WebhookError::gone(response.status_code));
            }
        }
        if let Some(error) = output.error.as_deref() {
            if !error.is_empty() {
                return Err(WebhookError::transient(format!(
                    "received error response from webhook: {error}"
                )));
            }
        }
        if response.status_code != output.success_status_code {
            return Err(WebhookError::transient(format!(
                "response success status code was not met: expected {}, got {}",
                output.success_status_code, response.status_code
            )));
        }

        let location = output.location.filter(|location| !location.is_empty());
        if webhook.mode == WebhookMode::Async && location.is_none() {
            return Err(WebhookError::transient(
                "missing location url after executing async webhook",
            ));
        }

        Ok(WebhookResponse { location })
    }

    async fn poll(
        &self,
        request: &PollRequest,
        deadline: DateTime<Utc>,
    ) -> Result<PollOutcome, WebhookError> {
        let webhook = &request.webhook;
        let data = templates::request_data(&request.request_object);

        let rendered_headers = templates::render_headers(webhook.header_template.as_deref(), &data)?;
        let headers = Self::build_headers(
            rendered_headers,
            webhook.correlation_id_key.as_deref(),
            &request.correlation_id,
        )?;

        let timeout = Self::remaining(deadline)?;
        let response = self
            .execute(Method::GET, &request.poll_url, None, headers, timeout)
            .await?;

        let response_body = templates::response_data(&response.headers, &response.body);
        let status = templates::render_status(webhook.status_template.as_deref(), &response_body)?;

        if let Some(error) = status.error.as_deref() {
            if !error.is_empty() {
                return Err(WebhookError::transient(format!(
                    "received error response while polling webhook: {error}"
                )));
            }
        }
        if response.status_code != status.success_status_code {
            return Err(WebhookError::transient(format!(
                "response success status code was not met: expected {}, got {}",
                status.success_status_code, response.status_code
            )));
        }

        let observed = status.status.unwrap_or_default();
        let outcome = if Some(observed.as_str()) == status.success_status_identifier.as_deref() {
            PollOutcome::Succeeded
        } else if Some(observed.as_str()) == status.failed_status_identifier.as_deref() {
            PollOutcome::Failed
        } else if Some(observed.as_str()) == status.in_progress_status_identifier.as_deref() {
            PollOutcome::InProgress
        } else {
            PollOutcome::Unknown(observed)
        };

        Ok(outcome)
    }
}

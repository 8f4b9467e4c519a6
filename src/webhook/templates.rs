//! # Descriptor Template Rendering
//!
//! Renders the webhook descriptor's handlebars templates and parses the
//! results into typed shapes. A template that fails to render or whose
//! rendered output is not the expected JSON is a fatal error: retrying the
//! call cannot fix a broken descriptor.
//!
//! Missing template values render as empty strings (the descriptor decides
//! which response headers/body fields exist), so absence of a value is
//! detected on the parsed result, not at render time.

use handlebars::Handlebars;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::crd::RequestObject;
use crate::errors::WebhookError;

/// Rendered URL template: HTTP method plus target path
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UrlSpec {
    pub method: String,
    pub path: String,
}

/// Rendered output template, evaluated against the "Do" response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedOutput {
    #[serde(default)]
    pub location: Option<String>,
    pub success_status_code: u16,
    #[serde(default)]
    pub gone_status_code: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Rendered status template, evaluated against the "Poll" response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedStatus {
    #[serde(default)]
    pub status: Option<String>,
    pub success_status_code: u16,
    #[serde(default)]
    pub success_status_identifier: Option<String>,
    #[serde(default)]
    pub in_progress_status_identifier: Option<String>,
    #[serde(default)]
    pub failed_status_identifier: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Data the request-side templates (URL/input/headers) render against
pub fn request_data(request_object: &RequestObject) -> Value {
    serde_json::json!({
        "tenantId": request_object.tenant_id,
        "headers": request_object.headers,
        "context": request_object.context,
    })
}

/// Data the response-side templates (output/status) render against
pub fn response_data(headers: &BTreeMap<String, String>, body: &Value) -> Value {
    serde_json::json!({
        "headers": headers,
        "body": body,
    })
}

/// Render the URL template into a method and path
pub fn render_url(url_template: Option<&str>, data: &Value) -> Result<UrlSpec, WebhookError> {
    let template =
        url_template.ok_or_else(|| WebhookError::fatal("missing webhook url template"))?;
    let rendered = render(template, data)
        .map_err(|e| WebhookError::fatal(format!("unable to parse webhook URL: {e}")))?;
    let url_spec: UrlSpec = serde_json::from_str(&rendered)
        .map_err(|e| WebhookError::fatal(format!("unable to parse webhook URL: {e}")))?;
    if url_spec.path.is_empty() {
        return Err(WebhookError::fatal("missing webhook url"));
    }
    Ok(url_spec)
}

/// Render the input template into the request body; no template means an
/// empty body
pub fn render_input(input_template: Option<&str>, data: &Value) -> Result<String, WebhookError> {
    match input_template {
        Some(template) => render(template, data)
            .map_err(|e| WebhookError::fatal(format!("unable to parse webhook input body: {e}"))),
        None => Ok(String::new()),
    }
}

/// Render the header template into a header multimap; no template means no
/// extra headers
pub fn render_headers(
    header_template: Option<&str>,
    data: &Value,
) -> Result<BTreeMap<String, Vec<String>>, WebhookError> {
    let Some(template) = header_template else {
        return Ok(BTreeMap::new());
    };
    let rendered = render(template, data)
        .map_err(|e| WebhookError::fatal(format!("unable to parse webhook headers: {e}")))?;
    serde_json::from_str(&rendered)
        .map_err(|e| WebhookError::fatal(format!("unable to parse webhook headers: {e}")))
}

/// Render the output template against the "Do" response
pub fn render_output(
    output_template: Option<&str>,
    data: &Value,
) -> Result<RenderedOutput, WebhookError> {
    let template =
        output_template.ok_or_else(|| WebhookError::fatal("missing webhook output template"))?;
    let rendered = render(template, data)
        .map_err(|e| WebhookError::fatal(format!("unable to parse webhook output template: {e}")))?;
    serde_json::from_str(&rendered)
        .map_err(|e| WebhookError::fatal(format!("unable to parse webhook output template: {e}")))
}

/// Render the status template against the "Poll" response
pub fn render_status(
    status_template: Option<&str>,
    data: &Value,
) -> Result<RenderedStatus, WebhookError> {
    let template =
        status_template.ok_or_else(|| WebhookError::fatal("missing webhook status template"))?;
    let rendered = render(template, data)
        .map_err(|e| WebhookError::fatal(format!("unable to parse webhook status template: {e}")))?;
    serde_json::from_str(&rendered)
        .map_err(|e| WebhookError::fatal(format!("unable to parse webhook status template: {e}")))
}

fn render(template: &str, data: &Value) -> Result<String, handlebars::RenderError> {
    let mut registry = Handlebars::new();
    // Rendered text is parsed as JSON, never as HTML; escaping would corrupt
    // quotes and ampersands in URLs and error strings
    registry.register_escape_fn(handlebars::no_escape);
    registry.render_template(template, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_object() -> RequestObject {
        RequestObject {
            tenant_id: "tenant-a".to_string(),
            headers: [("user-identity".to_string(), "admin".to_string())].into(),
            context: serde_json::json!({"id": "app-id", "name": "my-app"}),
        }
    }

    #[test]
    fn test_render_url_with_context_fields() {
        let data = request_data(&request_object());
        let template =
            r#"{"method": "DELETE", "path": "https://test-domain.com/api/v1/applications/{{context.id}}"}"#;
        let url_spec = render_url(Some(template), &data).unwrap();
        assert_eq!(url_spec.method, "DELETE");
        assert_eq!(
            url_spec.path,
            "https://test-domain.com/api/v1/applications/app-id"
        );
    }

    #[test]
    fn test_render_url_missing_template_is_fatal() {
        let data = request_data(&request_object());
        let err = render_url(None, &data).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("missing webhook url template"));
    }

    #[test]
    fn test_render_url_unparsable_template_is_fatal() {
        let data = request_data(&request_object());
        let err = render_url(Some("invalidTemplate"), &data).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("unable to parse webhook URL"));
    }

    #[test]
    fn test_render_url_empty_path_is_fatal() {
        let data = request_data(&request_object());
        let template = r#"{"method": "GET", "path": "{{context.missing}}"}"#;
        let err = render_url(Some(template), &data).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("missing webhook url"));
    }

    #[test]
    fn test_render_input_substitutes_request_object() {
        let data = request_data(&request_object());
        let template = r#"{"application_id": "{{context.id}}", "tenant": "{{tenantId}}"}"#;
        let body = render_input(Some(template), &data).unwrap();
        assert_eq!(body, r#"{"application_id": "app-id", "tenant": "tenant-a"}"#);
    }

    #[test]
    fn test_render_headers_builds_multimap() {
        let data = request_data(&request_object());
        let template = r#"{"user-identity": ["{{headers.[user-identity]}}"]}"#;
        let headers = render_headers(Some(template), &data).unwrap();
        assert_eq!(
            headers.get("user-identity"),
            Some(&vec!["admin".to_string()])
        );
    }

    #[test]
    fn test_render_output_reads_response_headers_and_body() {
        let headers = [("location".to_string(), "https://test-domain.com/operation".to_string())]
            .into();
        let body = serde_json::json!({"error": ""});
        let data = response_data(&headers, &body);
        let template = r#"{"location": "{{headers.location}}", "successStatusCode": 202, "goneStatusCode": 404, "error": "{{body.error}}"}"#;
        let output = render_output(Some(template), &data).unwrap();
        assert_eq!(
            output.location.as_deref(),
            Some("https://test-domain.com/operation")
        );
        assert_eq!(output.success_status_code, 202);
        assert_eq!(output.gone_status_code, Some(404));
        assert_eq!(output.error.as_deref(), Some(""));
    }

    #[test]
    fn test_render_output_missing_template_is_fatal() {
        let data = response_data(&BTreeMap::new(), &Value::Null);
        let err = render_output(None, &data).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("missing webhook output template"));
    }

    #[test]
    fn test_render_status_maps_identifiers() {
        let body = serde_json::json!({"status": "in_progress", "error": ""});
        let data = response_data(&BTreeMap::new(), &body);
        let template = r#"{"status": "{{body.status}}", "successStatusCode": 200, "successStatusIdentifier": "succeeded", "inProgressStatusIdentifier": "in_progress", "failedStatusIdentifier": "failed", "error": "{{body.error}}"}"#;
        let status = render_status(Some(template), &data).unwrap();
        assert_eq!(status.status.as_deref(), Some("in_progress"));
        assert_eq!(status.in_progress_status_identifier.as_deref(), Some("in_progress"));
    }
}

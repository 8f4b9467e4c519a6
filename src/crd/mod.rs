//! # Custom Resource Definitions
//!
//! CRD types for the Operations Controller.
//!
//! This module contains the `Operation` Custom Resource Definition: the spec
//! describing a desired lifecycle action against an external resource, and the
//! status types tracking webhook execution through to a terminal phase.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod status;

pub use status::{
    ConditionStatus, ConditionType, OperationCondition, OperationState, OperationStatus,
    OperationValidationError, StatusTransition, WebhookStatus,
};

/// Operation Custom Resource Definition
///
/// An Operation describes a single lifecycle action (Create/Update/Delete)
/// against an external resource, optionally executed through one webhook.
/// The controller drives it through webhook invocation, polling, timeout
/// enforcement, and terminal status reporting.
///
/// # Example
///
/// ```yaml
/// apiVersion: operations.microscaler.io/v1alpha1
/// kind: Operation
/// metadata:
///   name: delete-application-b91b
///   namespace: default
/// spec:
///   operationType: Delete
///   resourceType: application
///   resourceId: 6b9f2dcd-4c2e-4c48-9f63-e489a89b9c5e
///   correlationId: 2d7a3b8a-05f6-4e4d-9c8c-1c2f5ab3d9aa
///   webhookIds:
///     - 866e6b9c-f03b-442b-a6a5-4b90e21e503a
///   requestObject: '{"tenantId":"tenant-a","headers":{},"context":{}}'
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Operation",
    group = "operations.microscaler.io",
    version = "v1alpha1",
    namespaced,
    status = "OperationStatus",
    shortname = "op",
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.operationType"}, {"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    /// Lifecycle action this Operation executes
    pub operation_type: OperationType,
    /// Type of the external resource the action targets (e.g. "application")
    pub resource_type: String,
    /// Identifier of the external resource in the Director
    pub resource_id: String,
    /// Correlation id propagated to the webhook for request tracing
    pub correlation_id: String,
    /// Webhooks to execute. At most one entry is valid; more than one is a
    /// validation error surfaced during status initialization.
    #[serde(default)]
    pub webhook_ids: Vec<String>,
    /// JSON-encoded request object carrying the tenant and caller context
    pub request_object: String,
}

/// Lifecycle action type of an Operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Create => write!(f, "Create"),
            OperationType::Update => write!(f, "Update"),
            OperationType::Delete => write!(f, "Delete"),
        }
    }
}

/// Decoded form of `OperationSpec::request_object`
///
/// Carries the tenant the Operation executes under, the caller-supplied
/// headers forwarded to the webhook, and an opaque context blob available to
/// the webhook descriptor templates.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestObject {
    /// Tenant the external resource belongs to
    pub tenant_id: String,
    /// Caller-supplied headers, forwarded to the webhook request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Opaque caller context exposed to descriptor templates
    #[serde(default)]
    pub context: serde_json::Value,
}

impl Operation {
    /// Decode the spec's JSON request object
    pub fn request_object(&self) -> Result<RequestObject, serde_json::Error> {
        serde_json::from_str(&self.spec.request_object)
    }

    /// The single webhook sub-status, if any has been initialized
    pub fn webhook_status(&self) -> Option<&WebhookStatus> {
        self.status.as_ref().and_then(|s| s.webhooks.first())
    }

    /// Poll URL recorded by a previous async webhook invocation, if any
    pub fn poll_url(&self) -> Option<&str> {
        self.webhook_status()
            .map(|w| w.webhook_poll_url.as_str())
            .filter(|url| !url.is_empty())
    }

    /// Whether an async webhook call has already been started
    pub fn has_poll_url(&self) -> bool {
        self.poll_url().is_some()
    }

    /// Retries recorded so far on the webhook sub-status
    pub fn retries_count(&self) -> i32 {
        self.webhook_status().map_or(0, |w| w.retries_count)
    }

    /// Current phase, if the status has been initialized
    pub fn phase(&self) -> Option<OperationState> {
        self.status.as_ref().and_then(|s| s.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn operation_with_request_object(request_object: &str) -> Operation {
        Operation {
            metadata: ObjectMeta::default(),
            spec: OperationSpec {
                operation_type: OperationType::Create,
                resource_type: "application".to_string(),
                resource_id: "app-id".to_string(),
                correlation_id: "corr-id".to_string(),
                webhook_ids: vec![],
                request_object: request_object.to_string(),
            },
            status: None,
        }
    }

    #[test]
    fn test_request_object_decodes_tenant_and_headers() {
        let operation = operation_with_request_object(
            r#"{"tenantId":"tenant-a","headers":{"user-identity":"admin"},"context":{"id":"x"}}"#,
        );
        let request_object = operation.request_object().unwrap();
        assert_eq!(request_object.tenant_id, "tenant-a");
        assert_eq!(
            request_object
                .headers
                .get("user-identity")
                .map(String::as_str),
            Some("admin")
        );
        assert_eq!(request_object.context["id"], "x");
    }

    #[test]
    fn test_request_object_rejects_malformed_json() {
        let operation = operation_with_request_object("{not-json");
        assert!(operation.request_object().is_err());
    }

    #[test]
    fn test_poll_url_empty_until_recorded() {
        let mut operation = operation_with_request_object("{}");
        assert!(!operation.has_poll_url());

        operation.status = Some(OperationStatus {
            webhooks: vec![WebhookStatus {
                webhook_id: "wh-1".to_string(),
                state: OperationState::InProgress,
                retries_count: 0,
                webhook_poll_url: String::new(),
                last_poll_timestamp: String::new(),
            }],
            ..OperationStatus::default()
        });
        assert!(!operation.has_poll_url());

        operation.status.as_mut().unwrap().webhooks[0].webhook_poll_url =
            "https://test-domain.com/operation".to_string();
        assert_eq!(
            operation.poll_url(),
            Some("https://test-domain.com/operation")
        );
    }
}

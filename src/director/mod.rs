//! # Director Client
//!
//! GraphQL client for the system-of-record. The reconciler uses exactly two
//! calls: fetching the current Application snapshot and pushing an Operation
//! outcome back. The wire format beyond the fields consumed here is owned by
//! the Director.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::controller::reconciler::traits::DirectorClient;
use crate::crd::OperationType;
use crate::errors::DirectorError;
use crate::webhook::Webhook;

/// Header carrying the tenant the request executes under
const TENANT_HEADER: &str = "tenant";

const FETCH_APPLICATION_QUERY: &str = r#"query ($id: ID!) {
  result: application(id: $id) {
    ready
    error
    webhooks {
      id
      mode
      timeoutSecs
      retryIntervalSecs
      urlTemplate
      inputTemplate
      headerTemplate
      outputTemplate
      statusTemplate
      correlationIdKey
    }
  }
}"#;

const UPDATE_OPERATION_MUTATION: &str = r#"mutation ($operationType: OperationType!, $resourceType: String!, $resourceId: ID!, $error: String) {
  result: updateOperation(operationType: $operationType, resourceType: $resourceType, resourceId: $resourceId, error: $error) {
    id
  }
}"#;

/// Snapshot of the external resource as the Director sees it
///
/// Fetched fresh on every reconcile pass; never cached across invocations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSnapshot {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub webhooks: Vec<Webhook>,
}

/// Outcome report pushed back to the Director
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReport {
    pub operation_type: OperationType,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Production Director client speaking GraphQL over HTTP
#[derive(Debug, Clone)]
pub struct GraphqlDirectorClient {
    http: reqwest::Client,
    url: String,
}

impl GraphqlDirectorClient {
    /// Build a client against the configured Director endpoint; every call
    /// is bounded by the given request timeout
    pub fn new(url: String, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(request_timeout).build()?,
            url,
        })
    }

    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        tenant: Option<&str>,
        query: &'static str,
        variables: serde_json::Value,
    ) -> Result<T, DirectorError> {
        let mut request = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({ "query": query, "variables": variables }));
        if let Some(tenant) = tenant {
            request = request.header(TENANT_HEADER, tenant);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DirectorError::transient(format!("director request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectorError::transient(format!(
                "director responded with status {status}"
            )));
        }

        let envelope: GraphqlEnvelope<T> = response
            .json()
            .await
            .map_err(|e| DirectorError::transient(format!("unable to decode director response: {e}")))?;

        if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
            let message = errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            if message.to_lowercase().contains("not found") {
                return Err(DirectorError::not_found(message));
            }
            return Err(DirectorError::transient(message));
        }

        envelope
            .data
            .ok_or_else(|| DirectorError::transient("director response carried no data"))
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlEnvelope<T> {
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default = "Option::default")]
    errors: Option<Vec<GraphqlError>>,
}


#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct FetchApplicationData {
    result: Option<ApplicationSnapshot>,
}

#[derive(Debug, Deserialize)]
struct UpdateOperationData {
    #[allow(dead_code, reason = "only the presence of the payload matters")]
    result: Option<serde_json::Value>,
}

#[async_trait]
impl DirectorClient for GraphqlDirectorClient {
    async fn fetch_application(
        &self,
        tenant: &str,
        resource_id: &str,
    ) -> Result<ApplicationSnapshot, DirectorError> {
        let data: FetchApplicationData = self
            .execute(
                Some(tenant),
                FETCH_APPLICATION_QUERY,
                serde_json::json!({ "id": resource_id }),
            )
            .await?;

        data.result.ok_or_else(|| {
            DirectorError::not_found(format!("application with id {resource_id} not found"))
        })
    }

    async fn update_operation(
        &self,
        tenant: Option<&str>,
        report: &OperationReport,
    ) -> Result<(), DirectorError> {
        let variables = serde_json::json!({
            "operationType": report.operation_type.to_string(),
            "resourceType": report.resource_type,
            "resourceId": report.resource_id,
            "error": report.error,
        });
        let _: UpdateOperationData = self
            .execute(tenant, UPDATE_OPERATION_MUTATION, variables)
            .await?;
        Ok(())
    }
}

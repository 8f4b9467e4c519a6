//! # Status Manager
//!
//! Applies status transitions to an Operation resource and persists them via
//! the status sub-resource with optimistic-concurrency retry.
//!
//! The transitions themselves are pure functions (`crate::crd::status`); this
//! module only owns the persistence loop: replace the status using the loaded
//! resource version, and on a conflict reload the resource and re-apply the
//! same transformation, bounded by a fixed retry budget.

use async_trait::async_trait;
use chrono::Utc;
use kube::api::PostParams;
use kube::{Api, Client, ResourceExt};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{ControllerConfig, TimeLayout};
use crate::controller::reconciler::traits::StatusManager;
use crate::crd::status::{apply_transition, validate_webhook_ids};
use crate::crd::{Operation, StatusTransition};
use crate::errors::StatusError;
use crate::k8s::is_conflict;

/// Production status manager persisting through the Kubernetes status
/// sub-resource
#[derive(Clone)]
pub struct KubeStatusManager {
    client: Client,
    time_layout: TimeLayout,
    attempts: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for KubeStatusManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStatusManager")
            .field("time_layout", &self.time_layout)
            .field("attempts", &self.attempts)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl KubeStatusManager {
    pub fn new(client: Client, config: &ControllerConfig) -> Self {
        Self {
            client,
            time_layout: config.time_layout,
            attempts: config.status_update_attempts.max(1),
            retry_delay: config.status_retry_delay,
        }
    }

    fn api(&self, operation: &Operation) -> Api<Operation> {
        let namespace = operation.namespace().unwrap_or_else(|| "default".to_string());
        Api::namespaced(self.client.clone(), &namespace)
    }

    /// Apply the transition and persist, reloading and re-applying on
    /// conflicts until the retry budget runs out
    ///
    /// On success the caller's Operation is replaced with the persisted
    /// object so later writes in the same pass carry the fresh resource
    /// version.
    async fn persist(
        &self,
        operation: &mut Operation,
        transition: StatusTransition,
    ) -> Result<(), StatusError> {
        let api = self.api(operation);
        let name = operation.name_any();
        let mut latest = operation.clone();

        for attempt in 1..=self.attempts {
            apply_transition(&mut latest, &transition)?;
            let data = serde_json::to_vec(&latest)?;

            match api.replace_status(&name, &PostParams::default(), data).await {
                Ok(persisted) => {
                    *operation = persisted;
                    return Ok(());
                }
                Err(err) if is_conflict(&err) && attempt < self.attempts => {
                    debug!(
                        operation = %name,
                        attempt,
                        "status update conflict, reloading and retrying"
                    );
                    tokio::time::sleep(self.retry_delay * attempt).await;
                    latest = api.get(&name).await?;
                }
                Err(err) if is_conflict(&err) => {
                    warn!(operation = %name, attempts = self.attempts, "status update conflict budget exhausted");
                    return Err(StatusError::ConflictBudgetExhausted {
                        attempts: self.attempts,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(StatusError::ConflictBudgetExhausted {
            attempts: self.attempts,
        })
    }
}

#[async_trait]
impl StatusManager for KubeStatusManager {
    async fn initialize(&self, operation: &mut Operation) -> Result<(), StatusError> {
        validate_webhook_ids(&operation.spec.webhook_ids)?;

        let generation = operation.metadata.generation;
        let observed = operation
            .status
            .as_ref()
            .and_then(|s| s.observed_generation);
        if generation.is_some() && observed == generation {
            debug!(
                operation = %operation.name_any(),
                "status already initialized for generation, skipping"
            );
            return Ok(());
        }

        let initialized_at = self.time_layout.format(Utc::now());
        self.persist(operation, StatusTransition::Initialize { initialized_at })
            .await
    }

    async fn in_progress_with_poll_url(
        &self,
        operation: &mut Operation,
        poll_url: &str,
    ) -> Result<(), StatusError> {
        self.persist(
            operation,
            StatusTransition::InProgressWithPollUrl {
                poll_url: poll_url.to_string(),
            },
        )
        .await
    }

    async fn in_progress_with_poll_url_and_timestamp(
        &self,
        operation: &mut Operation,
        poll_url: &str,
        last_poll_timestamp: &str,
        retries_count: i32,
    ) -> Result<(), StatusError> {
        self.persist(
            operation,
            StatusTransition::InProgressWithPollUrlAndTimestamp {
                poll_url: poll_url.to_string(),
                last_poll_timestamp: last_poll_timestamp.to_string(),
                retries_count,
            },
        )
        .await
    }

    async fn success(&self, operation: &mut Operation) -> Result<(), StatusError> {
        self.persist(operation, StatusTransition::Success).await
    }

    async fn failed(&self, operation: &mut Operation, message: &str) -> Result<(), StatusError> {
        self.persist(
            operation,
            StatusTransition::Failed {
                message: message.to_string(),
            },
        )
        .await
    }
}

//! # Kubernetes Client
//!
//! Thin kube-backed client for the two Operation resource accesses the
//! reconciler needs: get by key and delete. Status writes go through the
//! status manager in `crate::k8s::status`.

use async_trait::async_trait;
use kube::api::DeleteParams;
use kube::{Api, Client, ResourceExt};

use crate::controller::reconciler::traits::KubernetesClient;
use crate::crd::Operation;

pub mod status;

pub use status::KubeStatusManager;

/// Whether the API server reported the resource as absent
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

/// Whether the API server rejected a write due to a resource version conflict
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409)
}

/// Production Operation resource client
#[derive(Clone)]
pub struct KubeOperationClient {
    client: Client,
}

impl std::fmt::Debug for KubeOperationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeOperationClient").finish_non_exhaustive()
    }
}

impl KubeOperationClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Operation> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl KubernetesClient for KubeOperationClient {
    async fn get_operation(&self, namespace: &str, name: &str) -> Result<Operation, kube::Error> {
        self.api(namespace).get(name).await
    }

    async fn delete_operation(&self, operation: &Operation) -> Result<(), kube::Error> {
        let namespace = operation.namespace().unwrap_or_else(|| "default".to_string());
        self.api(&namespace)
            .delete(&operation.name_any(), &DeleteParams::default())
            .await
            .map(|_| ())
    }
}

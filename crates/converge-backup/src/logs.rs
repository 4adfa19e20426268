//! Log retrieval for task pods

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, LogParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use converge_engine::StoreError;

/// Reads the output of a container
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Full log text of `container` in `pod`
    async fn fetch(&self, namespace: &str, pod: &str, container: &str)
        -> Result<String, StoreError>;
}

/// [`LogSource`] backed by the pod log subresource
pub struct KubeLogSource {
    client: Client,
}

impl KubeLogSource {
    /// Create a log source using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogSource for KubeLogSource {
    async fn fetch(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<String, StoreError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            ..Default::default()
        };
        api.logs(pod, &params)
            .await
            .map_err(|e| StoreError::from_kube("Pod", pod, e))
    }
}

mod http;

pub use http::HttpComputeProvider;

use crate::errors::ControlError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct HostRequest {
    pub name: String,
    pub region: String,
    pub size_class: String,
    /// Provider-registered key ids attached to the host at boot.
    pub ssh_key_ids: Vec<String>,
    /// Cloud-init payload; installs the container runtime and the agent.
    pub init_script: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedHost {
    pub host_id: String,
    pub public_address: Option<String>,
}

/// Cloud compute provider surface. Exactly one create request per
/// `provision` call; retries are the caller's responsibility to avoid
/// duplicate billing.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn register_ssh_key(
        &self,
        key_name: &str,
        public_key: &str,
    ) -> Result<String, ControlError>;

    async fn create_host(&self, request: &HostRequest) -> Result<CreatedHost, ControlError>;

    async fn delete_host(&self, host_id: &str) -> Result<(), ControlError>;
}

use crate::constants::crypto;
use crate::errors::ControlError;
use crate::model::{ProvisionConfig, ToolboxRecord, ToolboxStatus};
use crate::providers::{ComputeProvider, HostRequest};
use crate::services::bootstrap::{render_bootstrap_script, BootstrapParams};
use crate::services::keys::SshKeyService;
use crate::services::logger::Logger;
use crate::services::validation::Validation;
use crate::stores::ToolboxStore;
use chrono::Utc;
use rand::RngCore;
use std::sync::Arc;
use uuid::Uuid;

/// Drives toolbox creation and teardown. `provision` and `deprovision`
/// return as soon as the record reflects the accepted intent; the slow
/// provider work runs in a background task and lands its outcome in the
/// store, where the reconciler and the status view pick it up.
pub struct Provisioner {
    logger: Logger,
    validation: Validation,
    store: ToolboxStore,
    keys: Arc<SshKeyService>,
    provider: Arc<dyn ComputeProvider>,
    agent_download_url: String,
    /// When false, background work runs inline. Test hook only.
    background: bool,
}

impl Provisioner {
    pub fn new(
        logger: Logger,
        validation: Validation,
        store: ToolboxStore,
        keys: Arc<SshKeyService>,
        provider: Arc<dyn ComputeProvider>,
        agent_download_url: String,
        background: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            logger: logger.child("provisioner"),
            validation,
            store,
            keys,
            provider,
            agent_download_url,
            background,
        })
    }

    /// Accept a provision request. Idempotent per (owner, name): while a
    /// non-terminal record exists it is returned unchanged and no second
    /// host is ever requested.
    pub async fn provision(
        self: &Arc<Self>,
        owner_id: &str,
        config: &ProvisionConfig,
    ) -> Result<ToolboxRecord, ControlError> {
        let owner_id = self.validation.ensure_owner(owner_id)?;
        let config = self.validation.ensure_provision_config(config)?;

        if let Some(existing) = self.store.find_non_terminal(&owner_id, &config.name)? {
            self.logger.info(
                &format!("Provision for {} is already in flight", config.name),
                Some(&serde_json::json!({ "status": existing.status.as_str() })),
            );
            return Ok(existing);
        }

        // Keys are registered before the record exists so a key failure
        // never leaves a half-made toolbox behind.
        self.keys.ensure_keys(&owner_id).await?;

        let now = Utc::now();
        let candidate = ToolboxRecord {
            id: Uuid::new_v4(),
            owner_id: owner_id.clone(),
            name: config.name.clone(),
            region: config.region.clone(),
            size_class: config.size_class.clone(),
            public_address: None,
            host_id: None,
            agent_auth_token: generate_agent_token(),
            status: ToolboxStatus::PendingCreation,
            status_changed_at: now,
            last_heartbeat_at: None,
            provisioning_error_message: None,
            created_at: now,
            updated_at: now,
        };
        // The guard above raced the key work; the store re-checks and
        // inserts under one lock, so concurrent callers converge on a
        // single record and a single host request.
        let (record, created) = self.store.create_toolbox(&candidate)?;
        if !created {
            self.logger.info(
                &format!("Provision for {} lost the race, reusing the record", config.name),
                Some(&serde_json::json!({ "id": record.id })),
            );
            return Ok(record);
        }
        self.logger.info(
            &format!("Provisioning toolbox {}", record.name),
            Some(&serde_json::json!({ "id": record.id, "region": record.region })),
        );

        let this = self.clone();
        let id = record.id;
        if self.background {
            tokio::spawn(async move { this.run_creation(id).await });
        } else {
            self.run_creation(id).await;
        }
        Ok(record)
    }

    /// Background half of provisioning. Every failure path lands in
    /// `error_creation` with the raw detail kept on the record for
    /// operators; the status view shows the plain-language category.
    /// Never retried: a retry could bill a second host.
    pub async fn run_creation(&self, id: Uuid) {
        if let Err(err) = self.try_create(id).await {
            self.logger.error(
                &format!("Provisioning failed for {}", id),
                Some(&serde_json::json!({ "code": err.code, "message": err.message })),
            );
            self.mark_failed(id, ToolboxStatus::ErrorCreation, &err);
        }
    }

    async fn try_create(&self, id: Uuid) -> Result<(), ControlError> {
        let record = self.store.require_toolbox(id)?;
        let keys = self.keys.deployment_keys(&record.owner_id).await?;

        let toolbox_id = record.id.to_string();
        let params = BootstrapParams::new(
            &toolbox_id,
            &record.agent_auth_token,
            &self.agent_download_url,
        );
        let request = HostRequest {
            name: format!("toolbox-{}", record.name),
            region: record.region.clone(),
            size_class: record.size_class.clone(),
            ssh_key_ids: vec![keys.provider_key_id.clone()],
            init_script: render_bootstrap_script(&params),
        };

        let host = self.provider.create_host(&request).await?;
        self.store
            .set_host(id, &host.host_id, host.public_address.as_deref())?;
        self.store.transition(
            id,
            ToolboxStatus::PendingCreation,
            ToolboxStatus::Creating,
            None,
        )?;
        Ok(())
    }

    /// Accept a teardown request. Deprovisioning a `deprovisioned` toolbox
    /// is a no-op; anything mid-flight is a conflict.
    pub async fn deprovision(
        self: &Arc<Self>,
        owner_id: &str,
        toolbox_id: Uuid,
    ) -> Result<ToolboxRecord, ControlError> {
        let owner_id = self.validation.ensure_owner(owner_id)?;
        let record = self.store.require_toolbox(toolbox_id)?;
        if record.owner_id != owner_id {
            return Err(ControlError::denied("Toolbox belongs to another owner"));
        }
        if record.status == ToolboxStatus::Deprovisioned {
            return Ok(record);
        }
        if !record.status.can_deprovision() {
            return Err(ControlError::conflict(format!(
                "Cannot deprovision a toolbox in {}",
                record.status.as_str()
            )));
        }

        let updated = self.store.transition(
            toolbox_id,
            record.status,
            ToolboxStatus::PendingDeprovision,
            None,
        )?;
        self.logger.info(
            &format!("Deprovisioning toolbox {}", record.name),
            Some(&serde_json::json!({ "id": toolbox_id })),
        );

        let this = self.clone();
        if self.background {
            tokio::spawn(async move { this.run_deprovision(toolbox_id).await });
        } else {
            self.run_deprovision(toolbox_id).await;
        }
        Ok(updated)
    }

    pub async fn run_deprovision(&self, id: Uuid) {
        if let Err(err) = self.try_deprovision(id).await {
            self.logger.error(
                &format!("Deprovisioning failed for {}", id),
                Some(&serde_json::json!({ "code": err.code, "message": err.message })),
            );
            self.mark_failed(id, ToolboxStatus::ErrorDeprovisioning, &err);
        }
    }

    async fn try_deprovision(&self, id: Uuid) -> Result<(), ControlError> {
        self.store.transition(
            id,
            ToolboxStatus::PendingDeprovision,
            ToolboxStatus::Deprovisioning,
            None,
        )?;
        let record = self.store.require_toolbox(id)?;
        if let Some(host_id) = record.host_id.as_deref() {
            // The provider's delete ack is the confirmation; a missing
            // host counts as already deleted.
            self.provider.delete_host(host_id).await?;
        }
        self.store.delete_instances(id)?;
        self.store.transition(
            id,
            ToolboxStatus::Deprovisioning,
            ToolboxStatus::Deprovisioned,
            None,
        )?;
        Ok(())
    }

    fn mark_failed(&self, id: Uuid, error_status: ToolboxStatus, cause: &ControlError) {
        let Ok(record) = self.store.require_toolbox(id) else {
            return;
        };
        // Operator-grade detail stays on the record; the status view maps
        // the code prefix back to a plain-language category.
        let detail = format!("{}: {}", cause.code, cause.message);
        if let Err(err) =
            self.store
                .transition(id, record.status, error_status, Some(&detail))
        {
            self.logger.error(
                &format!("Could not record failure for {}", id),
                Some(&serde_json::json!({ "message": err.message })),
            );
        }
    }
}

fn generate_agent_token() -> String {
    let mut bytes = [0u8; crypto::AGENT_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_tokens_are_long_and_unique() {
        let a = generate_agent_token();
        let b = generate_agent_token();
        assert_eq!(a.len(), crypto::AGENT_TOKEN_BYTES * 2);
        assert_ne!(a, b);
    }
}

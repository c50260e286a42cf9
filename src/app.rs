use crate::agent::api::{AgentTool, DeployToolRequest};
use crate::errors::ControlError;
use crate::managers::provisioner::Provisioner;
use crate::managers::reconciler::Reconciler;
use crate::model::{ProvisionConfig, ToolboxRecord, ToolboxStatus};
use crate::providers::HttpComputeProvider;
use crate::services::agent_client::{AgentChannel, AgentClient, AgentEndpoint};
use crate::services::fallback::SshChannel;
use crate::services::keys::SshKeyService;
use crate::services::logger::Logger;
use crate::services::remediation::{RemediationKind, RemediationOutcome, Remediator};
use crate::services::secrets::SecretStore;
use crate::services::security::Security;
use crate::services::status_view::ToolboxStatusView;
use crate::services::validation::Validation;
use crate::stores::ToolboxStore;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

pub struct AppConfig {
    pub data_dir: PathBuf,
    pub provider_url: String,
    pub provider_token: String,
    pub agent_download_url: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ControlError> {
        let data_dir = std::env::var("TOOLHOST_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/toolhost"));
        let provider_url = std::env::var("TOOLHOST_PROVIDER_URL")
            .unwrap_or_else(|_| "https://api.digitalocean.com".to_string());
        let provider_token = std::env::var("TOOLHOST_PROVIDER_TOKEN").map_err(|_| {
            ControlError::invalid_params("TOOLHOST_PROVIDER_TOKEN is required")
                .with_hint("Export a provider API token before running control-plane commands.")
        })?;
        let agent_download_url = std::env::var("TOOLHOST_AGENT_DOWNLOAD_URL").map_err(|_| {
            ControlError::invalid_params("TOOLHOST_AGENT_DOWNLOAD_URL is required")
                .with_hint("Point this at a published agent binary, e.g. a release asset URL.")
        })?;
        Ok(Self {
            data_dir,
            provider_url,
            provider_token,
            agent_download_url,
        })
    }
}

/// Control-plane wiring. Everything below the public operations is shared
/// through Arcs so background tasks can outlive the call that spawned them.
pub struct App {
    pub logger: Logger,
    store: ToolboxStore,
    keys: Arc<SshKeyService>,
    agent: Arc<dyn AgentChannel>,
    pub provisioner: Arc<Provisioner>,
    pub reconciler: Arc<Reconciler>,
    remediator: Arc<Remediator>,
}

impl App {
    pub fn initialize(config: AppConfig) -> Result<Self, ControlError> {
        let logger = Logger::new("toolhost");
        let validation = Validation::new();

        let security = Arc::new(Security::new(&config.data_dir.join("master.key"))?);
        let secrets = Arc::new(SecretStore::new(
            logger.clone(),
            security,
            config.data_dir.join("secrets"),
        )?);
        let store = ToolboxStore::open(&config.data_dir.join("toolhost.db"))?;

        let provider = Arc::new(HttpComputeProvider::new(
            logger.clone(),
            &config.provider_url,
            &config.provider_token,
        )?);
        let keys = Arc::new(SshKeyService::new(
            logger.clone(),
            store.clone(),
            secrets,
            provider.clone(),
        ));
        let agent: Arc<dyn AgentChannel> = Arc::new(AgentClient::new(logger.clone()));
        let fallback = Arc::new(SshChannel::new(logger.clone()));

        let provisioner = Provisioner::new(
            logger.clone(),
            validation,
            store.clone(),
            keys.clone(),
            provider,
            config.agent_download_url.clone(),
            true,
        );
        let reconciler = Reconciler::new(logger.clone(), store.clone(), agent.clone());
        let remediator = Arc::new(Remediator::new(
            logger.clone(),
            agent.clone(),
            fallback,
            config.agent_download_url,
        ));

        Ok(Self {
            logger,
            store,
            keys,
            agent,
            provisioner,
            reconciler,
            remediator,
        })
    }

    /// Start the periodic reconcile scan. Call once for a long-running
    /// control plane; one-shot CLI commands skip it.
    pub fn start_background(&self) {
        let reconciler = self.reconciler.clone();
        tokio::spawn(reconciler.run_scan_loop());
    }

    pub async fn provision(
        &self,
        owner_id: &str,
        config: &ProvisionConfig,
    ) -> Result<ToolboxStatusView, ControlError> {
        let record = self.provisioner.provision(owner_id, config).await?;
        Ok(ToolboxStatusView::from_record(&record, &[]))
    }

    pub async fn deprovision(
        &self,
        owner_id: &str,
        toolbox_id: Uuid,
    ) -> Result<ToolboxStatusView, ControlError> {
        let record = self.provisioner.deprovision(owner_id, toolbox_id).await?;
        Ok(ToolboxStatusView::from_record(&record, &[]))
    }

    pub fn list(&self, owner_id: &str) -> Result<Vec<ToolboxStatusView>, ControlError> {
        let records = self.store.list_toolboxes(owner_id)?;
        let mut views = Vec::with_capacity(records.len());
        for record in records {
            let instances = self.store.list_instances(record.id)?;
            views.push(ToolboxStatusView::from_record(&record, &instances));
        }
        Ok(views)
    }

    pub async fn refresh_status(
        &self,
        owner_id: &str,
        toolbox_id: Uuid,
    ) -> Result<ToolboxStatusView, ControlError> {
        self.reconciler.refresh_status(owner_id, toolbox_id).await
    }

    pub async fn restart_agent(
        &self,
        owner_id: &str,
        toolbox_id: Uuid,
    ) -> Result<RemediationOutcome, ControlError> {
        self.remediate(owner_id, toolbox_id, RemediationKind::RestartAgent)
            .await
    }

    pub async fn redeploy_agent(
        &self,
        owner_id: &str,
        toolbox_id: Uuid,
    ) -> Result<RemediationOutcome, ControlError> {
        self.remediate(owner_id, toolbox_id, RemediationKind::RedeployAgent)
            .await
    }

    async fn remediate(
        &self,
        owner_id: &str,
        toolbox_id: Uuid,
        kind: RemediationKind,
    ) -> Result<RemediationOutcome, ControlError> {
        let record = self.owned_record(owner_id, toolbox_id)?;
        if !matches!(
            record.status,
            ToolboxStatus::Active | ToolboxStatus::Unresponsive
        ) {
            return Err(ControlError::conflict(format!(
                "Cannot remediate a toolbox in {}",
                record.status.as_str()
            )));
        }
        let endpoint = self.endpoint_for(&record)?;
        let deployment = self.keys.deployment_keys(&record.owner_id).await?;
        let target = crate::services::fallback::SshTarget::new(
            endpoint.address.clone(),
            deployment.private_key_pem,
        );
        self.remediator.remediate(kind, &endpoint, &target).await
    }

    pub async fn deploy_tool(
        &self,
        owner_id: &str,
        toolbox_id: Uuid,
        request: &DeployToolRequest,
    ) -> Result<AgentTool, ControlError> {
        let record = self.active_record(owner_id, toolbox_id)?;
        let endpoint = self.endpoint_for(&record)?;
        let tool = self.agent.deploy_tool(&endpoint, request).await?;
        // Pull the new container into the cached view right away.
        let _ = self.reconciler.reconcile_once(toolbox_id).await;
        Ok(tool)
    }

    pub async fn start_tool(
        &self,
        owner_id: &str,
        toolbox_id: Uuid,
        name: &str,
    ) -> Result<(), ControlError> {
        let record = self.active_record(owner_id, toolbox_id)?;
        let endpoint = self.endpoint_for(&record)?;
        self.agent.start_tool(&endpoint, name).await?;
        let _ = self.reconciler.reconcile_once(toolbox_id).await;
        Ok(())
    }

    pub async fn stop_tool(
        &self,
        owner_id: &str,
        toolbox_id: Uuid,
        name: &str,
    ) -> Result<(), ControlError> {
        let record = self.active_record(owner_id, toolbox_id)?;
        let endpoint = self.endpoint_for(&record)?;
        self.agent.stop_tool(&endpoint, name).await?;
        let _ = self.reconciler.reconcile_once(toolbox_id).await;
        Ok(())
    }

    pub async fn remove_tool(
        &self,
        owner_id: &str,
        toolbox_id: Uuid,
        name: &str,
    ) -> Result<(), ControlError> {
        let record = self.active_record(owner_id, toolbox_id)?;
        let endpoint = self.endpoint_for(&record)?;
        self.agent.remove_tool(&endpoint, name).await?;
        let _ = self.reconciler.reconcile_once(toolbox_id).await;
        Ok(())
    }

    fn owned_record(
        &self,
        owner_id: &str,
        toolbox_id: Uuid,
    ) -> Result<ToolboxRecord, ControlError> {
        let record = self.store.require_toolbox(toolbox_id)?;
        if record.owner_id != owner_id.trim() {
            return Err(ControlError::denied("Toolbox belongs to another owner"));
        }
        Ok(record)
    }

    fn active_record(
        &self,
        owner_id: &str,
        toolbox_id: Uuid,
    ) -> Result<ToolboxRecord, ControlError> {
        let record = self.owned_record(owner_id, toolbox_id)?;
        if record.status != ToolboxStatus::Active {
            return Err(ControlError::conflict(format!(
                "Toolbox is {}, not active",
                record.status.as_str()
            )));
        }
        Ok(record)
    }

    fn endpoint_for(&self, record: &ToolboxRecord) -> Result<AgentEndpoint, ControlError> {
        let address = record.public_address.clone().ok_or_else(|| {
            ControlError::conflict("Toolbox has no public address yet")
        })?;
        Ok(AgentEndpoint::new(address, record.agent_auth_token.clone()))
    }
}

use crate::agent::api::AgentStatusReport;
use crate::constants::reconcile;
use crate::errors::ControlError;
use crate::model::{InstanceStatus, ToolInstance, ToolboxRecord, ToolboxStatus};
use crate::services::agent_client::{AgentChannel, AgentEndpoint};
use crate::services::logger::Logger;
use crate::services::status_view::ToolboxStatusView;
use crate::stores::ToolboxStore;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Converges stored records toward what the hosts actually report. Each
/// toolbox reconciles independently; one wedged host never stalls the
/// others, and the in-flight map keeps concurrent ticks for the same
/// toolbox from overlapping.
pub struct Reconciler {
    logger: Logger,
    store: ToolboxStore,
    agent: Arc<dyn AgentChannel>,
    in_flight: DashMap<Uuid, ()>,
}

impl Reconciler {
    pub fn new(logger: Logger, store: ToolboxStore, agent: Arc<dyn AgentChannel>) -> Arc<Self> {
        Arc::new(Self {
            logger: logger.child("reconciler"),
            store,
            agent,
            in_flight: DashMap::new(),
        })
    }

    /// One reconcile pass for one toolbox. Skips silently when a pass for
    /// the same toolbox is still running.
    pub async fn reconcile_once(&self, id: Uuid) -> Result<ToolboxRecord, ControlError> {
        if self.in_flight.insert(id, ()).is_some() {
            return self.store.require_toolbox(id);
        }
        let result = self.reconcile_inner(id).await;
        self.in_flight.remove(&id);
        result
    }

    async fn reconcile_inner(&self, id: Uuid) -> Result<ToolboxRecord, ControlError> {
        let record = self.store.require_toolbox(id)?;
        if !record.status.is_polled() {
            return Ok(record);
        }

        let now = Utc::now();
        if let Some(escalated) = self.escalate_if_stuck(&record, now)? {
            return Ok(escalated);
        }

        if matches!(
            record.status,
            ToolboxStatus::PendingDeprovision | ToolboxStatus::Deprovisioning
        ) {
            // The teardown task owns these states; the ceiling check above
            // bounds them if that task never finishes.
            return Ok(record);
        }

        let Some(address) = record.public_address.clone() else {
            // Host not addressable yet; the creation task is still filling
            // it in or the escalation above will time it out.
            return Ok(record);
        };

        let endpoint = AgentEndpoint::new(address, record.agent_auth_token.clone());
        match self.agent.fetch_status(&endpoint).await {
            Ok(report) => self.apply_report(&record, &report).await,
            Err(err) => self.apply_failure(&record, err),
        }
    }

    /// Bounded time in transitional states. A toolbox may be stuck, but
    /// never silently forever.
    fn escalate_if_stuck(
        &self,
        record: &ToolboxRecord,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<ToolboxRecord>, ControlError> {
        let held_ms = record.ms_in_status(now);
        match record.status {
            ToolboxStatus::PendingCreation | ToolboxStatus::Creating
                if held_ms > reconcile::STATE_CEILING_MS as i64 =>
            {
                self.logger.warn(
                    &format!("Toolbox {} exceeded the provisioning ceiling", record.id),
                    Some(&serde_json::json!({ "held_ms": held_ms })),
                );
                let updated = self.store.transition(
                    record.id,
                    record.status,
                    ToolboxStatus::ErrorCreation,
                    Some("TIMEOUT: Provisioning did not complete in time"),
                )?;
                Ok(Some(updated))
            }
            ToolboxStatus::Creating
                if record.public_address.is_none()
                    && held_ms > reconcile::ADDRESS_WAIT_MS as i64 =>
            {
                let updated = self.store.transition(
                    record.id,
                    record.status,
                    ToolboxStatus::ErrorCreation,
                    Some("TIMEOUT: The cloud host never became reachable"),
                )?;
                Ok(Some(updated))
            }
            ToolboxStatus::Scaling if held_ms > reconcile::STATE_CEILING_MS as i64 => {
                let updated = self.store.transition(
                    record.id,
                    record.status,
                    ToolboxStatus::Unresponsive,
                    None,
                )?;
                Ok(Some(updated))
            }
            ToolboxStatus::PendingDeprovision | ToolboxStatus::Deprovisioning
                if held_ms > reconcile::STATE_CEILING_MS as i64 =>
            {
                self.logger.warn(
                    &format!("Toolbox {} exceeded the teardown ceiling", record.id),
                    Some(&serde_json::json!({ "held_ms": held_ms })),
                );
                let updated = self.store.transition(
                    record.id,
                    record.status,
                    ToolboxStatus::ErrorDeprovisioning,
                    Some("TIMEOUT: Teardown did not complete in time"),
                )?;
                Ok(Some(updated))
            }
            _ => Ok(None),
        }
    }

    async fn apply_report(
        &self,
        record: &ToolboxRecord,
        report: &AgentStatusReport,
    ) -> Result<ToolboxRecord, ControlError> {
        self.store.record_heartbeat(record.id, Utc::now())?;

        let instances: Vec<ToolInstance> = report
            .tools
            .iter()
            .map(|tool| ToolInstance {
                id: Uuid::new_v4(),
                toolbox_id: record.id,
                instance_name: tool.name.clone(),
                image_reference: tool.image.clone(),
                container_id: tool.container_id.clone(),
                status: map_container_state(&tool.state),
                port_bindings: tool.ports.clone(),
            })
            .collect();
        self.store.replace_instances(record.id, &instances)?;

        let promote = matches!(
            record.status,
            ToolboxStatus::Creating | ToolboxStatus::Unresponsive | ToolboxStatus::Scaling
        );
        if promote {
            self.logger.info(
                &format!("Toolbox {} is answering, marking active", record.id),
                None,
            );
            return self
                .store
                .transition(record.id, record.status, ToolboxStatus::Active, None);
        }
        self.store.require_toolbox(record.id)
    }

    /// A failed poll is absorbed: one dropped request must not flap an
    /// `active` toolbox to `unresponsive`. Only sustained silence, past
    /// the same ceiling that bounds every transitional state, demotes it.
    fn apply_failure(
        &self,
        record: &ToolboxRecord,
        err: ControlError,
    ) -> Result<ToolboxRecord, ControlError> {
        self.logger.debug(
            &format!("Agent poll failed for {}", record.id),
            Some(&serde_json::json!({ "code": err.code })),
        );
        if record.status == ToolboxStatus::Active {
            let silent_ms = record.ms_since_contact(Utc::now());
            if silent_ms > reconcile::STATE_CEILING_MS as i64 {
                self.logger.warn(
                    &format!("Toolbox {} has been silent past the ceiling", record.id),
                    Some(&serde_json::json!({ "silent_ms": silent_ms })),
                );
                return self.store.transition(
                    record.id,
                    ToolboxStatus::Active,
                    ToolboxStatus::Unresponsive,
                    None,
                );
            }
        }
        self.store.require_toolbox(record.id)
    }

    /// On-demand refresh for one toolbox, used by the status surface.
    /// Refuses while teardown is in flight so a poll can never resurrect
    /// a half-deleted host's record.
    pub async fn refresh_status(
        &self,
        owner_id: &str,
        toolbox_id: Uuid,
    ) -> Result<ToolboxStatusView, ControlError> {
        let record = self.store.require_toolbox(toolbox_id)?;
        if record.owner_id != owner_id {
            return Err(ControlError::denied("Toolbox belongs to another owner"));
        }
        if matches!(
            record.status,
            ToolboxStatus::PendingDeprovision | ToolboxStatus::Deprovisioning
        ) {
            return Err(ControlError::conflict(
                "Toolbox is being deprovisioned; refresh is unavailable",
            ));
        }
        let record = if record.status.is_polled() {
            self.reconcile_once(toolbox_id).await?
        } else {
            record
        };
        let instances = self.store.list_instances(toolbox_id)?;
        Ok(ToolboxStatusView::from_record(&record, &instances))
    }

    /// Periodic scan: every interval, reconcile every record in a polled
    /// state. Failures are logged per toolbox and never end the loop.
    pub async fn run_scan_loop(self: Arc<Self>) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(reconcile::POLL_INTERVAL_MS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let ids = match self.store.list_polled_ids() {
                Ok(ids) => ids,
                Err(err) => {
                    self.logger.error(
                        "Reconcile scan could not list records",
                        Some(&serde_json::json!({ "message": err.message })),
                    );
                    continue;
                }
            };
            for id in ids {
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = this.reconcile_once(id).await {
                        this.logger.warn(
                            &format!("Reconcile failed for {}", id),
                            Some(&serde_json::json!({ "code": err.code })),
                        );
                    }
                });
            }
        }
    }
}

fn map_container_state(state: &str) -> InstanceStatus {
    match state {
        "running" => InstanceStatus::Running,
        "created" | "restarting" => InstanceStatus::Created,
        _ => InstanceStatus::Stopped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_states_map_conservatively() {
        assert_eq!(map_container_state("running"), InstanceStatus::Running);
        assert_eq!(map_container_state("created"), InstanceStatus::Created);
        assert_eq!(map_container_state("exited"), InstanceStatus::Stopped);
        assert_eq!(map_container_state("weird"), InstanceStatus::Stopped);
    }
}

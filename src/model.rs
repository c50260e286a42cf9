use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states for one toolbox. Transitions are monotonic along the
/// graph below; `can_transition_to` is the single authority and every
/// status write in the store goes through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolboxStatus {
    Inactive,
    PendingCreation,
    Creating,
    Active,
    Unresponsive,
    Scaling,
    PendingDeprovision,
    Deprovisioning,
    Deprovisioned,
    ErrorCreation,
    ErrorDeprovisioning,
}

impl ToolboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolboxStatus::Inactive => "inactive",
            ToolboxStatus::PendingCreation => "pending_creation",
            ToolboxStatus::Creating => "creating",
            ToolboxStatus::Active => "active",
            ToolboxStatus::Unresponsive => "unresponsive",
            ToolboxStatus::Scaling => "scaling",
            ToolboxStatus::PendingDeprovision => "pending_deprovision",
            ToolboxStatus::Deprovisioning => "deprovisioning",
            ToolboxStatus::Deprovisioned => "deprovisioned",
            ToolboxStatus::ErrorCreation => "error_creation",
            ToolboxStatus::ErrorDeprovisioning => "error_deprovisioning",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "inactive" => ToolboxStatus::Inactive,
            "pending_creation" => ToolboxStatus::PendingCreation,
            "creating" => ToolboxStatus::Creating,
            "active" => ToolboxStatus::Active,
            "unresponsive" => ToolboxStatus::Unresponsive,
            "scaling" => ToolboxStatus::Scaling,
            "pending_deprovision" => ToolboxStatus::PendingDeprovision,
            "deprovisioning" => ToolboxStatus::Deprovisioning,
            "deprovisioned" => ToolboxStatus::Deprovisioned,
            "error_creation" => ToolboxStatus::ErrorCreation,
            "error_deprovisioning" => ToolboxStatus::ErrorDeprovisioning,
            _ => return None,
        })
    }

    pub fn can_transition_to(self, next: ToolboxStatus) -> bool {
        use ToolboxStatus::*;
        matches!(
            (self, next),
            (Inactive, PendingCreation)
                | (PendingCreation, Creating)
                | (PendingCreation, ErrorCreation)
                | (Creating, Active)
                | (Creating, ErrorCreation)
                | (Active, Unresponsive)
                | (Active, Scaling)
                | (Active, PendingDeprovision)
                | (Unresponsive, Active)
                | (Unresponsive, PendingDeprovision)
                | (Scaling, Active)
                | (Scaling, Unresponsive)
                | (PendingDeprovision, Deprovisioning)
                | (PendingDeprovision, ErrorDeprovisioning)
                | (Deprovisioning, Deprovisioned)
                | (Deprovisioning, ErrorDeprovisioning)
                | (ErrorCreation, PendingDeprovision)
                | (ErrorDeprovisioning, PendingDeprovision)
        )
    }

    /// Soft-terminal: `deprovisioned`. Hard-terminal (manual cleanup
    /// required): `error_deprovisioning`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ToolboxStatus::Deprovisioned | ToolboxStatus::ErrorDeprovisioning
        )
    }

    /// States a reconciliation loop runs for. Error states are not polled;
    /// remediation out of them is operator-triggered. Teardown states are
    /// scanned too, so a stuck deprovision is time-bounded even if the
    /// task driving it died with the process.
    pub fn is_polled(self) -> bool {
        matches!(
            self,
            ToolboxStatus::PendingCreation
                | ToolboxStatus::Creating
                | ToolboxStatus::Active
                | ToolboxStatus::Unresponsive
                | ToolboxStatus::Scaling
                | ToolboxStatus::PendingDeprovision
                | ToolboxStatus::Deprovisioning
        )
    }

    /// States in which `public_address` must be populated.
    pub fn requires_address(self) -> bool {
        matches!(
            self,
            ToolboxStatus::Active
                | ToolboxStatus::Unresponsive
                | ToolboxStatus::Scaling
                | ToolboxStatus::PendingDeprovision
                | ToolboxStatus::Deprovisioning
        )
    }

    /// States from which `deprovision` is accepted.
    pub fn can_deprovision(self) -> bool {
        matches!(
            self,
            ToolboxStatus::Active
                | ToolboxStatus::Unresponsive
                | ToolboxStatus::ErrorCreation
                | ToolboxStatus::ErrorDeprovisioning
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolboxRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub region: String,
    pub size_class: String,
    pub public_address: Option<String>,
    /// Provider-issued host identifier, kept for deletion.
    pub host_id: Option<String>,
    /// Bearer secret for the remote agent. Never serialized or logged.
    #[serde(skip_serializing, default)]
    pub agent_auth_token: String,
    pub status: ToolboxStatus,
    pub status_changed_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub provisioning_error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToolboxRecord {
    /// Milliseconds spent in the current status.
    pub fn ms_in_status(&self, now: DateTime<Utc>) -> i64 {
        (now - self.status_changed_at).num_milliseconds()
    }

    /// Milliseconds since the host last proved it was alive: the newer of
    /// the last heartbeat and entry into the current status.
    pub fn ms_since_contact(&self, now: DateTime<Utc>) -> i64 {
        let basis = match self.last_heartbeat_at {
            Some(heartbeat) if heartbeat > self.status_changed_at => heartbeat,
            _ => self.status_changed_at,
        };
        (now - basis).num_milliseconds()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Created,
    Running,
    Stopped,
    Removed,
}

impl InstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Created => "created",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Removed => "removed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "created" => InstanceStatus::Created,
            "running" => InstanceStatus::Running,
            "stopped" => InstanceStatus::Stopped,
            "removed" => InstanceStatus::Removed,
            _ => return None,
        })
    }
}

/// Control-plane cache of one agent-managed container. The agent's report
/// is authoritative; these rows converge to it on every reconcile tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInstance {
    pub id: Uuid,
    pub toolbox_id: Uuid,
    pub instance_name: String,
    pub image_reference: String,
    pub container_id: Option<String>,
    pub status: InstanceStatus,
    pub port_bindings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKeyPair {
    pub owner_id: String,
    pub key_name: String,
    /// Opaque secret-store references; raw key material never rests here.
    pub public_key_reference: String,
    pub private_key_reference: String,
    pub fingerprint: String,
    pub provider_key_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    pub name: String,
    pub region: String,
    pub size_class: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_a_valid_walk() {
        use ToolboxStatus::*;
        let walk = [
            Inactive,
            PendingCreation,
            Creating,
            Active,
            PendingDeprovision,
            Deprovisioning,
            Deprovisioned,
        ];
        for pair in walk.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{:?} -> {:?} must be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn active_cannot_regress() {
        use ToolboxStatus::*;
        assert!(!Active.can_transition_to(PendingCreation));
        assert!(!Active.can_transition_to(Creating));
        assert!(!Deprovisioned.can_transition_to(Active));
    }

    #[test]
    fn heartbeat_loss_and_recovery() {
        use ToolboxStatus::*;
        assert!(Active.can_transition_to(Unresponsive));
        assert!(Unresponsive.can_transition_to(Active));
    }

    #[test]
    fn error_states_can_only_move_toward_deprovision() {
        use ToolboxStatus::*;
        assert!(ErrorCreation.can_transition_to(PendingDeprovision));
        assert!(!ErrorCreation.can_transition_to(Active));
        assert!(!ErrorCreation.can_transition_to(Creating));
    }

    #[test]
    fn terminal_and_polled_sets_are_disjoint() {
        use ToolboxStatus::*;
        for status in [
            Inactive,
            PendingCreation,
            Creating,
            Active,
            Unresponsive,
            Scaling,
            PendingDeprovision,
            Deprovisioning,
            Deprovisioned,
            ErrorCreation,
            ErrorDeprovisioning,
        ] {
            assert!(!(status.is_terminal() && status.is_polled()));
        }
    }

    #[test]
    fn contact_basis_prefers_the_newer_heartbeat() {
        let now = Utc::now();
        let mut record = ToolboxRecord {
            id: Uuid::new_v4(),
            owner_id: "u1".to_string(),
            name: "dev".to_string(),
            region: "nyc3".to_string(),
            size_class: "s-1vcpu-1gb".to_string(),
            public_address: None,
            host_id: None,
            agent_auth_token: "t".to_string(),
            status: ToolboxStatus::Active,
            status_changed_at: now - chrono::Duration::minutes(30),
            last_heartbeat_at: None,
            provisioning_error_message: None,
            created_at: now - chrono::Duration::minutes(30),
            updated_at: now,
        };
        assert!(record.ms_since_contact(now) >= 30 * 60 * 1000);
        record.last_heartbeat_at = Some(now - chrono::Duration::seconds(20));
        let silent = record.ms_since_contact(now);
        assert!((20_000..30_000).contains(&silent));
    }

    #[test]
    fn status_round_trips_through_strings() {
        use ToolboxStatus::*;
        for status in [PendingCreation, Creating, Active, ErrorDeprovisioning] {
            assert_eq!(ToolboxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ToolboxStatus::parse("unknown"), None);
    }
}

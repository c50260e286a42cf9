use crate::errors::ControlErrorKind;
use crate::model::{ToolInstance, ToolboxRecord, ToolboxStatus};
use serde::Serialize;

/// Progress is a pure function of status. No timers, no interpolation: a
/// toolbox stuck in `creating` for ten minutes shows the same phase as one
/// that just entered it, and the reconciler is what moves it on.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PhaseInfo {
    pub phase: &'static str,
    pub percent: u8,
    pub detail: &'static str,
    pub suggested_action: Option<&'static str>,
}

pub fn describe(status: ToolboxStatus) -> PhaseInfo {
    match status {
        ToolboxStatus::Inactive => PhaseInfo {
            phase: "inactive",
            percent: 0,
            detail: "No toolbox provisioned",
            suggested_action: Some("Provision a toolbox to get started"),
        },
        ToolboxStatus::PendingCreation => PhaseInfo {
            phase: "provisioning",
            percent: 10,
            detail: "Provision request accepted",
            suggested_action: None,
        },
        ToolboxStatus::Creating => PhaseInfo {
            phase: "provisioning",
            percent: 55,
            detail: "Cloud host is booting and installing the agent",
            suggested_action: None,
        },
        ToolboxStatus::Active => PhaseInfo {
            phase: "ready",
            percent: 100,
            detail: "Toolbox is healthy",
            suggested_action: None,
        },
        ToolboxStatus::Unresponsive => PhaseInfo {
            phase: "degraded",
            percent: 100,
            detail: "Agent has stopped responding",
            suggested_action: Some("Try restarting the agent"),
        },
        ToolboxStatus::Scaling => PhaseInfo {
            phase: "scaling",
            percent: 100,
            detail: "Toolbox is resizing",
            suggested_action: None,
        },
        ToolboxStatus::PendingDeprovision => PhaseInfo {
            phase: "deprovisioning",
            percent: 20,
            detail: "Teardown request accepted",
            suggested_action: None,
        },
        ToolboxStatus::Deprovisioning => PhaseInfo {
            phase: "deprovisioning",
            percent: 60,
            detail: "Cloud host is being deleted",
            suggested_action: None,
        },
        ToolboxStatus::Deprovisioned => PhaseInfo {
            phase: "gone",
            percent: 100,
            detail: "Toolbox has been removed",
            suggested_action: None,
        },
        ToolboxStatus::ErrorCreation => PhaseInfo {
            phase: "error",
            percent: 100,
            detail: "Provisioning failed",
            suggested_action: Some("Deprovision and provision a fresh toolbox"),
        },
        ToolboxStatus::ErrorDeprovisioning => PhaseInfo {
            phase: "error",
            percent: 100,
            detail: "Teardown failed; the cloud host may still exist",
            suggested_action: Some("Retry deprovisioning or remove the host manually"),
        },
    }
}

/// User-facing projection of one record. Internal fields (token, host id,
/// raw error text) never appear here.
#[derive(Debug, Clone, Serialize)]
pub struct ToolboxStatusView {
    pub id: String,
    pub name: String,
    pub region: String,
    pub size_class: String,
    pub status: &'static str,
    pub phase: &'static str,
    pub percent: u8,
    pub detail: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<&'static str>,
    /// Plain-language failure category for error states. The raw detail
    /// stays on the record for operators and never crosses this boundary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_address: Option<String>,
    pub tools: Vec<ToolView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolView {
    pub name: String,
    pub image: String,
    pub status: &'static str,
    pub ports: Vec<String>,
}

/// Stored detail is `CODE: message`; only the code's category is shown.
fn failure_category(stored: Option<&str>) -> &'static str {
    stored
        .and_then(|raw| raw.split_once(':'))
        .and_then(|(code, _)| ControlErrorKind::parse(code.trim()))
        .unwrap_or(ControlErrorKind::Internal)
        .user_message()
}

impl ToolboxStatusView {
    pub fn from_record(record: &ToolboxRecord, instances: &[ToolInstance]) -> Self {
        let info = describe(record.status);
        let error = match record.status {
            ToolboxStatus::ErrorCreation | ToolboxStatus::ErrorDeprovisioning => Some(
                failure_category(record.provisioning_error_message.as_deref()),
            ),
            _ => None,
        };
        Self {
            id: record.id.to_string(),
            name: record.name.clone(),
            region: record.region.clone(),
            size_class: record.size_class.clone(),
            status: record.status.as_str(),
            phase: info.phase,
            percent: info.percent,
            detail: info.detail,
            suggested_action: info.suggested_action,
            error,
            public_address: record.public_address.clone(),
            tools: instances
                .iter()
                .map(|i| ToolView {
                    name: i.instance_name.clone(),
                    image: i.image_reference.clone(),
                    status: i.status.as_str(),
                    ports: i.port_bindings.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_a_fixed_lookup() {
        assert_eq!(describe(ToolboxStatus::PendingCreation).percent, 10);
        assert_eq!(describe(ToolboxStatus::Creating).percent, 55);
        assert_eq!(describe(ToolboxStatus::Active).percent, 100);
        // Stable for the same status no matter how long it has been held.
        assert_eq!(
            describe(ToolboxStatus::Creating).percent,
            describe(ToolboxStatus::Creating).percent
        );
    }

    #[test]
    fn failure_category_maps_the_code_not_the_detail() {
        let shown = failure_category(Some("RETRYABLE: provider 503, request id r-99"));
        assert_eq!(shown, "Temporary service issue. Try again in a moment.");
        assert!(!shown.contains("r-99"));
        // Unparseable or missing detail falls back to the generic category.
        assert_eq!(
            failure_category(Some("unstructured text")),
            ControlErrorKind::Internal.user_message()
        );
        assert_eq!(failure_category(None), ControlErrorKind::Internal.user_message());
    }

    #[test]
    fn degraded_and_error_states_suggest_an_action() {
        assert!(describe(ToolboxStatus::Unresponsive).suggested_action.is_some());
        assert!(describe(ToolboxStatus::ErrorCreation).suggested_action.is_some());
        assert!(describe(ToolboxStatus::Active).suggested_action.is_none());
    }
}

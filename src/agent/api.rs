use serde::{Deserialize, Serialize};

/// Wire types shared by the on-host agent and the control-plane client.
/// Versioned implicitly by field addition only; removals break old agents.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusReport {
    pub toolbox_id: String,
    pub agent_version: String,
    pub uptime_seconds: u64,
    pub host: HostMetrics,
    pub tools: Vec<AgentTool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostMetrics {
    pub load_average_1m: f64,
    pub memory_total_bytes: u64,
    pub memory_available_bytes: u64,
    pub disk_total_bytes: u64,
    pub disk_available_bytes: u64,
}

/// One managed container as the agent sees it right now. Derived from the
/// runtime on every request, never from agent memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTool {
    pub name: String,
    pub image: String,
    pub container_id: Option<String>,
    pub state: String,
    pub ports: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployToolRequest {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentActionResponse {
    pub ok: bool,
    pub message: String,
}

impl AgentActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }
}

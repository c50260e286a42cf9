use crate::constants::{agent as agent_constants, network};
use crate::errors::ControlError;
use crate::services::agent_client::{AgentChannel, AgentEndpoint};
use crate::services::fallback::{run_sequence, CommandChannel, SshTarget};
use crate::services::logger::Logger;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationKind {
    RestartAgent,
    RedeployAgent,
}

impl RemediationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RemediationKind::RestartAgent => "restart_agent",
            RemediationKind::RedeployAgent => "redeploy_agent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationChannel {
    Agent,
    Ssh,
}

/// What actually happened, on which channel. `success` is only ever true
/// when the channel itself confirmed the action; an SSH run whose
/// verification step failed reports failure, never silence.
#[derive(Debug, Clone)]
pub struct RemediationOutcome {
    pub success: bool,
    pub channel: RemediationChannel,
    pub message: String,
}

pub struct Remediator {
    logger: Logger,
    agent: Arc<dyn AgentChannel>,
    fallback: Arc<dyn CommandChannel>,
    agent_download_url: String,
}

impl Remediator {
    pub fn new(
        logger: Logger,
        agent: Arc<dyn AgentChannel>,
        fallback: Arc<dyn CommandChannel>,
        agent_download_url: String,
    ) -> Self {
        Self {
            logger: logger.child("remediation"),
            agent,
            fallback,
            agent_download_url,
        }
    }

    /// Ordered strategy chain: agent HTTP first, SSH second. The SSH
    /// sequence ends with a verification command so a half-applied run
    /// cannot masquerade as success.
    pub async fn remediate(
        &self,
        kind: RemediationKind,
        endpoint: &AgentEndpoint,
        target: &SshTarget,
    ) -> Result<RemediationOutcome, ControlError> {
        let agent_result = match kind {
            RemediationKind::RestartAgent => self.agent.restart_agent(endpoint).await,
            RemediationKind::RedeployAgent => self.agent.redeploy_agent(endpoint).await,
        };
        let agent_error = match agent_result {
            Ok(()) => {
                return Ok(RemediationOutcome {
                    success: true,
                    channel: RemediationChannel::Agent,
                    message: format!("Agent accepted {}", kind.as_str()),
                });
            }
            Err(err) => err,
        };
        self.logger.warn(
            &format!(
                "Agent channel failed for {}, falling back to SSH",
                kind.as_str()
            ),
            Some(&serde_json::json!({ "error": agent_error.message })),
        );

        let commands = self.ssh_commands(kind);
        let outcome = run_sequence(
            self.fallback.as_ref(),
            target,
            &commands,
            network::TIMEOUT_SSH_EXEC_DEFAULT_MS,
        )
        .await;

        match outcome {
            Ok(sequence) if sequence.success => Ok(RemediationOutcome {
                success: true,
                channel: RemediationChannel::Ssh,
                message: format!("SSH fallback completed {}", kind.as_str()),
            }),
            Ok(sequence) => {
                let step = sequence.failed_step.unwrap_or_default();
                let stderr = sequence
                    .steps
                    .last()
                    .map(|s| s.stderr.trim().to_string())
                    .unwrap_or_default();
                Ok(RemediationOutcome {
                    success: false,
                    channel: RemediationChannel::Ssh,
                    message: format!(
                        "Both channels failed: agent ({}); ssh step '{}' failed ({})",
                        agent_error.message, step, stderr
                    ),
                })
            }
            Err(ssh_error) => Ok(RemediationOutcome {
                success: false,
                channel: RemediationChannel::Ssh,
                message: format!(
                    "Both channels failed: agent ({}); ssh ({})",
                    agent_error.message, ssh_error.message
                ),
            }),
        }
    }

    fn ssh_commands(&self, kind: RemediationKind) -> Vec<String> {
        let service = agent_constants::SERVICE_NAME;
        let binary = format!("{}/{}", agent_constants::INSTALL_DIR, service);
        let mut commands = Vec::new();
        if kind == RemediationKind::RedeployAgent {
            commands.push(format!(
                "curl -fsSL {} -o {}.new",
                self.agent_download_url, binary
            ));
            commands.push(format!("chmod 0755 {}.new", binary));
            commands.push(format!("mv {}.new {}", binary, binary));
        }
        commands.push(format!("systemctl restart {}", service));
        commands.push("sleep 2".to_string());
        // Verification: the unit must be active or the whole run failed.
        commands.push(format!("systemctl is-active {}", service));
        commands
    }
}

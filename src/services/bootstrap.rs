use crate::constants::{agent, network};

/// Inputs for the first-boot script baked into the provider's user_data.
pub struct BootstrapParams<'a> {
    pub toolbox_id: &'a str,
    pub agent_token: &'a str,
    pub agent_port: u16,
    pub agent_download_url: &'a str,
}

impl<'a> BootstrapParams<'a> {
    pub fn new(toolbox_id: &'a str, agent_token: &'a str, agent_download_url: &'a str) -> Self {
        Self {
            toolbox_id,
            agent_token,
            agent_port: network::AGENT_DEFAULT_PORT,
            agent_download_url,
        }
    }
}

/// Render the host bootstrap script. Runs once under cloud-init as root:
/// installs the container runtime, drops the agent env file (0600, token
/// inside), installs the agent binary and starts it under systemd.
pub fn render_bootstrap_script(params: &BootstrapParams<'_>) -> String {
    let env_dir = parent_dir(agent::ENV_FILE);
    let unit_path = format!("/etc/systemd/system/{}.service", agent::SERVICE_NAME);
    let binary_path = format!("{}/{}", agent::INSTALL_DIR, agent::SERVICE_NAME);

    let mut lines: Vec<String> = Vec::new();
    lines.push("#!/bin/bash".to_string());
    lines.push("set -euo pipefail".to_string());
    lines.push(String::new());
    lines.push("export DEBIAN_FRONTEND=noninteractive".to_string());
    lines.push("apt-get update -qq".to_string());
    lines.push("apt-get install -y -qq docker.io curl".to_string());
    lines.push("systemctl enable --now docker".to_string());
    lines.push(String::new());
    lines.push(format!("mkdir -p {} {}", escape_shell_value(agent::INSTALL_DIR), escape_shell_value(&env_dir)));
    lines.push(format!(
        "curl -fsSL {} -o {}",
        escape_shell_value(params.agent_download_url),
        escape_shell_value(&binary_path)
    ));
    lines.push(format!("chmod 0755 {}", escape_shell_value(&binary_path)));
    lines.push(String::new());
    lines.push(format!("cat > {} <<'ENV'", agent::ENV_FILE));
    lines.push(format!("TOOLHOST_TOOLBOX_ID={}", params.toolbox_id));
    lines.push(format!("TOOLHOST_AGENT_TOKEN={}", params.agent_token));
    lines.push(format!("TOOLHOST_AGENT_PORT={}", params.agent_port));
    lines.push("ENV".to_string());
    lines.push(format!("chmod 0600 {}", escape_shell_value(agent::ENV_FILE)));
    lines.push(String::new());
    lines.push(format!("cat > {} <<'UNIT'", unit_path));
    lines.push("[Unit]".to_string());
    lines.push("Description=Toolhost management agent".to_string());
    lines.push("After=network-online.target docker.service".to_string());
    lines.push("Requires=docker.service".to_string());
    lines.push(String::new());
    lines.push("[Service]".to_string());
    lines.push(format!("EnvironmentFile={}", agent::ENV_FILE));
    lines.push(format!("ExecStart={} agent", binary_path));
    lines.push("Restart=always".to_string());
    lines.push("RestartSec=3".to_string());
    lines.push(String::new());
    lines.push("[Install]".to_string());
    lines.push("WantedBy=multi-user.target".to_string());
    lines.push("UNIT".to_string());
    lines.push(String::new());
    lines.push("systemctl daemon-reload".to_string());
    lines.push(format!("systemctl enable --now {}", agent::SERVICE_NAME));
    lines.push(String::new());
    lines.join("\n")
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

pub fn escape_shell_value(value: &str) -> String {
    let escaped = value.replace('"', "\\\"");
    format!("'{}'", escaped.replace('\'', "'\\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_carries_token_and_service_setup() {
        let params = BootstrapParams::new(
            "box-1",
            "secret-token",
            "https://releases.example.com/agent",
        );
        let script = render_bootstrap_script(&params);
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("TOOLHOST_AGENT_TOKEN=secret-token"));
        assert!(script.contains("TOOLHOST_TOOLBOX_ID=box-1"));
        assert!(script.contains("systemctl enable --now toolhost-agent"));
        assert!(script.contains("chmod 0600 '/etc/toolhost/agent.env'"));
    }

    #[test]
    fn shell_escaping_wraps_single_quotes() {
        assert_eq!(escape_shell_value("plain"), "'plain'");
        assert_eq!(escape_shell_value("a'b"), "'a'\\''b'");
    }
}

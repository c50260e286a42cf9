use crate::agent::api::{AgentTool, DeployToolRequest};
use crate::constants::agent as agent_constants;
use crate::errors::ControlError;
use async_trait::async_trait;
use tokio::process::Command;

/// Container operations the agent needs. The docker CLI backs production;
/// tests substitute an in-memory runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Every container carrying the managed label, any state. This is the
    /// registry: recomputed from the runtime on demand so an agent restart
    /// loses nothing.
    async fn list_managed(&self) -> Result<Vec<AgentTool>, ControlError>;
    async fn deploy(&self, request: &DeployToolRequest) -> Result<AgentTool, ControlError>;
    async fn start(&self, name: &str) -> Result<(), ControlError>;
    async fn stop(&self, name: &str) -> Result<(), ControlError>;
    /// Returns false when no such container existed.
    async fn remove(&self, name: &str) -> Result<bool, ControlError>;
}

pub struct DockerCli;

const LIST_FORMAT: &str = "{{.ID}}\t{{.Label \"toolhost.name\"}}\t{{.Label \"toolhost.image\"}}\t{{.State}}\t{{.Ports}}";

fn container_name(tool_name: &str) -> String {
    format!("toolhost-{}", tool_name)
}

async fn docker(args: &[&str]) -> Result<std::process::Output, ControlError> {
    Command::new("docker").args(args).output().await.map_err(|err| {
        ControlError::internal(format!("Failed to invoke docker: {}", err))
            .with_hint("The docker CLI must be installed on the host.")
    })
}

fn command_failed(context: &str, output: &std::process::Output) -> ControlError {
    ControlError::internal(format!(
        "{}: {}",
        context,
        String::from_utf8_lossy(&output.stderr).trim()
    ))
}

fn parse_list_line(line: &str) -> Option<AgentTool> {
    let mut fields = line.split('\t');
    let id = fields.next()?.trim();
    let name = fields.next()?.trim();
    let image = fields.next()?.trim();
    let state = fields.next()?.trim();
    let ports = fields.next().unwrap_or("").trim();
    if name.is_empty() {
        return None;
    }
    Some(AgentTool {
        name: name.to_string(),
        image: image.to_string(),
        container_id: if id.is_empty() {
            None
        } else {
            Some(id.to_string())
        },
        state: state.to_string(),
        ports: ports
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
    })
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_managed(&self) -> Result<Vec<AgentTool>, ControlError> {
        let filter = format!("label={}=true", agent_constants::MANAGED_LABEL);
        let output = docker(&[
            "ps",
            "-a",
            "--filter",
            filter.as_str(),
            "--format",
            LIST_FORMAT,
        ])
        .await?;
        if !output.status.success() {
            return Err(command_failed("docker ps failed", &output));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().filter_map(parse_list_line).collect())
    }

    async fn deploy(&self, request: &DeployToolRequest) -> Result<AgentTool, ControlError> {
        let target = container_name(&request.name);

        let pull = docker(&["pull", request.image.as_str()]).await?;
        if !pull.status.success() {
            return Err(command_failed(
                &format!("docker pull {} failed", request.image),
                &pull,
            ));
        }

        // Replace semantics: drop any previous container under this name.
        let _ = docker(&["rm", "-f", target.as_str()]).await?;

        let managed_label = format!("{}=true", agent_constants::MANAGED_LABEL);
        let name_label = format!("{}={}", agent_constants::NAME_LABEL, request.name);
        let image_label = format!("{}={}", agent_constants::IMAGE_LABEL, request.image);
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--restart".into(),
            "unless-stopped".into(),
            "--name".into(),
            target,
            "--label".into(),
            managed_label,
            "--label".into(),
            name_label,
            "--label".into(),
            image_label,
        ];
        for binding in &request.ports {
            args.push("-p".into());
            args.push(binding.clone());
        }
        for (key, value) in &request.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        args.push(request.image.clone());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = docker(&arg_refs).await?;
        if !output.status.success() {
            return Err(command_failed(
                &format!("docker run for {} failed", request.name),
                &output,
            ));
        }
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(AgentTool {
            name: request.name.clone(),
            image: request.image.clone(),
            container_id: Some(container_id),
            state: "running".to_string(),
            ports: request.ports.clone(),
        })
    }

    async fn start(&self, name: &str) -> Result<(), ControlError> {
        let output = docker(&["start", container_name(name).as_str()]).await?;
        if !output.status.success() {
            return Err(classify_missing(name, &output));
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), ControlError> {
        let output = docker(&["stop", container_name(name).as_str()]).await?;
        if !output.status.success() {
            return Err(classify_missing(name, &output));
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool, ControlError> {
        let output = docker(&["rm", "-f", container_name(name).as_str()]).await?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such container") {
            return Ok(false);
        }
        Err(command_failed(&format!("docker rm for {} failed", name), &output))
    }
}

fn classify_missing(name: &str, output: &std::process::Output) -> ControlError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("No such container") {
        ControlError::not_found(format!("No tool named {} on this host", name))
    } else {
        command_failed(&format!("docker command for {} failed", name), output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_line_parses_tab_separated_fields() {
        let tool =
            parse_list_line("abc123\tredis\tredis:7\trunning\t0.0.0.0:6379->6379/tcp").unwrap();
        assert_eq!(tool.name, "redis");
        assert_eq!(tool.image, "redis:7");
        assert_eq!(tool.state, "running");
        assert_eq!(tool.container_id.as_deref(), Some("abc123"));
        assert_eq!(tool.ports, vec!["0.0.0.0:6379->6379/tcp"]);
    }

    #[test]
    fn list_line_without_name_label_is_skipped() {
        assert!(parse_list_line("abc123\t\timg\trunning\t").is_none());
        assert!(parse_list_line("").is_none());
    }

    #[test]
    fn container_names_are_prefixed() {
        assert_eq!(container_name("redis"), "toolhost-redis");
    }
}

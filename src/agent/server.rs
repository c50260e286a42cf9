use crate::agent::api::{
    AgentActionResponse, AgentStatusReport, AgentTool, DeployToolRequest, HostMetrics,
};
use crate::agent::runtime::ContainerRuntime;
use crate::constants::agent as agent_constants;
use crate::constants::network;
use crate::errors::{ControlError, ControlErrorKind};
use crate::services::logger::Logger;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;

pub struct AgentState {
    logger: Logger,
    runtime: Arc<dyn ContainerRuntime>,
    toolbox_id: String,
    auth_token: String,
    started_at: Instant,
}

/// HTTP status for each error kind crossing the agent boundary.
struct ApiError(ControlError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ControlErrorKind::InvalidParams => StatusCode::BAD_REQUEST,
            ControlErrorKind::Denied => StatusCode::FORBIDDEN,
            ControlErrorKind::NotFound => StatusCode::NOT_FOUND,
            ControlErrorKind::Conflict => StatusCode::CONFLICT,
            ControlErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ControlErrorKind::Retryable => StatusCode::SERVICE_UNAVAILABLE,
            ControlErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "code": self.0.code,
            "message": self.0.message,
        });
        (status, Json(body)).into_response()
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        ApiError(err)
    }
}

async fn require_bearer(
    State(state): State<Arc<AgentState>>,
    request: Request,
    next: Next,
) -> Response {
    let expected = format!("Bearer {}", state.auth_token);
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if presented != expected {
        state.logger.warn("Rejected request with bad bearer token", None);
        return ApiError(ControlError::denied("Invalid agent token")).into_response();
    }
    next.run(request).await
}

pub fn router(
    logger: Logger,
    runtime: Arc<dyn ContainerRuntime>,
    toolbox_id: String,
    auth_token: String,
) -> Router {
    let state = Arc::new(AgentState {
        logger: logger.child("agent"),
        runtime,
        toolbox_id,
        auth_token,
        started_at: Instant::now(),
    });
    Router::new()
        .route("/status", get(status))
        .route("/tools", post(deploy_tool))
        .route("/tools/:name/start", post(start_tool))
        .route("/tools/:name/stop", post(stop_tool))
        .route("/tools/:name", delete(remove_tool))
        .route("/restart", post(restart_agent))
        .route("/redeploy", post(redeploy_agent))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ))
        .with_state(state)
}

pub async fn serve(
    logger: Logger,
    runtime: Arc<dyn ContainerRuntime>,
    toolbox_id: String,
    auth_token: String,
    port: u16,
) -> Result<(), ControlError> {
    let app = router(logger.clone(), runtime, toolbox_id, auth_token);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|err| {
            ControlError::internal(format!("Failed to bind agent port {}: {}", port, err))
        })?;
    logger.info(
        &format!("Agent listening on 0.0.0.0:{}", port),
        None,
    );
    axum::serve(listener, app)
        .await
        .map_err(|err| ControlError::internal(format!("Agent server stopped: {}", err)))
}

async fn status(
    State(state): State<Arc<AgentState>>,
) -> Result<Json<AgentStatusReport>, ApiError> {
    let tools: Vec<AgentTool> = state.runtime.list_managed().await?;
    Ok(Json(AgentStatusReport {
        toolbox_id: state.toolbox_id.clone(),
        agent_version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        host: collect_host_metrics(&state.logger).await,
        tools,
    }))
}

async fn deploy_tool(
    State(state): State<Arc<AgentState>>,
    Json(request): Json<DeployToolRequest>,
) -> Result<Json<AgentTool>, ApiError> {
    if request.name.trim().is_empty() || request.image.trim().is_empty() {
        return Err(ControlError::invalid_params("name and image are required").into());
    }
    state.logger.info(
        &format!("Deploying tool {}", request.name),
        Some(&serde_json::json!({ "image": request.image })),
    );
    let tool = state.runtime.deploy(&request).await?;
    Ok(Json(tool))
}

async fn start_tool(
    State(state): State<Arc<AgentState>>,
    Path(name): Path<String>,
) -> Result<Json<AgentActionResponse>, ApiError> {
    state.runtime.start(&name).await?;
    Ok(Json(AgentActionResponse::ok(format!("Started {}", name))))
}

async fn stop_tool(
    State(state): State<Arc<AgentState>>,
    Path(name): Path<String>,
) -> Result<Json<AgentActionResponse>, ApiError> {
    state.runtime.stop(&name).await?;
    Ok(Json(AgentActionResponse::ok(format!("Stopped {}", name))))
}

async fn remove_tool(
    State(state): State<Arc<AgentState>>,
    Path(name): Path<String>,
) -> Result<Json<AgentActionResponse>, ApiError> {
    let existed = state.runtime.remove(&name).await?;
    if !existed {
        return Err(ControlError::not_found(format!("No tool named {}", name)).into());
    }
    Ok(Json(AgentActionResponse::ok(format!("Removed {}", name))))
}

/// Replies before acting: the restart tears this process down, so the
/// caller gets its 202 first and systemd brings the agent back.
async fn restart_agent(
    State(state): State<Arc<AgentState>>,
) -> (StatusCode, Json<AgentActionResponse>) {
    state.logger.info("Restart requested", None);
    tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let _ = Command::new("systemctl")
            .args(["restart", agent_constants::SERVICE_NAME])
            .spawn();
    });
    (
        StatusCode::ACCEPTED,
        Json(AgentActionResponse::ok("Restarting agent")),
    )
}

async fn redeploy_agent(
    State(state): State<Arc<AgentState>>,
) -> Result<(StatusCode, Json<AgentActionResponse>), ApiError> {
    let Ok(update_url) = std::env::var("TOOLHOST_AGENT_UPDATE_URL") else {
        return Err(ControlError::invalid_params(
            "TOOLHOST_AGENT_UPDATE_URL is not configured on this host",
        )
        .into());
    };
    state.logger.info("Redeploy requested", None);
    let binary = format!(
        "{}/{}",
        agent_constants::INSTALL_DIR,
        agent_constants::SERVICE_NAME
    );
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let script = format!(
            "curl -fsSL {url} -o {bin}.new && chmod 0755 {bin}.new && mv {bin}.new {bin} && systemctl restart {service}",
            url = update_url,
            bin = binary,
            service = agent_constants::SERVICE_NAME
        );
        let _ = Command::new("sh").args(["-c", &script]).spawn();
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(AgentActionResponse::ok("Redeploying agent")),
    ))
}

/// Best effort host metrics from /proc and df. A metrics failure never
/// fails a status call.
async fn collect_host_metrics(logger: &Logger) -> HostMetrics {
    let mut metrics = HostMetrics::default();

    match tokio::fs::read_to_string("/proc/loadavg").await {
        Ok(raw) => {
            if let Some(first) = raw.split_whitespace().next() {
                metrics.load_average_1m = first.parse().unwrap_or(0.0);
            }
        }
        Err(err) => logger.warn(&format!("Could not read loadavg: {}", err), None),
    }

    match tokio::fs::read_to_string("/proc/meminfo").await {
        Ok(raw) => {
            for line in raw.lines() {
                if let Some(rest) = line.strip_prefix("MemTotal:") {
                    metrics.memory_total_bytes = parse_meminfo_kb(rest);
                } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
                    metrics.memory_available_bytes = parse_meminfo_kb(rest);
                }
            }
        }
        Err(err) => logger.warn(&format!("Could not read meminfo: {}", err), None),
    }

    match Command::new("df").args(["-kP", "/"]).output().await {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if let Some(line) = stdout.lines().nth(1) {
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() >= 4 {
                    metrics.disk_total_bytes = fields[1].parse::<u64>().unwrap_or(0) * 1024;
                    metrics.disk_available_bytes = fields[3].parse::<u64>().unwrap_or(0) * 1024;
                }
            }
        }
        Ok(output) => logger.warn(
            &format!(
                "df failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            None,
        ),
        Err(err) => logger.warn(&format!("Could not run df: {}", err), None),
    }

    metrics
}

fn parse_meminfo_kb(rest: &str) -> u64 {
    rest.trim()
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .unwrap_or(0)
}

/// Entry point for `toolhost agent`: configuration comes from the env file
/// the bootstrap script wrote.
pub async fn run_from_env(logger: Logger) -> Result<(), ControlError> {
    let toolbox_id = std::env::var("TOOLHOST_TOOLBOX_ID")
        .map_err(|_| ControlError::invalid_params("TOOLHOST_TOOLBOX_ID is required"))?;
    let auth_token = std::env::var("TOOLHOST_AGENT_TOKEN")
        .map_err(|_| ControlError::invalid_params("TOOLHOST_AGENT_TOKEN is required"))?;
    let port = std::env::var("TOOLHOST_AGENT_PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(network::AGENT_DEFAULT_PORT);
    serve(
        logger,
        Arc::new(crate::agent::runtime::DockerCli),
        toolbox_id,
        auth_token,
        port,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meminfo_values_scale_to_bytes() {
        assert_eq!(parse_meminfo_kb("  16384 kB"), 16384 * 1024);
        assert_eq!(parse_meminfo_kb("garbage"), 0);
    }
}

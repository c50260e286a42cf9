use crate::agent::api::{AgentStatusReport, AgentTool, DeployToolRequest};
use crate::constants::network;
use crate::errors::ControlError;
use crate::services::logger::Logger;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;

/// Where to reach one toolbox's agent. Built from the record at call time;
/// the token never leaves this struct except as the Authorization header.
#[derive(Clone)]
pub struct AgentEndpoint {
    pub address: String,
    pub port: u16,
    pub token: String,
}

impl AgentEndpoint {
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: network::AGENT_DEFAULT_PORT,
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.address, self.port, path)
    }
}

/// Primary actuation channel. One implementation speaks HTTP to the real
/// agent; tests substitute scripted channels.
#[async_trait]
pub trait AgentChannel: Send + Sync {
    async fn fetch_status(&self, endpoint: &AgentEndpoint)
        -> Result<AgentStatusReport, ControlError>;
    async fn deploy_tool(
        &self,
        endpoint: &AgentEndpoint,
        request: &DeployToolRequest,
    ) -> Result<AgentTool, ControlError>;
    async fn start_tool(&self, endpoint: &AgentEndpoint, name: &str) -> Result<(), ControlError>;
    async fn stop_tool(&self, endpoint: &AgentEndpoint, name: &str) -> Result<(), ControlError>;
    async fn remove_tool(&self, endpoint: &AgentEndpoint, name: &str) -> Result<(), ControlError>;
    async fn restart_agent(&self, endpoint: &AgentEndpoint) -> Result<(), ControlError>;
    async fn redeploy_agent(&self, endpoint: &AgentEndpoint) -> Result<(), ControlError>;
}

#[derive(Clone)]
pub struct AgentClient {
    logger: Logger,
    client: Client,
    timeout_ms: u64,
}

impl AgentClient {
    pub fn new(logger: Logger) -> Self {
        let client = Client::builder()
            .user_agent("toolhost/0.4")
            .build()
            .expect("reqwest client");
        Self {
            logger: logger.child("agent_client"),
            client,
            timeout_ms: network::TIMEOUT_AGENT_STATUS_MS,
        }
    }

    fn build_headers(&self, token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    async fn request_json(
        &self,
        endpoint: &AgentEndpoint,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout_ms: u64,
    ) -> Result<Value, ControlError> {
        self.logger.debug(&format!("{} {}", method, path), None);
        let mut request = self
            .client
            .request(method, endpoint.url(path))
            .headers(self.build_headers(&endpoint.token));
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = tokio::time::timeout(Duration::from_millis(timeout_ms), request.send())
            .await
            .map_err(|_| ControlError::timeout("Agent request timed out"))?
            .map_err(|err| ControlError::retryable(format!("Agent unreachable: {}", err)))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let parsed: Option<Value> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let detail = parsed
                .as_ref()
                .and_then(|v| v.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let message = if detail.is_empty() {
                format!("Agent request failed ({})", status.as_u16())
            } else {
                format!("Agent request failed ({}): {}", status.as_u16(), detail)
            };
            let err = if status.as_u16() == 401 || status.as_u16() == 403 {
                ControlError::denied(message)
            } else if status.as_u16() == 404 {
                ControlError::not_found(message)
            } else if status.as_u16() == 429 || status.is_server_error() {
                ControlError::retryable(message)
            } else {
                ControlError::invalid_params(message)
            };
            return Err(err);
        }

        Ok(parsed.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl AgentChannel for AgentClient {
    async fn fetch_status(
        &self,
        endpoint: &AgentEndpoint,
    ) -> Result<AgentStatusReport, ControlError> {
        let value = self
            .request_json(endpoint, Method::GET, "/status", None, self.timeout_ms)
            .await?;
        serde_json::from_value(value)
            .map_err(|err| ControlError::internal(format!("Malformed agent status: {}", err)))
    }

    async fn deploy_tool(
        &self,
        endpoint: &AgentEndpoint,
        request: &DeployToolRequest,
    ) -> Result<AgentTool, ControlError> {
        let body = serde_json::to_value(request)
            .map_err(|err| ControlError::internal(format!("Unserializable request: {}", err)))?;
        let value = self
            .request_json(
                endpoint,
                Method::POST,
                "/tools",
                Some(body),
                network::TIMEOUT_AGENT_ACTION_MS,
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|err| ControlError::internal(format!("Malformed agent response: {}", err)))
    }

    async fn start_tool(&self, endpoint: &AgentEndpoint, name: &str) -> Result<(), ControlError> {
        self.request_json(
            endpoint,
            Method::POST,
            &format!("/tools/{}/start", name),
            None,
            network::TIMEOUT_AGENT_ACTION_MS,
        )
        .await?;
        Ok(())
    }

    async fn stop_tool(&self, endpoint: &AgentEndpoint, name: &str) -> Result<(), ControlError> {
        self.request_json(
            endpoint,
            Method::POST,
            &format!("/tools/{}/stop", name),
            None,
            network::TIMEOUT_AGENT_ACTION_MS,
        )
        .await?;
        Ok(())
    }

    async fn remove_tool(&self, endpoint: &AgentEndpoint, name: &str) -> Result<(), ControlError> {
        self.request_json(
            endpoint,
            Method::DELETE,
            &format!("/tools/{}", name),
            None,
            network::TIMEOUT_AGENT_ACTION_MS,
        )
        .await?;
        Ok(())
    }

    async fn restart_agent(&self, endpoint: &AgentEndpoint) -> Result<(), ControlError> {
        self.request_json(
            endpoint,
            Method::POST,
            "/restart",
            None,
            network::TIMEOUT_AGENT_ACTION_MS,
        )
        .await?;
        Ok(())
    }

    async fn redeploy_agent(&self, endpoint: &AgentEndpoint) -> Result<(), ControlError> {
        self.request_json(
            endpoint,
            Method::POST,
            "/redeploy",
            None,
            network::TIMEOUT_AGENT_ACTION_MS,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_builds_http_urls() {
        let endpoint = AgentEndpoint::new("203.0.113.7", "tok");
        assert_eq!(endpoint.url("/status"), "http://203.0.113.7:8700/status");
    }
}

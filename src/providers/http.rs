use super::{ComputeProvider, CreatedHost, HostRequest};
use crate::constants::network::TIMEOUT_PROVIDER_REQUEST_MS;
use crate::constants::reconcile::{ADDRESS_POLL_MS, ADDRESS_WAIT_MS};
use crate::errors::ControlError;
use crate::services::logger::Logger;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Droplet-style compute API client. Create/delete host and key
/// registration; every call carries a bounded timeout, and HTTP status
/// codes map onto the crate error taxonomy.
pub struct HttpComputeProvider {
    logger: Logger,
    client: Client,
    base_url: String,
    api_token: String,
    timeout_ms: u64,
}

impl HttpComputeProvider {
    pub fn new(logger: Logger, base_url: &str, api_token: &str) -> Result<Self, ControlError> {
        let normalized = normalize_base_url(base_url)?;
        let client = Client::builder()
            .user_agent("toolhost/0.4")
            .build()
            .map_err(|err| ControlError::internal(format!("http client: {}", err)))?;
        Ok(Self {
            logger: logger.child("provider"),
            client,
            base_url: normalized,
            api_token: api_token.to_string(),
            timeout_ms: TIMEOUT_PROVIDER_REQUEST_MS,
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.api_token)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ControlError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .request(method, &url)
            .headers(self.headers());
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = tokio::time::timeout(Duration::from_millis(self.timeout_ms), request.send())
            .await
            .map_err(|_| ControlError::timeout("Compute provider request timed out"))?
            .map_err(|err| {
                ControlError::retryable(format!("Compute provider request failed: {}", err))
            })?;

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
                format!("Compute provider rejected request ({})", status.as_u16())
            } else {
                format!(
                    "Compute provider rejected request ({}): {}",
                    status.as_u16(),
                    detail
                )
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

    fn parse_host(value: &Value) -> Result<CreatedHost, ControlError> {
        let host = value
            .get("droplet")
            .or_else(|| value.get("host"))
            .unwrap_or(value);
        let host_id = host
            .get("id")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty() && s != "null")
            .ok_or_else(|| ControlError::internal("Provider response is missing host id"))?;
        let public_address = host
            .get("networks")
            .and_then(|v| v.get("v4"))
            .and_then(|v| v.as_array())
            .and_then(|nets| {
                nets.iter().find(|net| {
                    net.get("type").and_then(|v| v.as_str()) == Some("public")
                })
            })
            .and_then(|net| net.get("ip_address"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Ok(CreatedHost {
            host_id,
            public_address,
        })
    }
}

#[async_trait]
impl ComputeProvider for HttpComputeProvider {
    async fn register_ssh_key(
        &self,
        key_name: &str,
        public_key: &str,
    ) -> Result<String, ControlError> {
        let response = self
            .request_json(
                Method::POST,
                "/v2/account/keys",
                Some(serde_json::json!({
                    "name": key_name,
                    "public_key": public_key,
                })),
            )
            .await?;
        let key = response.get("ssh_key").unwrap_or(&response);
        key.get("id")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty() && s != "null")
            .ok_or_else(|| ControlError::internal("Provider response is missing ssh key id"))
    }

    async fn create_host(&self, request: &HostRequest) -> Result<CreatedHost, ControlError> {
        self.logger.info(
            "creating host",
            Some(&serde_json::json!({
                "name": request.name,
                "region": request.region,
                "size": request.size_class,
            })),
        );
        let response = self
            .request_json(
                Method::POST,
                "/v2/droplets",
                Some(serde_json::json!({
                    "name": request.name,
                    "region": request.region,
                    "size": request.size_class,
                    "image": "ubuntu-24-04-x64",
                    "ssh_keys": request.ssh_key_ids,
                    "user_data": request.init_script,
                })),
            )
            .await?;
        let mut created = Self::parse_host(&response)?;

        // The public address usually lags the create acknowledgment; wait a
        // bounded interval for it so the reconciler has a poll target.
        let deadline = std::time::Instant::now() + Duration::from_millis(ADDRESS_WAIT_MS);
        while created.public_address.is_none() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(ADDRESS_POLL_MS)).await;
            let path = format!("/v2/droplets/{}", created.host_id);
            match self.request_json(Method::GET, &path, None).await {
                Ok(value) => {
                    if let Ok(refreshed) = Self::parse_host(&value) {
                        created.public_address = refreshed.public_address;
                    }
                }
                Err(err) if err.retryable => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(created)
    }

    async fn delete_host(&self, host_id: &str) -> Result<(), ControlError> {
        self.logger
            .info("deleting host", Some(&serde_json::json!({ "host_id": host_id })));
        let path = format!("/v2/droplets/{}", host_id);
        match self.request_json(Method::DELETE, &path, None).await {
            Ok(_) => Ok(()),
            // A missing host has already been torn down; deletion is
            // idempotent on the provider side.
            Err(err) if err.code == "NOT_FOUND" => Ok(()),
            Err(err) => Err(err),
        }
    }
}

fn normalize_base_url(raw: &str) -> Result<String, ControlError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ControlError::invalid_params("provider base URL is required"));
    }
    let mut url = Url::parse(raw)
        .map_err(|_| ControlError::invalid_params("Invalid provider base URL"))?;
    url.set_fragment(None);
    url.set_query(None);
    let normalized = format!("{}{}", url.origin().ascii_serialization(), url.path());
    Ok(normalized.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_with_public_address() {
        let value = serde_json::json!({
            "droplet": {
                "id": 4221,
                "networks": { "v4": [
                    { "type": "private", "ip_address": "10.0.0.4" },
                    { "type": "public", "ip_address": "203.0.113.10" }
                ]}
            }
        });
        let host = HttpComputeProvider::parse_host(&value).unwrap();
        assert_eq!(host.host_id, "4221");
        assert_eq!(host.public_address.as_deref(), Some("203.0.113.10"));
    }

    #[test]
    fn parses_host_without_networks_yet() {
        let value = serde_json::json!({ "droplet": { "id": "77" } });
        let host = HttpComputeProvider::parse_host(&value).unwrap();
        assert_eq!(host.host_id, "77");
        assert!(host.public_address.is_none());
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(
            normalize_base_url("https://api.example.com/").unwrap(),
            "https://api.example.com"
        );
        assert!(normalize_base_url("not a url").is_err());
    }
}

use crate::errors::ControlError;
use crate::model::SshKeyPair;
use crate::providers::ComputeProvider;
use crate::services::logger::Logger;
use crate::services::secrets::SecretStore;
use crate::stores::ToolboxStore;
use base64::Engine;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use uuid::Uuid;

const DEPLOY_KEY_NAME: &str = "toolhost-deploy";

/// Key material handed to a provision or fallback call. Plaintext lives
/// only in memory; at rest both halves sit sealed in the secret store.
pub struct DeploymentKeys {
    pub public_key: String,
    pub private_key_pem: String,
    pub fingerprint: String,
    pub provider_key_id: String,
}

pub struct SshKeyService {
    logger: Logger,
    store: ToolboxStore,
    secrets: Arc<SecretStore>,
    provider: Arc<dyn ComputeProvider>,
}

impl SshKeyService {
    pub fn new(
        logger: Logger,
        store: ToolboxStore,
        secrets: Arc<SecretStore>,
        provider: Arc<dyn ComputeProvider>,
    ) -> Self {
        Self {
            logger: logger.child("keys"),
            store,
            secrets,
            provider,
        }
    }

    /// Idempotent: returns the owner's deployment key pair, generating and
    /// registering one on first use. Concurrent first calls are serialized
    /// by the store's primary key; the loser re-reads.
    pub async fn ensure_keys(&self, owner_id: &str) -> Result<SshKeyPair, ControlError> {
        if let Some(existing) = self.store.get_key_pair(owner_id, DEPLOY_KEY_NAME)? {
            return Ok(existing);
        }

        let (public_key, private_key_pem) = generate_key_pair().await?;
        let fingerprint = fingerprint_public_key_sha256(&public_key)?;
        let provider_key_id = self
            .provider
            .register_ssh_key(
                &format!("{}-{}", DEPLOY_KEY_NAME, owner_id),
                &public_key,
            )
            .await?;

        let pair = SshKeyPair {
            owner_id: owner_id.to_string(),
            key_name: DEPLOY_KEY_NAME.to_string(),
            public_key_reference: self.secrets.put(&public_key)?,
            private_key_reference: self.secrets.put(&private_key_pem)?,
            fingerprint: fingerprint.clone(),
            provider_key_id,
            created_at: Utc::now(),
        };
        match self.store.insert_key_pair(&pair) {
            Ok(()) => {}
            Err(_) => {
                // Lost the insert race; the winner's row is authoritative.
                self.secrets.delete(&pair.public_key_reference)?;
                self.secrets.delete(&pair.private_key_reference)?;
                if let Some(existing) = self.store.get_key_pair(owner_id, DEPLOY_KEY_NAME)? {
                    return Ok(existing);
                }
                return Err(ControlError::internal(
                    "SSH key registration raced and neither row survived",
                ));
            }
        }
        self.logger.info(
            &format!("Generated deployment key for {}", owner_id),
            Some(&serde_json::json!({ "fingerprint": fingerprint })),
        );
        Ok(pair)
    }

    /// Resolve the stored references back to plaintext for actual use.
    pub async fn deployment_keys(&self, owner_id: &str) -> Result<DeploymentKeys, ControlError> {
        let pair = self.ensure_keys(owner_id).await?;
        Ok(DeploymentKeys {
            public_key: self.secrets.get(&pair.public_key_reference)?,
            private_key_pem: self.secrets.get(&pair.private_key_reference)?,
            fingerprint: pair.fingerprint,
            provider_key_id: pair.provider_key_id,
        })
    }
}

/// Shell out to ssh-keygen for an RSA-4096 pair in PEM form. The key files
/// are written to a scratch path and removed before returning.
async fn generate_key_pair() -> Result<(String, String), ControlError> {
    let scratch: PathBuf = std::env::temp_dir().join(format!("toolhost-key-{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&scratch).await?;
    let key_path = scratch.join("id_rsa");

    let result = run_keygen(&key_path).await;
    let cleanup = tokio::fs::remove_dir_all(&scratch).await;
    let pair = result?;
    cleanup?;
    Ok(pair)
}

async fn run_keygen(key_path: &std::path::Path) -> Result<(String, String), ControlError> {
    let output = Command::new("ssh-keygen")
        .args(["-t", "rsa", "-b", "4096", "-m", "PEM", "-N", "", "-q", "-f"])
        .arg(key_path)
        .output()
        .await
        .map_err(|err| {
            ControlError::internal(format!("Failed to invoke ssh-keygen: {}", err))
                .with_hint("ssh-keygen must be on PATH for key provisioning.")
        })?;
    if !output.status.success() {
        return Err(ControlError::internal(format!(
            "ssh-keygen exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let private_key_pem = tokio::fs::read_to_string(key_path).await?;
    let public_key = tokio::fs::read_to_string(key_path.with_extension("pub"))
        .await?
        .trim()
        .to_string();
    Ok((public_key, private_key_pem))
}

/// OpenSSH-style fingerprint: SHA256 of the base64 key blob, encoded
/// without padding.
pub fn fingerprint_public_key_sha256(line: &str) -> Result<String, ControlError> {
    let mut tokens = line.split_whitespace();
    let key_type = tokens.next().unwrap_or("");
    let key_blob = tokens.next().unwrap_or("");
    if !key_type.starts_with("ssh-") && !key_type.starts_with("ecdsa-") {
        return Err(ControlError::invalid_params(format!(
            "Not an OpenSSH public key line: {}",
            key_type
        )));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(key_blob.as_bytes())
        .map_err(|_| ControlError::invalid_params("Public key blob is not valid base64"))?;
    let hash = Sha256::digest(&bytes);
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    Ok(format!("SHA256:{}", encoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_matches_openssh_shape() {
        // "test" in base64 is dGVzdA==; the fingerprint is Sha256("test").
        let line = "ssh-rsa dGVzdA== user@host";
        let fp = fingerprint_public_key_sha256(line).unwrap();
        assert!(fp.starts_with("SHA256:"));
        assert!(!fp.ends_with('='));
    }

    #[test]
    fn fingerprint_rejects_garbage() {
        assert!(fingerprint_public_key_sha256("not a key").is_err());
        assert!(fingerprint_public_key_sha256("ssh-rsa ???").is_err());
    }
}

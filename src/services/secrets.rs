use crate::errors::ControlError;
use crate::services::logger::Logger;
use crate::services::security::Security;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

const REF_SCHEME: &str = "sealed:";

/// File-backed secret store. Callers hold opaque `sealed:<uuid>` references;
/// entries are AES-GCM sealed blobs, one file per secret, 0600.
#[derive(Clone)]
pub struct SecretStore {
    logger: Logger,
    security: Arc<Security>,
    dir: PathBuf,
}

impl SecretStore {
    pub fn new(logger: Logger, security: Arc<Security>, dir: PathBuf) -> Result<Self, ControlError> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            logger: logger.child("secrets"),
            security,
            dir,
        })
    }

    fn entry_path(&self, id: &str) -> Result<PathBuf, ControlError> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
            return Err(ControlError::invalid_params("Malformed secret reference"));
        }
        Ok(self.dir.join(id))
    }

    /// Seals `plaintext` and returns an opaque reference to it.
    pub fn put(&self, plaintext: &str) -> Result<String, ControlError> {
        let id = uuid::Uuid::new_v4().to_string();
        let sealed = self.security.seal(plaintext)?;
        let path = self.entry_path(&id)?;
        fs::write(&path, sealed)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o600));
        }
        self.logger.debug("stored secret", None);
        Ok(format!("{}{}", REF_SCHEME, id))
    }

    pub fn get(&self, reference: &str) -> Result<String, ControlError> {
        let id = reference
            .strip_prefix(REF_SCHEME)
            .ok_or_else(|| ControlError::invalid_params("Unknown secret reference scheme"))?;
        let path = self.entry_path(id)?;
        let sealed = fs::read_to_string(&path)
            .map_err(|_| ControlError::not_found(format!("Secret reference not found: {}", reference)))?;
        self.security.open(sealed.trim())
    }

    pub fn delete(&self, reference: &str) -> Result<(), ControlError> {
        let id = reference
            .strip_prefix(REF_SCHEME)
            .ok_or_else(|| ControlError::invalid_params("Unknown secret reference scheme"))?;
        let path = self.entry_path(id)?;
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

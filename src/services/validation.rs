use crate::constants::allowlist;
use crate::constants::limits::{MAX_INSTANCE_NAME_LEN, MAX_TOOLBOX_NAME_LEN};
use crate::errors::ControlError;
use crate::model::ProvisionConfig;

#[derive(Clone)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_name(&self, value: &str, label: &str) -> Result<String, ControlError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ControlError::invalid_params(format!(
                "{} must be a non-empty string",
                label
            )));
        }
        if trimmed.len() > MAX_TOOLBOX_NAME_LEN {
            return Err(ControlError::invalid_params(format!(
                "{} must be at most {} characters",
                label, MAX_TOOLBOX_NAME_LEN
            )));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ControlError::invalid_params(format!(
                "{} may only contain letters, digits, '-' and '_'",
                label
            )));
        }
        Ok(trimmed.to_string())
    }

    pub fn ensure_instance_name(&self, value: &str) -> Result<String, ControlError> {
        let name = self.ensure_name(value, "instance_name")?;
        if name.len() > MAX_INSTANCE_NAME_LEN {
            return Err(ControlError::invalid_params(format!(
                "instance_name must be at most {} characters",
                MAX_INSTANCE_NAME_LEN
            )));
        }
        Ok(name)
    }

    pub fn ensure_owner(&self, value: &str) -> Result<String, ControlError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ControlError::denied("owner_id must resolve to a principal"));
        }
        Ok(trimmed.to_string())
    }

    /// Configuration errors fail fast here and never enter the state machine.
    pub fn ensure_provision_config(
        &self,
        config: &ProvisionConfig,
    ) -> Result<ProvisionConfig, ControlError> {
        let name = self.ensure_name(&config.name, "name")?;
        let region = config.region.trim().to_lowercase();
        if !allowlist::REGIONS.contains(&region.as_str()) {
            return Err(ControlError::invalid_params(format!(
                "region '{}' is not allowed",
                region
            ))
            .with_details(serde_json::json!({ "allowed_regions": allowlist::REGIONS })));
        }
        let size_class = config.size_class.trim().to_lowercase();
        if !allowlist::SIZE_CLASSES.contains(&size_class.as_str()) {
            return Err(ControlError::invalid_params(format!(
                "size_class '{}' is not allowed",
                size_class
            ))
            .with_details(serde_json::json!({ "allowed_sizes": allowlist::SIZE_CLASSES })));
        }
        Ok(ProvisionConfig {
            name,
            region,
            size_class,
        })
    }
}

impl Default for Validation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(region: &str, size: &str) -> ProvisionConfig {
        ProvisionConfig {
            name: "t1".to_string(),
            region: region.to_string(),
            size_class: size.to_string(),
        }
    }

    #[test]
    fn rejects_unknown_region() {
        let err = Validation::new()
            .ensure_provision_config(&config("mars-1", "s-1vcpu-1gb"))
            .unwrap_err();
        assert_eq!(err.code, "INVALID_PARAMS");
    }

    #[test]
    fn normalizes_case() {
        let ok = Validation::new()
            .ensure_provision_config(&config("NYC3", "S-1VCPU-1GB"))
            .unwrap();
        assert_eq!(ok.region, "nyc3");
        assert_eq!(ok.size_class, "s-1vcpu-1gb");
    }

    #[test]
    fn rejects_shell_hostile_names() {
        assert!(Validation::new().ensure_name("a;rm -rf", "name").is_err());
        assert!(Validation::new().ensure_name("ok-name_1", "name").is_ok());
    }
}

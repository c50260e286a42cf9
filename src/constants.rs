pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const AGENT_DEFAULT_PORT: u16 = 8700;
    pub const TIMEOUT_AGENT_STATUS_MS: u64 = 10_000;
    pub const TIMEOUT_AGENT_ACTION_MS: u64 = 10_000;
    pub const TIMEOUT_PROVIDER_REQUEST_MS: u64 = 30_000;
    pub const TIMEOUT_SSH_READY_MS: u64 = 10_000;
    pub const TIMEOUT_SSH_EXEC_DEFAULT_MS: u64 = 45_000;
    pub const KEEPALIVE_INTERVAL_MS: u64 = 30_000;
}

pub mod reconcile {
    pub const POLL_INTERVAL_MS: u64 = 15_000;
    /// Hard ceiling for a non-terminal state before escalation: `creating`
    /// that never heartbeats becomes `error_creation`, `active` that stops
    /// heartbeating becomes `unresponsive`.
    pub const STATE_CEILING_MS: u64 = 600_000;
    pub const ADDRESS_WAIT_MS: u64 = 90_000;
    pub const ADDRESS_POLL_MS: u64 = 5_000;
}

pub mod retry {
    pub const PROVIDER_MAX_ATTEMPTS: u32 = 1;
    pub const BACKOFF_MS: u64 = 150;
    pub const STATUS_CODES: &[u16] = &[408, 429, 500, 502, 503, 504];
}

pub mod limits {
    pub const MAX_CAPTURE_BYTES: usize = 256 * 1024;
    pub const MAX_TOOLBOX_NAME_LEN: usize = 63;
    pub const MAX_INSTANCE_NAME_LEN: usize = 63;
}

pub mod crypto {
    pub const KEY_SIZE: usize = 32;
    pub const IV_SIZE: usize = 12;
    pub const TAG_SIZE: usize = 16;
    pub const AGENT_TOKEN_BYTES: usize = 32;
}

pub mod allowlist {
    pub const REGIONS: &[&str] = &["nyc1", "nyc3", "sfo3", "ams3", "fra1", "sgp1"];
    pub const SIZE_CLASSES: &[&str] = &[
        "s-1vcpu-1gb",
        "s-1vcpu-2gb",
        "s-2vcpu-4gb",
        "s-4vcpu-8gb",
    ];
}

pub mod agent {
    pub const SERVICE_NAME: &str = "toolhost-agent";
    pub const ENV_FILE: &str = "/etc/toolhost/agent.env";
    pub const INSTALL_DIR: &str = "/opt/toolhost";
    pub const MANAGED_LABEL: &str = "toolhost.managed";
    pub const NAME_LABEL: &str = "toolhost.name";
    pub const IMAGE_LABEL: &str = "toolhost.image";
}

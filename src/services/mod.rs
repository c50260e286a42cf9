pub mod agent_client;
pub mod bootstrap;
pub mod fallback;
pub mod keys;
pub mod logger;
pub mod remediation;
pub mod secrets;
pub mod security;
pub mod status_view;
pub mod validation;

//! §6.3 environment-driven configuration. Grounded on the teacher's
//! `GatewayConfig` builder shape, re-keyed to the env vars this gateway
//! actually reads; exit-code mapping for the values this produces lives in
//! the `chatgate-cli` binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{0} is invalid: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub jwks_url: String,
    pub primary_is_a: bool,
    pub fallback_enabled: bool,
    pub agent_a_binary: Option<PathBuf>,
    pub agent_b_binary: Option<PathBuf>,
    pub agent_timeout: Duration,
    pub max_tokens: u32,
    pub default_temperature: f64,
    pub metrics_enabled: bool,
    pub audit_enabled: bool,
    pub admin_emails: Vec<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwks_url = require_env("AUTHKIT_JWKS_URL")?;

        let primary_is_a = match std::env::var("PRIMARY_AGENT")
            .unwrap_or_else(|_| "A".to_string())
            .to_ascii_uppercase()
            .as_str()
        {
            "A" => true,
            "B" => false,
            other => return Err(ConfigError::Invalid("PRIMARY_AGENT", other.to_string())),
        };

        let fallback_enabled = bool_env("FALLBACK_ENABLED", true)?;
        let agent_a_binary = std::env::var("AGENT_A_BINARY").ok().map(PathBuf::from);
        let agent_b_binary = std::env::var("AGENT_B_BINARY").ok().map(PathBuf::from);

        let agent_timeout = Duration::from_secs(int_env("AGENT_TIMEOUT_SECS", 300)?);
        let max_tokens = int_env("MAX_TOKENS", 4096)? as u32;
        let default_temperature = float_env("DEFAULT_TEMPERATURE", 0.7)?;
        let metrics_enabled = bool_env("METRICS_ENABLED", true)?;
        let audit_enabled = bool_env("AUDIT_ENABLED", true)?;
        let port = int_env("PORT", 3284)? as u16;
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let admin_emails = std::env::var("ADMIN_EMAILS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host,
            port,
            jwks_url,
            primary_is_a,
            fallback_enabled,
            agent_a_binary,
            agent_b_binary,
            agent_timeout,
            max_tokens,
            default_temperature,
            metrics_enabled,
            audit_enabled,
            admin_emails,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], self.port)))
    }

    /// Exit code 2 at startup (§6.3) when neither driver binary is configured.
    pub fn has_any_agent_binary(&self) -> bool {
        self.agent_a_binary.is_some() || self.agent_b_binary.is_some()
    }
}

fn require_env(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn bool_env(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(v) => v.parse().map_err(|_| ConfigError::Invalid(key, v)),
    }
}

fn int_env(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(v) => v.parse().map_err(|_| ConfigError::Invalid(key, v)),
    }
}

fn float_env(key: &'static str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(v) => v.parse().map_err(|_| ConfigError::Invalid(key, v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // env vars are process-global; serialize the tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn missing_jwks_url_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("AUTHKIT_JWKS_URL");
        assert!(matches!(GatewayConfig::from_env(), Err(ConfigError::Missing("AUTHKIT_JWKS_URL"))));
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("AUTHKIT_JWKS_URL", "https://example.com/jwks");
        std::env::remove_var("PRIMARY_AGENT");
        std::env::remove_var("PORT");
        let config = GatewayConfig::from_env().unwrap();
        assert!(config.primary_is_a);
        assert_eq!(config.port, 3284);
        assert_eq!(config.max_tokens, 4096);
        std::env::remove_var("AUTHKIT_JWKS_URL");
    }

    #[test]
    fn invalid_primary_agent_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("AUTHKIT_JWKS_URL", "https://example.com/jwks");
        std::env::set_var("PRIMARY_AGENT", "C");
        assert!(matches!(GatewayConfig::from_env(), Err(ConfigError::Invalid("PRIMARY_AGENT", _))));
        std::env::remove_var("AUTHKIT_JWKS_URL");
        std::env::remove_var("PRIMARY_AGENT");
    }
}

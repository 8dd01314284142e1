use anyhow::{bail, Result};
use tracing::warn;

use super::{LimitsConfig, ListenConfig, RateLimitConfig, RelayConfig, RemoteConfig};
use crate::frame::HEADER_LEN;

/// 配置验证器 - 负责所有配置验证逻辑
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证端口号
    pub fn validate_port(port: u16, context: &str) -> Result<()> {
        if port == 0 {
            bail!("{}: port cannot be 0", context);
        }
        Ok(())
    }

    /// 验证地址不为空
    pub fn validate_address(addr: &str, context: &str) -> Result<()> {
        if addr.trim().is_empty() {
            bail!("{}: address cannot be empty", context);
        }
        Ok(())
    }

    /// 验证完整配置
    pub fn validate_relay_config(config: &RelayConfig) -> Result<()> {
        Self::validate_listen_config(&config.listen)?;
        Self::validate_remote_config(&config.remote)?;
        Self::validate_limits_config(&config.limits)?;
        Ok(())
    }

    /// 验证监听配置
    pub fn validate_listen_config(config: &ListenConfig) -> Result<()> {
        Self::validate_address(&config.bind_addr, "listen.bind_addr")?;

        match (&config.cert_path, &config.key_path) {
            (Some(_), Some(_)) | (None, None) => {}
            _ => bail!("listen.cert_path and listen.key_path must both be set, or both omitted for plain TCP"),
        }

        Ok(())
    }

    /// 验证上游配置
    pub fn validate_remote_config(config: &RemoteConfig) -> Result<()> {
        Self::validate_address(&config.remote_server, "remote.remote_server")?;
        Self::validate_port(config.remote_port, "remote.remote_port")?;

        if let Some(ref name) = config.server_name {
            Self::validate_address(name, "remote.server_name")?;
        }

        // 只配置一项时保持宽松：不尝试双向 TLS
        match (&config.remote_cert, &config.remote_key) {
            (Some(cert), None) => warn!(
                "remote.remote_cert {:?} is set without remote.remote_key, mutual TLS will not be attempted",
                cert
            ),
            (None, Some(key)) => warn!(
                "remote.remote_key {:?} is set without remote.remote_cert, mutual TLS will not be attempted",
                key
            ),
            _ => {}
        }

        Ok(())
    }

    /// 验证限制配置
    pub fn validate_limits_config(config: &LimitsConfig) -> Result<()> {
        if config.max_frame_size == 0 {
            bail!("limits.max_frame_size must be greater than 0");
        }
        if config.max_frame_size > u32::MAX as usize - HEADER_LEN {
            bail!(
                "limits.max_frame_size ({}) cannot be represented by a 4-byte length prefix",
                config.max_frame_size
            );
        }
        if config.max_frame_size > 100 * 1024 * 1024 {
            warn!(
                "limits.max_frame_size is very large ({} bytes = {} MB), \
                 this may lead to memory exhaustion attacks",
                config.max_frame_size,
                config.max_frame_size / (1024 * 1024)
            );
        }

        if config.io_timeout_secs == Some(0) {
            bail!("limits.io_timeout_secs must be greater than 0 (omit it to disable timeouts)");
        }

        if config.max_sessions == Some(0) {
            bail!("limits.max_sessions must be greater than 0");
        }

        if let Some(ref rate_limit) = config.rate_limit {
            Self::validate_rate_limit_config(rate_limit)?;
        }

        Ok(())
    }

    /// 验证速率限制配置
    pub fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<()> {
        if config.requests_per_second == 0 {
            bail!("rate_limit.requests_per_second must be greater than 0");
        }
        if config.burst_size == 0 {
            bail!("rate_limit.burst_size must be greater than 0");
        }
        if config.burst_size < config.requests_per_second {
            warn!(
                "rate_limit.burst_size ({}) is less than requests_per_second ({}), \
                 this may cause frequent rate limiting",
                config.burst_size, config.requests_per_second
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn remote() -> RemoteConfig {
        RemoteConfig::new("epp.example.com")
    }

    #[test]
    fn test_validate_port() {
        assert!(ConfigValidator::validate_port(700, "test").is_ok());
        assert!(ConfigValidator::validate_port(0, "test").is_err());
    }

    #[test]
    fn test_validate_address() {
        assert!(ConfigValidator::validate_address("epp.example.com", "test").is_ok());
        assert!(ConfigValidator::validate_address("", "test").is_err());
        assert!(ConfigValidator::validate_address("   ", "test").is_err());
    }

    #[test]
    fn test_listen_cert_key_must_be_paired() {
        let mut listen = ListenConfig::default();
        assert!(ConfigValidator::validate_listen_config(&listen).is_ok());

        listen.cert_path = Some(PathBuf::from("/listen.pem"));
        assert!(ConfigValidator::validate_listen_config(&listen).is_err());

        listen.key_path = Some(PathBuf::from("/listen.key"));
        assert!(ConfigValidator::validate_listen_config(&listen).is_ok());
    }

    #[test]
    fn test_remote_single_identity_file_is_accepted() {
        let mut config = remote();
        config.remote_cert = Some(PathBuf::from("/client.pem"));
        assert!(ConfigValidator::validate_remote_config(&config).is_ok());
        assert!(config.client_identity().is_none());
    }

    #[test]
    fn test_remote_invalid_values() {
        let mut config = remote();
        config.remote_port = 0;
        assert!(ConfigValidator::validate_remote_config(&config).is_err());

        let mut config = remote();
        config.remote_server = String::new();
        assert!(ConfigValidator::validate_remote_config(&config).is_err());

        let mut config = remote();
        config.server_name = Some(" ".to_string());
        assert!(ConfigValidator::validate_remote_config(&config).is_err());
    }

    #[test]
    fn test_limits_validation() {
        let mut limits = LimitsConfig::default();
        assert!(ConfigValidator::validate_limits_config(&limits).is_ok());

        limits.max_frame_size = 0;
        assert!(ConfigValidator::validate_limits_config(&limits).is_err());
        limits.max_frame_size = 4096;

        limits.io_timeout_secs = Some(0);
        assert!(ConfigValidator::validate_limits_config(&limits).is_err());
        limits.io_timeout_secs = Some(60);

        limits.max_sessions = Some(0);
        assert!(ConfigValidator::validate_limits_config(&limits).is_err());
        limits.max_sessions = Some(8);

        assert!(ConfigValidator::validate_limits_config(&limits).is_ok());
    }

    #[test]
    fn test_rate_limit_validation() {
        let valid = RateLimitConfig {
            requests_per_second: 10,
            burst_size: 20,
        };
        assert!(ConfigValidator::validate_rate_limit_config(&valid).is_ok());

        let zero_rate = RateLimitConfig {
            requests_per_second: 0,
            burst_size: 20,
        };
        assert!(ConfigValidator::validate_rate_limit_config(&zero_rate).is_err());

        let zero_burst = RateLimitConfig {
            requests_per_second: 10,
            burst_size: 0,
        };
        assert!(ConfigValidator::validate_rate_limit_config(&zero_burst).is_err());
    }
}

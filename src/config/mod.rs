// 配置管理模块 - 使用模块化设计

mod builder;
mod validator;

pub use builder::RelayConfigBuilder;
pub use validator::ConfigValidator;

use crate::frame::DEFAULT_MAX_FRAME_SIZE;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "EPP_RELAY_";

/// EPP over TLS 的 IANA 端口
pub const DEFAULT_REMOTE_PORT: u16 = 700;

/// 配置模板
pub const CONFIG_TEMPLATE: &str = include_str!("../../templates/relay.toml");

fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    1700
}

fn default_remote_port() -> u16 {
    DEFAULT_REMOTE_PORT
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

/// 客户端侧监听配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    /// 监听地址
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// 监听端口
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
    /// TLS 证书路径（与 key_path 同时设置时客户端侧使用 TLS）
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// TLS 私钥路径
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            bind_port: default_bind_port(),
            cert_path: None,
            key_path: None,
        }
    }
}

impl ListenConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.bind_port)
    }

    /// 客户端侧 TLS 证书与私钥（两者都配置时才返回）
    pub fn tls_identity(&self) -> Option<(&Path, &Path)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

/// 上游 EPP 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// 上游服务器主机名
    pub remote_server: String,
    /// 上游服务器端口
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,
    /// 双向 TLS 客户端私钥
    #[serde(default)]
    pub remote_key: Option<PathBuf>,
    /// 双向 TLS 客户端证书
    #[serde(default)]
    pub remote_cert: Option<PathBuf>,
    /// 受信任根证书（未配置时使用系统根证书）
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    /// 用于 SNI 与证书校验的服务器名（默认为 remote_server）
    #[serde(default)]
    pub server_name: Option<String>,
}

impl RemoteConfig {
    pub fn new(remote_server: impl Into<String>) -> Self {
        Self {
            remote_server: remote_server.into(),
            remote_port: DEFAULT_REMOTE_PORT,
            remote_key: None,
            remote_cert: None,
            ca_cert_path: None,
            server_name: None,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.remote_server, self.remote_port)
    }

    pub fn verify_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or(&self.remote_server)
    }

    /// 双向 TLS 材料，返回 (证书, 私钥)
    ///
    /// 只配置了其中一项时不尝试双向 TLS
    pub fn client_identity(&self) -> Option<(&Path, &Path)> {
        match (&self.remote_cert, &self.remote_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

/// 速率限制配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 每秒允许的新连接数
    pub requests_per_second: u32,
    /// 突发容量
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 100,
            burst_size: 200,
        }
    }
}

/// 会话与连接限制
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// 最大帧负载（字节）
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// 单次读/写的超时（秒），未配置时无限期阻塞
    #[serde(default)]
    pub io_timeout_secs: Option<u64>,
    /// 最大并发会话数
    #[serde(default)]
    pub max_sessions: Option<usize>,
    /// 新连接速率限制
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            io_timeout_secs: None,
            max_sessions: None,
            rate_limit: None,
        }
    }
}

impl LimitsConfig {
    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_secs.map(Duration::from_secs)
    }
}

/// 中继完整配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl RelayConfig {
    /// 创建 Builder
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::new()
    }

    /// 验证配置
    pub fn validate(&self) -> anyhow::Result<()> {
        ConfigValidator::validate_relay_config(self)
    }

    /// 从 TOML 文本解析（不读取环境变量）
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut config: RelayConfig =
            toml::from_str(content).context("Failed to parse relay configuration")?;
        config.expand_paths()?;
        config
            .validate()
            .context("Relay configuration validation failed")?;
        Ok(config)
    }

    /// 从文件加载配置，并应用 `EPP_RELAY_*` 环境变量覆盖
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path))?;
        let mut config: RelayConfig =
            toml::from_str(&content).context("Failed to parse relay configuration")?;
        config.apply_overrides(|name| std::env::var(format!("{}{}", ENV_PREFIX, name)).ok())?;
        config.expand_paths()?;
        config
            .validate()
            .context("Relay configuration validation failed")?;
        Ok(config)
    }

    /// 应用覆盖项，`lookup` 以去掉前缀的变量名查询
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server) = lookup("REMOTE_SERVER") {
            self.remote.remote_server = server;
        }
        if let Some(port) = lookup("REMOTE_PORT") {
            self.remote.remote_port = port
                .parse()
                .with_context(|| format!("Invalid {}REMOTE_PORT: {}", ENV_PREFIX, port))?;
        }
        Ok(())
    }

    fn expand_paths(&mut self) -> anyhow::Result<()> {
        for path in [
            &mut self.listen.cert_path,
            &mut self.listen.key_path,
            &mut self.remote.remote_key,
            &mut self.remote.remote_cert,
            &mut self.remote.ca_cert_path,
        ]
        .into_iter()
        .flatten()
        {
            *path = expand_path(path)?;
        }
        Ok(())
    }
}

/// 展开路径中的 `~` 与环境变量
fn expand_path(path: &Path) -> anyhow::Result<PathBuf> {
    let Some(raw) = path.to_str() else {
        return Ok(path.to_path_buf());
    };
    let expanded =
        shellexpand::full(raw).with_context(|| format!("Failed to expand path: {}", raw))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = RelayConfig::from_toml_str(
            r#"
            [remote]
            remote_server = "epp.example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.remote.remote_port, 700);
        assert_eq!(config.remote.endpoint(), "epp.example.com:700");
        assert_eq!(config.remote.verify_name(), "epp.example.com");
        assert!(config.remote.client_identity().is_none());
        assert_eq!(config.listen.addr(), "127.0.0.1:1700");
        assert!(config.listen.tls_identity().is_none());
        assert_eq!(config.limits.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert!(config.limits.io_timeout().is_none());
    }

    #[test]
    fn test_full_toml_deserialization() {
        let toml_str = r#"
            [listen]
            bind_addr = "0.0.0.0"
            bind_port = 7000
            cert_path = "/etc/epp-relay/listen.pem"
            key_path = "/etc/epp-relay/listen.key"

            [remote]
            remote_server = "10.0.0.5"
            remote_port = 7443
            remote_key = "/etc/epp-relay/client.key"
            remote_cert = "/etc/epp-relay/client.pem"
            ca_cert_path = "/etc/epp-relay/ca.pem"
            server_name = "epp.registry.test"

            [limits]
            max_frame_size = 65536
            io_timeout_secs = 30
            max_sessions = 64

            [limits.rate_limit]
            requests_per_second = 5
            burst_size = 10
        "#;

        let config = RelayConfig::from_toml_str(toml_str).unwrap();

        assert_eq!(config.listen.bind_port, 7000);
        assert!(config.listen.tls_identity().is_some());
        assert_eq!(config.remote.verify_name(), "epp.registry.test");
        let (cert, key) = config.remote.client_identity().unwrap();
        assert_eq!(cert, Path::new("/etc/epp-relay/client.pem"));
        assert_eq!(key, Path::new("/etc/epp-relay/client.key"));
        assert_eq!(config.limits.io_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.limits.max_sessions, Some(64));
        assert_eq!(config.limits.rate_limit.unwrap().burst_size, 10);
    }

    #[test]
    fn test_missing_remote_server_fails() {
        let result = RelayConfig::from_toml_str(
            r#"
            [listen]
            bind_port = 7000
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_only_remote_key_skips_mutual_tls() {
        let config = RelayConfig::from_toml_str(
            r#"
            [remote]
            remote_server = "epp.example.com"
            remote_key = "/etc/epp-relay/client.key"
            "#,
        )
        .unwrap();

        assert!(config.remote.client_identity().is_none());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = RelayConfig::builder()
            .remote_server("epp.example.com")
            .build()
            .unwrap();

        config
            .apply_overrides(|name| match name {
                "REMOTE_SERVER" => Some("epp.other.test".to_string()),
                "REMOTE_PORT" => Some("7700".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.remote.endpoint(), "epp.other.test:7700");
    }

    #[test]
    fn test_apply_overrides_rejects_bad_port() {
        let mut config = RelayConfig::builder()
            .remote_server("epp.example.com")
            .build()
            .unwrap();

        let result = config.apply_overrides(|name| match name {
            "REMOTE_PORT" => Some("not-a-port".to_string()),
            _ => None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_path_home() {
        let expanded = expand_path(Path::new("/absolute/ca.pem")).unwrap();
        assert_eq!(expanded, PathBuf::from("/absolute/ca.pem"));

        if let Some(home) = std::env::var_os("HOME") {
            let expanded = expand_path(Path::new("~/ca.pem")).unwrap();
            assert_eq!(expanded, PathBuf::from(home).join("ca.pem"));
        }
    }

    #[test]
    fn test_template_parses() {
        let config = RelayConfig::from_toml_str(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.remote.remote_port, DEFAULT_REMOTE_PORT);
    }
}

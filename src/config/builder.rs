use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use super::{
    validator::ConfigValidator, LimitsConfig, ListenConfig, RateLimitConfig, RelayConfig,
    RemoteConfig, DEFAULT_REMOTE_PORT,
};

/// RelayConfig Builder
#[derive(Debug, Default)]
pub struct RelayConfigBuilder {
    listen: ListenConfig,
    remote_server: Option<String>,
    remote_port: Option<u16>,
    remote_key: Option<PathBuf>,
    remote_cert: Option<PathBuf>,
    ca_cert_path: Option<PathBuf>,
    server_name: Option<String>,
    limits: LimitsConfig,
}

impl RelayConfigBuilder {
    /// 创建新的 Builder
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置监听地址
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen.bind_addr = addr.into();
        self
    }

    /// 设置监听端口
    pub fn bind_port(mut self, port: u16) -> Self {
        self.listen.bind_port = port;
        self
    }

    /// 客户端侧启用 TLS
    pub fn listen_tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.listen.cert_path = Some(cert.into());
        self.listen.key_path = Some(key.into());
        self
    }

    /// 设置上游服务器
    pub fn remote_server(mut self, server: impl Into<String>) -> Self {
        self.remote_server = Some(server.into());
        self
    }

    /// 设置上游端口
    pub fn remote_port(mut self, port: u16) -> Self {
        self.remote_port = Some(port);
        self
    }

    /// 设置双向 TLS 客户端证书与私钥
    pub fn client_identity(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.remote_cert = Some(cert.into());
        self.remote_key = Some(key.into());
        self
    }

    /// 设置受信任根证书
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// 设置校验用的服务器名
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// 设置最大帧负载
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.limits.max_frame_size = size;
        self
    }

    /// 设置读写超时
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.limits.io_timeout_secs = Some(timeout.as_secs());
        self
    }

    /// 设置最大并发会话数
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.limits.max_sessions = Some(max);
        self
    }

    /// 设置新连接速率限制
    pub fn rate_limit(mut self, requests_per_second: u32, burst_size: u32) -> Self {
        self.limits.rate_limit = Some(RateLimitConfig {
            requests_per_second,
            burst_size,
        });
        self
    }

    /// 构建 RelayConfig 并验证
    pub fn build(self) -> Result<RelayConfig> {
        let config = RelayConfig {
            listen: self.listen,
            remote: RemoteConfig {
                remote_server: self.remote_server.context("remote_server is required")?,
                remote_port: self.remote_port.unwrap_or(DEFAULT_REMOTE_PORT),
                remote_key: self.remote_key,
                remote_cert: self.remote_cert,
                ca_cert_path: self.ca_cert_path,
                server_name: self.server_name,
            },
            limits: self.limits,
        };

        ConfigValidator::validate_relay_config(&config)?;

        Ok(config)
    }
}

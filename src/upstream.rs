/// 上游连接器
///
/// 为每个会话打开一条到真实 EPP 服务器的全新 TLS 连接。
/// 不重试、不做连接池，失败时返回携带底层 OS/TLS 错误文本的错误。
use crate::config::RemoteConfig;
use crate::error::{RelayError, Result};
use crate::tls;
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::{rustls, TlsConnector};
use tracing::{debug, warn};

/// 传输层连接抽象
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

// 为所有满足条件的类型自动实现 Transport
impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedTransport = Pin<Box<dyn Transport>>;

/// 上游连接器接口
#[async_trait]
pub trait UpstreamConnect: Send + Sync {
    /// 建立一条新的上游连接
    async fn connect(&self) -> Result<BoxedTransport>;

    /// 上游地址（host:port），用于日志
    fn endpoint(&self) -> String;
}

/// 基于 TLS 的上游连接器
pub struct TlsUpstream {
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    connector: TlsConnector,
}

impl TlsUpstream {
    pub fn new(remote: &RemoteConfig, tls_config: Arc<rustls::ClientConfig>) -> Result<Self> {
        let server_name = ServerName::try_from(remote.verify_name().to_string()).map_err(|_| {
            RelayError::config_error(format!("Invalid server name: {}", remote.verify_name()))
        })?;

        Ok(Self {
            host: remote.remote_server.clone(),
            port: remote.remote_port,
            server_name,
            connector: TlsConnector::from(tls_config),
        })
    }

    /// 从配置加载信任根与客户端证书并创建连接器
    pub fn from_config(remote: &RemoteConfig) -> anyhow::Result<Self> {
        let tls_config = tls::client_config_for(remote)?;
        Ok(Self::new(remote, tls_config)?)
    }
}

#[async_trait]
impl UpstreamConnect for TlsUpstream {
    async fn connect(&self) -> Result<BoxedTransport> {
        let addr = self.endpoint();
        debug!("Connecting to upstream {} via TLS", addr);

        let tcp_stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| RelayError::connection_failed(&addr, e))?;

        if let Err(e) = tcp_stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for upstream {}: {}", addr, e);
        }

        let tls_stream = self
            .connector
            .connect(self.server_name.clone(), tcp_stream)
            .await
            .map_err(|e| RelayError::tls_handshake(&addr, e))?;

        debug!("TLS connection established to {}", addr);
        Ok(Box::pin(tls_stream))
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

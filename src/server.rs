/// 连接服务器
///
/// 接受客户端连接，为每条连接启动一个独立任务运行会话引擎。
/// 会话之间没有共享的可变状态，单个会话失败不会影响接受循环或其他会话。
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::hooks::{ClientContext, RewriteHooks};
use crate::rate_limiter::ConnectionRateLimiter;
use crate::session::{SessionEngine, SessionOptions};
use crate::tls;
use crate::upstream::TlsUpstream;
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// 中继服务器
pub struct RelayServer {
    engine: SessionEngine,
    tls_acceptor: Option<TlsAcceptor>,
    rate_limiter: Option<ConnectionRateLimiter>,
    session_slots: Option<Arc<Semaphore>>,
}

impl RelayServer {
    pub fn new(engine: SessionEngine) -> Self {
        Self {
            engine,
            tls_acceptor: None,
            rate_limiter: None,
            session_slots: None,
        }
    }

    /// 根据配置组装上游连接器、会话引擎与接入限制
    pub fn from_config(config: &RelayConfig, hooks: Arc<dyn RewriteHooks>) -> Result<Self> {
        let upstream = TlsUpstream::from_config(&config.remote)
            .context("Failed to prepare upstream TLS connector")?;
        let engine = SessionEngine::new(Arc::new(upstream), hooks)
            .with_options(SessionOptions::from(&config.limits));

        let mut server = Self::new(engine);

        if let Some((cert, key)) = config.listen.tls_identity() {
            let tls_config = tls::load_server_config(cert, key)?;
            server = server.with_tls_acceptor(TlsAcceptor::from(tls_config));
        }

        if let Some(ref rate_limit) = config.limits.rate_limit {
            server = server.with_rate_limiter(ConnectionRateLimiter::new(rate_limit.clone())?);
        }

        if let Some(max_sessions) = config.limits.max_sessions {
            server = server.with_max_sessions(max_sessions);
        }

        Ok(server)
    }

    /// 客户端侧终止 TLS
    pub fn with_tls_acceptor(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(acceptor);
        self
    }

    /// 限制新连接速率
    pub fn with_rate_limiter(mut self, limiter: ConnectionRateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// 限制并发会话数；达到上限后暂停接受新连接
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.session_slots = Some(Arc::new(Semaphore::new(max_sessions)));
        self
    }

    /// 在给定监听器上接受连接，直到 `shutdown` 完成
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            // 先取得会话名额再接受连接，未接受的连接留在内核队列中
            let permit = match &self.session_slots {
                Some(slots) => tokio::select! {
                    permit = Arc::clone(slots).acquire_owned() => {
                        Some(permit.context("Session slots closed")?)
                    }
                    _ = &mut shutdown => break,
                },
                None => None,
            };

            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            info!("Accepted connection from {}", peer_addr);

                            // 应用速率限制
                            if let Some(ref limiter) = self.rate_limiter {
                                if let Err(wait_time) = limiter.check() {
                                    warn!(
                                        "Rate limit exceeded, rejecting {} (retry after {:?})",
                                        peer_addr, wait_time
                                    );
                                    continue;
                                }
                            }

                            if let Err(e) = stream.set_nodelay(true) {
                                debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
                            }

                            let engine = self.engine.clone();
                            let acceptor = self.tls_acceptor.clone();

                            tokio::spawn(async move {
                                let _permit = permit;
                                let ctx = ClientContext::new(Some(peer_addr));

                                let Some(acceptor) = acceptor else {
                                    engine.serve(stream, ctx).await;
                                    return;
                                };

                                // 握手同样受 I/O 超时约束，静默的客户端不能一直占用会话名额
                                let handshake = acceptor.accept(stream);
                                let accepted = match engine.options().io_timeout {
                                    Some(limit) => match tokio::time::timeout(limit, handshake).await {
                                        Ok(result) => result.map_err(RelayError::from),
                                        Err(_) => Err(RelayError::timeout(limit)),
                                    },
                                    None => handshake.await.map_err(RelayError::from),
                                };

                                match accepted {
                                    Ok(tls_stream) => {
                                        engine.serve(tls_stream, ctx).await;
                                    }
                                    Err(e) => {
                                        warn!("TLS handshake with client {} failed: {}", peer_addr, e);
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Received shutdown signal, stopping relay...");
                    break;
                }
            }
        }

        info!("Relay stopped gracefully");
        Ok(())
    }
}

/// 按配置运行中继，直到收到 Ctrl+C
pub async fn run_relay(config: RelayConfig, hooks: Arc<dyn RewriteHooks>) -> Result<()> {
    let server = RelayServer::from_config(&config, hooks)?;

    let addr = config.listen.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(
        "EPP relay listening on {} ({}), forwarding to {}",
        addr,
        if config.listen.tls_identity().is_some() { "tls" } else { "tcp" },
        config.remote.endpoint()
    );
    info!("Waiting for client connections... (Press Ctrl+C to stop)");

    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
}

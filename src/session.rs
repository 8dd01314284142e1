/// 会话引擎
///
/// 负责一条客户端连接的完整生命周期：
/// CONNECTING → GREETING → RELAYING → CLOSED
///
/// 命令与响应严格一问一答交替转发，不做流水线；任何一侧的读写失败
/// 都会直接结束整个会话，不重连、不重试，也不向客户端合成错误响应。
use crate::config::LimitsConfig;
use crate::error::{FrameError, HookKind, Peer, RelayError, Result, Stage};
use crate::frame::{frame_channel, read_frame, write_frame, Frame, FrameChannel, DEFAULT_MAX_FRAME_SIZE};
use crate::hooks::{ClientContext, RewriteHooks};
use crate::upstream::UpstreamConnect;
use futures::SinkExt;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Greeting,
    Relaying,
    Closed,
}

/// 会话参数
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// 最大帧负载（字节）
    pub max_frame_size: usize,
    /// 单次连接/读/写的超时，None 表示无限期阻塞
    pub io_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            io_timeout: None,
        }
    }
}

impl From<&LimitsConfig> for SessionOptions {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            max_frame_size: limits.max_frame_size,
            io_timeout: limits.io_timeout(),
        }
    }
}

/// 会话结束方式
#[derive(Debug)]
pub enum SessionEnd {
    /// 客户端在命令边界正常断开
    ClientClosed,
    /// 任意一侧失败导致会话终止
    Failed(RelayError),
}

/// 会话结束后的摘要
#[derive(Debug)]
pub struct SessionSummary {
    pub session_id: Uuid,
    /// 完成的命令/响应交换次数
    pub exchanges: u64,
    /// 会话结束前所处的状态
    pub last_state: SessionState,
    pub end: SessionEnd,
}

impl SessionSummary {
    pub fn is_clean(&self) -> bool {
        matches!(self.end, SessionEnd::ClientClosed)
    }

    pub fn error(&self) -> Option<&RelayError> {
        match &self.end {
            SessionEnd::Failed(err) => Some(err),
            SessionEnd::ClientClosed => None,
        }
    }
}

struct Progress<'a> {
    ctx: &'a ClientContext,
    state: SessionState,
    exchanges: u64,
}

impl Progress<'_> {
    fn transition(&mut self, next: SessionState) {
        debug!("Session {}: {:?} -> {:?}", self.ctx, self.state, next);
        self.state = next;
    }
}

/// 会话引擎，所有工作任务共享同一个实例（克隆开销很小）
#[derive(Clone)]
pub struct SessionEngine {
    connector: Arc<dyn UpstreamConnect>,
    hooks: Arc<dyn RewriteHooks>,
    options: SessionOptions,
}

impl SessionEngine {
    pub fn new(connector: Arc<dyn UpstreamConnect>, hooks: Arc<dyn RewriteHooks>) -> Self {
        Self {
            connector,
            hooks,
            options: SessionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// 运行一次会话，失败时把错误返回给调用方而不记录日志
    pub async fn run<C>(&self, client: C, ctx: &ClientContext) -> Result<SessionSummary>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (last_state, exchanges, result) = self.execute(client, ctx).await;
        result.map(|()| SessionSummary {
            session_id: ctx.session_id,
            exchanges,
            last_state,
            end: SessionEnd::ClientClosed,
        })
    }

    /// 处理一条客户端连接直到会话结束
    ///
    /// 从不返回错误：所有失败都在这里记录日志并体现在摘要中
    pub async fn serve<C>(&self, client: C, ctx: ClientContext) -> SessionSummary
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (last_state, exchanges, result) = self.execute(client, &ctx).await;

        let end = match result {
            Ok(()) => {
                info!(
                    "Session {} closed by client after {} exchange(s)",
                    ctx, exchanges
                );
                SessionEnd::ClientClosed
            }
            Err(err) => {
                self.log_failure(&ctx, last_state, &err);
                SessionEnd::Failed(err)
            }
        };

        SessionSummary {
            session_id: ctx.session_id,
            exchanges,
            last_state,
            end,
        }
    }

    async fn execute<C>(
        &self,
        client: C,
        ctx: &ClientContext,
    ) -> (SessionState, u64, Result<()>)
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut progress = Progress {
            ctx,
            state: SessionState::Connecting,
            exchanges: 0,
        };

        let result = self.drive(client, &mut progress).await;
        let last_state = progress.state;
        let exchanges = progress.exchanges;
        progress.transition(SessionState::Closed);

        (last_state, exchanges, result)
    }

    async fn drive<C>(&self, client: C, progress: &mut Progress<'_>) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let ctx = progress.ctx;

        // CONNECTING：在触碰客户端流之前建立上游连接
        let upstream = self
            .deadline(self.connector.connect(), |e| {
                RelayError::connection_failed(self.connector.endpoint(), e)
            })
            .await?;
        let mut upstream = frame_channel(upstream, self.options.max_frame_size);
        let mut client = frame_channel(client, self.options.max_frame_size);
        debug!("Session {}: connected to {}", ctx, self.connector.endpoint());

        // GREETING
        progress.transition(SessionState::Greeting);
        let greeting = self
            .receive_required(&mut upstream, Peer::Upstream, Stage::Greeting)
            .await?;
        trace!("Session {}: greeting {:?}", ctx, greeting);
        let greeting = self
            .rewrite_response(greeting, &Frame::greeting_marker(), ctx)
            .await?;
        self.send(&mut client, greeting, Peer::Client, Stage::Greeting)
            .await?;

        // RELAYING
        progress.transition(SessionState::Relaying);
        loop {
            let command = match self
                .receive(&mut client, Peer::Client, Stage::Command)
                .await?
            {
                Some(command) => command,
                None => {
                    debug!("Session {}: client disconnected, closing upstream", ctx);
                    let closed = self
                        .deadline(
                            async {
                                SinkExt::<Frame>::close(&mut upstream)
                                    .await
                                    .map_err(|e| RelayError::Other(e.into()))
                            },
                            RelayError::Io,
                        )
                        .await;
                    if let Err(e) = closed {
                        debug!("Session {}: upstream shutdown failed: {}", ctx, e);
                    }
                    return Ok(());
                }
            };
            trace!("Session {}: command {:?}", ctx, command);

            let outbound = self.rewrite_command(command.clone(), ctx).await?;
            self.send(&mut upstream, outbound, Peer::Upstream, Stage::Command)
                .await?;

            let response = self
                .receive_required(&mut upstream, Peer::Upstream, Stage::Response)
                .await?;
            trace!("Session {}: response {:?}", ctx, response);

            // 响应钩子看到的总是客户端发送的原始命令
            let response = self.rewrite_response(response, &command, ctx).await?;
            self.send(&mut client, response, Peer::Client, Stage::Response)
                .await?;

            progress.exchanges += 1;
        }
    }

    async fn rewrite_command(&self, command: Frame, ctx: &ClientContext) -> Result<Frame> {
        let input_len = command.len();
        let out = self
            .hooks
            .rewrite_command(command, ctx)
            .await
            .map_err(|e| RelayError::hook(HookKind::Command, format!("{:#}", e)))?;
        self.check_hook_output(HookKind::Command, input_len, &out)?;
        Ok(out)
    }

    async fn rewrite_response(
        &self,
        response: Frame,
        command: &Frame,
        ctx: &ClientContext,
    ) -> Result<Frame> {
        let input_len = response.len();
        let out = self
            .hooks
            .rewrite_response(response, command, ctx)
            .await
            .map_err(|e| RelayError::hook(HookKind::Response, format!("{:#}", e)))?;
        self.check_hook_output(HookKind::Response, input_len, &out)?;
        Ok(out)
    }

    /// 钩子必须返回可以上线的帧，否则视为嵌入应用的编程错误
    fn check_hook_output(&self, hook: HookKind, input_len: usize, out: &Frame) -> Result<()> {
        if out.is_empty() && input_len > 0 {
            return Err(RelayError::hook(hook, "returned an empty frame"));
        }
        if out.len() > self.options.max_frame_size {
            return Err(RelayError::hook(
                hook,
                format!(
                    "returned a {}-byte frame exceeding the {}-byte limit",
                    out.len(),
                    self.options.max_frame_size
                ),
            ));
        }
        Ok(())
    }

    async fn receive<S>(
        &self,
        channel: &mut FrameChannel<S>,
        peer: Peer,
        stage: Stage,
    ) -> Result<Option<Frame>>
    where
        S: AsyncRead + Unpin,
    {
        self.deadline(
            async {
                read_frame(channel)
                    .await
                    .map_err(|e| RelayError::frame_read(peer, stage, e))
            },
            |e| RelayError::frame_read(peer, stage, FrameError::Io(e)),
        )
        .await
    }

    async fn receive_required<S>(
        &self,
        channel: &mut FrameChannel<S>,
        peer: Peer,
        stage: Stage,
    ) -> Result<Frame>
    where
        S: AsyncRead + Unpin,
    {
        self.receive(channel, peer, stage)
            .await?
            .ok_or(RelayError::PeerClosed { peer, stage })
    }

    async fn send<S>(
        &self,
        channel: &mut FrameChannel<S>,
        frame: Frame,
        peer: Peer,
        stage: Stage,
    ) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        self.deadline(
            async {
                write_frame(channel, frame)
                    .await
                    .map_err(|e| RelayError::frame_write(peer, stage, e))
            },
            |e| RelayError::frame_write(peer, stage, FrameError::Io(e)),
        )
        .await
    }

    /// 超时转换为所在阶段的错误，日志级别与该阶段的其他失败一致
    async fn deadline<T, F, E>(&self, fut: F, on_timeout: E) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        E: FnOnce(io::Error) -> RelayError,
    {
        match self.options.io_timeout {
            Some(duration) => match tokio::time::timeout(duration, fut).await {
                Ok(result) => result,
                Err(_) => Err(on_timeout(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("timed out after {:?}", duration),
                ))),
            },
            None => fut.await,
        }
    }

    fn log_failure(&self, ctx: &ClientContext, state: SessionState, err: &RelayError) {
        match err {
            RelayError::ConnectionFailed { .. } | RelayError::TlsHandshake { .. } => {
                error!(
                    "Session {}: cannot connect to upstream {}: {}",
                    ctx,
                    self.connector.endpoint(),
                    err
                );
            }
            RelayError::FrameRead { .. } | RelayError::PeerClosed { .. } => {
                error!("Session {}: {}", ctx, err);
            }
            RelayError::Hook { .. } => {
                error!("Session {}: aborting, {}", ctx, err);
            }
            RelayError::FrameWrite { .. } => {
                warn!("Session {}: {}", ctx, err);
            }
            _ => {
                error!("Session {}: {} in {:?} state", ctx, err, state);
            }
        }
    }
}

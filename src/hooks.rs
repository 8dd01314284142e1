/// 改写管道
///
/// 嵌入应用通过实现 `RewriteHooks` 在命令上行之前、响应（以及初始问候）
/// 下行之前改写帧。两个方法都默认原样返回，因此不覆盖任何方法即得到透明中继。
use crate::frame::Frame;
use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

/// 单个会话的只读上下文
#[derive(Debug, Clone)]
pub struct ClientContext {
    /// 会话 ID
    pub session_id: Uuid,
    /// 客户端地址（内存流等场景下可能未知）
    pub peer_addr: Option<SocketAddr>,
}

impl ClientContext {
    pub fn new(peer_addr: Option<SocketAddr>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            peer_addr,
        }
    }
}

impl fmt::Display for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peer_addr {
            Some(addr) => write!(f, "{} ({})", self.session_id, addr),
            None => write!(f, "{}", self.session_id),
        }
    }
}

/// 改写钩子
///
/// 约束：
/// - 对同一逻辑输入可以重复调用
/// - 不得无限期阻塞（引擎对钩子没有超时，挂起的钩子会拖住整个会话）
/// - 返回错误表示嵌入应用的编程错误，会话会被立即终止，不会转发任何数据
#[async_trait]
pub trait RewriteHooks: Send + Sync + 'static {
    /// 在命令发送到上游之前调用，每条客户端命令调用一次
    async fn rewrite_command(&self, command: Frame, client: &ClientContext) -> anyhow::Result<Frame> {
        let _ = client;
        Ok(command)
    }

    /// 在响应发送给客户端之前调用
    ///
    /// `command` 总是客户端发送的原始命令（未经 `rewrite_command` 改写）；
    /// 对于初始问候，它是 `Frame::greeting_marker()`。
    async fn rewrite_response(
        &self,
        response: Frame,
        command: &Frame,
        client: &ClientContext,
    ) -> anyhow::Result<Frame> {
        let _ = (command, client);
        Ok(response)
    }
}

/// 透明中继：两个钩子都使用默认实现
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl RewriteHooks for Passthrough {}

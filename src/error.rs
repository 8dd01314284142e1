/// 自定义错误类型
///
/// 会话引擎内部使用 thiserror 定义精确的错误类型，
/// 让调用者能够区分连接失败、帧读写失败与改写钩子失败
use std::fmt;
use std::io;
use thiserror::Error;

/// 会话中的对端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    /// 协议客户端（下游）
    Client,
    /// 真实协议服务器（上游）
    Upstream,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Client => write!(f, "client"),
            Peer::Upstream => write!(f, "upstream"),
        }
    }
}

/// 发生错误时会话所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Greeting,
    Command,
    Response,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Greeting => write!(f, "greeting"),
            Stage::Command => write!(f, "command"),
            Stage::Response => write!(f, "response"),
        }
    }
}

/// 改写钩子的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Command,
    Response,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::Command => write!(f, "rewrite_command"),
            HookKind::Response => write!(f, "rewrite_response"),
        }
    }
}

/// 帧编解码错误
#[derive(Error, Debug)]
pub enum FrameError {
    /// 长度前缀小于头部本身
    #[error("Invalid frame length {0} (must be at least 4 bytes)")]
    InvalidLength(u32),

    /// 帧超过允许的最大长度
    #[error("Frame of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    /// 连接在帧中途关闭
    #[error("Connection closed with {0} bytes of an incomplete frame buffered")]
    Truncated(usize),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// 中继会话的主要错误类型
#[derive(Error, Debug)]
pub enum RelayError {
    /// 上游 TCP 连接失败
    #[error("Failed to connect to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 上游 TLS 握手失败（包括证书校验失败）
    #[error("TLS handshake with {addr} failed: {source}")]
    TlsHandshake {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 读取帧失败
    #[error("Failed to read {stage} from {peer}: {source}")]
    FrameRead {
        peer: Peer,
        stage: Stage,
        #[source]
        source: FrameError,
    },

    /// 对端在需要帧的位置正常关闭了连接
    #[error("{peer} closed the connection while waiting for {stage}")]
    PeerClosed { peer: Peer, stage: Stage },

    /// 写入帧失败
    #[error("Failed to write {stage} to {peer}: {source}")]
    FrameWrite {
        peer: Peer,
        stage: Stage,
        #[source]
        source: FrameError,
    },

    /// 改写钩子失败或返回了无效帧
    #[error("{hook} hook failed: {reason}")]
    Hook { hook: HookKind, reason: String },

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 超时错误
    #[error("Operation timeout after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// 创建连接失败错误
    pub fn connection_failed(addr: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectionFailed {
            addr: addr.into(),
            source,
        }
    }

    /// 创建 TLS 握手失败错误
    pub fn tls_handshake(addr: impl Into<String>, source: io::Error) -> Self {
        Self::TlsHandshake {
            addr: addr.into(),
            source,
        }
    }

    pub fn frame_read(peer: Peer, stage: Stage, source: FrameError) -> Self {
        Self::FrameRead {
            peer,
            stage,
            source,
        }
    }

    pub fn frame_write(peer: Peer, stage: Stage, source: FrameError) -> Self {
        Self::FrameWrite {
            peer,
            stage,
            source,
        }
    }

    /// 创建钩子错误
    pub fn hook(hook: HookKind, reason: impl Into<String>) -> Self {
        Self::Hook {
            hook,
            reason: reason.into(),
        }
    }

    /// 创建配置错误
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 创建超时错误
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout { duration }
    }

    /// 检查是否为上游连接阶段的失败
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::TlsHandshake { .. }
        )
    }

    /// 检查是否为超时错误（包括连接、读写阶段的超时）
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { source, .. }
            | Self::TlsHandshake { source, .. }
            | Self::Io(source) => source.kind() == io::ErrorKind::TimedOut,
            Self::FrameRead {
                source: FrameError::Io(e),
                ..
            }
            | Self::FrameWrite {
                source: FrameError::Io(e),
                ..
            } => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// 检查是否为钩子错误
    pub fn is_hook_error(&self) -> bool {
        matches!(self, Self::Hook { .. })
    }

    /// 检查是否为写入失败
    pub fn is_write_failure(&self) -> bool {
        matches!(self, Self::FrameWrite { .. })
    }

    /// 检查是否为配置错误
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

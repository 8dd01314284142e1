/// EPP Relay 库入口
///
/// 会话引擎、上游连接器与改写管道作为库导出，
/// 嵌入应用实现 `RewriteHooks` 并交给 `SessionEngine` 或 `RelayServer` 即可
pub mod cli;
pub mod config;
pub mod error;
pub mod frame;
pub mod hooks;
pub mod rate_limiter;
pub mod server;
pub mod session;
pub mod tls;
pub mod upstream;

// 重新导出常用类型
pub use config::{LimitsConfig, ListenConfig, RelayConfig, RemoteConfig};
pub use error::{FrameError, RelayError, Result};
pub use frame::{EppCodec, Frame, FrameChannel, DEFAULT_MAX_FRAME_SIZE};
pub use hooks::{ClientContext, Passthrough, RewriteHooks};
pub use server::{run_relay, RelayServer};
pub use session::{SessionEnd, SessionEngine, SessionOptions, SessionState, SessionSummary};
pub use upstream::{TlsUpstream, UpstreamConnect};

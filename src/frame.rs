/// EPP 帧与帧通道
///
/// 线上格式为 4 字节大端长度前缀（长度包含前缀自身）+ XML 文档，
/// 由 `EppCodec` 通过 tokio-util 的 codec 框架完成编解码
use crate::error::FrameError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

/// 长度前缀字节数
pub const HEADER_LEN: usize = 4;

/// 默认最大帧负载（1MB）
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// 问候交换标记：代表客户端的初始 `<hello/>`，只作为改写上下文，从不上线
pub const GREETING_MARKER: &[u8] = br#"<?xml version="1.0" encoding="UTF-8" standalone="no"?><epp xmlns="urn:ietf:params:xml:ns:epp-1.0"><hello/></epp>"#;

/// 一条完整的协议消息（问候、命令或响应）
///
/// 内部是引用计数的 `Bytes`，克隆不会复制负载
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Frame(Bytes);

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self(payload.into())
    }

    /// 合成的问候交换标记
    pub fn greeting_marker() -> Self {
        Self(Bytes::from_static(GREETING_MARKER))
    }

    pub fn is_greeting_marker(&self) -> bool {
        self.0.as_ref() == GREETING_MARKER
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// 以 UTF-8 文本查看负载（非法 UTF-8 时返回 None）
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 64;
        let shown = &self.0[..self.0.len().min(PREVIEW)];
        let suffix = if self.0.len() > PREVIEW { "..." } else { "" };
        write!(
            f,
            "Frame({} bytes: {:?}{})",
            self.0.len(),
            String::from_utf8_lossy(shown),
            suffix
        )
    }
}

impl From<Bytes> for Frame {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(vec: Vec<u8>) -> Self {
        Self(Bytes::from(vec))
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<&'static str> for Frame {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl From<&'static [u8]> for Frame {
    fn from(s: &'static [u8]) -> Self {
        Self(Bytes::from_static(s))
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// EPP 长度前缀编解码器（RFC 5734）
#[derive(Debug, Clone, Copy)]
pub struct EppCodec {
    max_frame_size: usize,
}

impl EppCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for EppCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for EppCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let total = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if (total as usize) < HEADER_LEN {
            return Err(FrameError::InvalidLength(total));
        }

        let total = total as usize;
        let payload_len = total - HEADER_LEN;
        if payload_len > self.max_frame_size {
            return Err(FrameError::TooLarge {
                size: payload_len,
                limit: self.max_frame_size,
            });
        }

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(Frame(src.split_to(payload_len).freeze())))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::Truncated(src.len())),
        }
    }
}

impl Encoder<Frame> for EppCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let payload_len = frame.len();
        let too_large = FrameError::TooLarge {
            size: payload_len,
            limit: self.max_frame_size,
        };
        if payload_len > self.max_frame_size {
            return Err(too_large);
        }
        let total = u32::try_from(payload_len + HEADER_LEN).map_err(|_| too_large)?;

        dst.reserve(HEADER_LEN + payload_len);
        dst.put_u32(total);
        dst.extend_from_slice(frame.as_bytes());
        Ok(())
    }
}

/// 帧通道：在任意字节流上按帧读写
pub type FrameChannel<S> = Framed<S, EppCodec>;

/// 将字节流包装为帧通道
pub fn frame_channel<S>(stream: S, max_frame_size: usize) -> FrameChannel<S>
where
    S: AsyncRead + AsyncWrite,
{
    Framed::new(stream, EppCodec::new(max_frame_size))
}

/// 读取一帧；对端在帧边界正常关闭时返回 `Ok(None)`
pub async fn read_frame<S>(channel: &mut FrameChannel<S>) -> Result<Option<Frame>, FrameError>
where
    S: AsyncRead + Unpin,
{
    channel.next().await.transpose()
}

/// 写入一帧并刷新
pub async fn write_frame<S>(channel: &mut FrameChannel<S>, frame: Frame) -> Result<(), FrameError>
where
    S: AsyncWrite + Unpin,
{
    channel.send(frame).await
}

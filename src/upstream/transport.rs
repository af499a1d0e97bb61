//! 传输层接口（网络会话在本 crate 之外）

use std::io::Write;

use async_trait::async_trait;

use crate::core::EventError;
use crate::upstream::WireEvent;

/// 服务端确认
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub message_id: String,
}

/// 上行事件的发送端；返回服务端的确认或拒绝
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, event: WireEvent) -> Result<Ack, EventError>;
}

/// 把事件逐行写到标准输出，立即确认（演示二进制使用）
#[derive(Debug, Default)]
pub struct StdoutTransport;

#[async_trait]
impl Transport for StdoutTransport {
    async fn send(&self, event: WireEvent) -> Result<Ack, EventError> {
        let line = event.to_line()?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line).map_err(|e| EventError::Unavailable(e.to_string()))?;
        Ok(Ack {
            message_id: event.header().message_id.clone(),
        })
    }
}

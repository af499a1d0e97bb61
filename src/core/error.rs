//! 错误类型
//!
//! 指令处理（DirectiveError）、上行事件（EventError）、UI 亲和上下文（UiError）三类错误；
//! 均不致命，统一通过 Result / 回调值上报。

use thiserror::Error;

/// 指令分发与处理过程中的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectiveError {
    /// 没有任何注册项匹配 (namespace, name)
    #[error("Unhandled directive: {namespace}.{name}")]
    UnhandledDirective { namespace: String, name: String },

    /// payload 格式错误或缺少必填字段
    #[error("Payload decode error: {0}")]
    PayloadDecode(String),

    #[error("Handler timeout: {0}")]
    HandlerTimeout(String),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),

    /// Agent 的串行队列已关闭（已 shutdown）
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("Dispatcher closed")]
    DispatcherClosed,
}

impl From<serde_json::Error> for DirectiveError {
    fn from(e: serde_json::Error) -> Self {
        DirectiveError::PayloadDecode(e.to_string())
    }
}

/// 上行事件构建 / 发送错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Event encode error: {0}")]
    Encode(String),

    /// 服务端拒绝（NACK）
    #[error("Event rejected: {0}")]
    Rejected(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for EventError {
    fn from(e: serde_json::Error) -> Self {
        EventError::Encode(e.to_string())
    }
}

/// UI 亲和上下文调用错误
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiError {
    /// 在 UI 上下文内部再次同步请求 UI 上下文（会死锁，直接拒绝）
    #[error("Reentrant call from UI context")]
    Reentrant,

    #[error("UI context closed")]
    Closed,

    #[error("Render delegate panicked")]
    DelegatePanicked,
}

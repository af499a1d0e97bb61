//! Capability Agent
//!
//! 每个 Agent 向 DirectiveDispatcher 注册自己的指令处理器、向 ContextManager 注册上下文，
//! 持有可呈现条目时驱动 PlaySyncManager。Agent 与共享组件之间的引用环由各自的 `shutdown()` 断开。

pub mod display;
pub mod extension;
pub mod rendering;
pub mod wakeup;

use std::sync::Arc;

use crate::context::ContextManager;
use crate::directive::DirectiveDispatcher;
use crate::play_sync::PlaySyncManager;
use crate::upstream::UpstreamDataSender;

pub use display::DisplayAgent;
pub use extension::{ExtensionAgent, ExtensionAgentDelegate};
pub use rendering::{
    ClearReason, DelegateId, RenderDelegate, RenderableItem, RenderingHandle, RenderingRegistry,
};
pub use wakeup::KeywordContextProvider;

/// Agent 的能力标识：namespace 名称与接口版本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityAgentProperty {
    pub name: String,
    pub version: String,
}

impl CapabilityAgentProperty {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Agent 依赖的共享组件
#[derive(Clone)]
pub struct AgentServices {
    pub dispatcher: Arc<DirectiveDispatcher>,
    pub context: Arc<ContextManager>,
    pub play_sync: Arc<PlaySyncManager>,
    pub upstream: Arc<UpstreamDataSender>,
}

//! 上下文聚合：收集各 Capability Agent 与客户端的状态，随上行事件一起发送

pub mod info;
pub mod manager;

pub use info::{ContextInfo, ContextSnapshot, ContextType};
pub use manager::{ContextInfoProvider, ContextManager, ProviderId};

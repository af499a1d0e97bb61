//! 指令层：数据模型、处理器注册与按 medium 排序的分发

pub mod dispatcher;
pub mod types;

pub use dispatcher::{DirectiveDispatcher, DispatchHandle};
pub use types::{
    BlockingPolicy, Directive, DirectiveHandler, DirectiveKey, HandlerRegistration, Medium,
};

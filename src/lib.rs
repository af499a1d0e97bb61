//! Chorus - 语音助手客户端编排核心
//!
//! 模块划分：
//! - **directive**: 指令模型、处理器注册与按 medium 排序的分发
//! - **play_sync**: 播放同步状态机（prepared → synced → releasing → released）
//! - **context**: 上下文聚合
//! - **upstream**: 上行事件构建与传输接口
//! - **agents**: Capability Agent（Display、Extension、唤醒词上下文）与渲染关联
//! - **surfaces**: 具体渲染面（控制台、now-playing）
//! - **client**: 按配置组装上述组件
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、优雅关闭、UI 亲和执行上下文

pub mod agents;
pub mod client;
pub mod config;
pub mod context;
pub mod core;
pub mod directive;
pub mod observability;
pub mod play_sync;
pub mod surfaces;
pub mod upstream;

pub use client::{Client, ClientBuilder};
pub use config::{load_config, AppConfig};
pub use directive::{Directive, DirectiveDispatcher};

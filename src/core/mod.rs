//! 核心基础设施：错误类型、优雅关闭、UI 亲和执行上下文

pub mod error;
pub mod shutdown;
pub mod ui;

pub use error::{DirectiveError, EventError, UiError};
pub use shutdown::{
    run_with_graceful_shutdown, ShutdownCleanup, ShutdownCoordinator, ShutdownManager,
    ShutdownReason,
};
pub use ui::{RenderContext, UiDispatcher};

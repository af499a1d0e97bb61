//! UI 亲和执行上下文
//!
//! 渲染委托（RenderDelegate）的 offer_render / on_clear 需要在 UI 线程执行，
//! Agent 在自己的串行队列上通过「请求/响应通道」把闭包投递到 UI 线程并 await 结果。
//!
//! **死锁约束**：调用方不得在 UI 线程内部调用 [`UiDispatcher::run`]（UI 线程会等待自身），
//! 也不得在持有 UI 线程需要的锁时 await 该调用。重入会直接返回 [`UiError::Reentrant`]。

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc as std_mpsc;
use std::thread;

use tokio::sync::oneshot;

use crate::core::UiError;

type UiJob = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static ON_UI_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// 专用 UI 线程的句柄；Clone 共享同一线程，所有句柄释放后线程退出
#[derive(Clone)]
pub struct UiDispatcher {
    tx: std_mpsc::Sender<UiJob>,
}

impl UiDispatcher {
    /// 启动名为 `name` 的 UI 线程
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = std_mpsc::channel::<UiJob>();
        thread::Builder::new().name(name.to_string()).spawn(move || {
            ON_UI_THREAD.with(|flag| flag.set(true));
            while let Ok(job) = rx.recv() {
                job();
            }
            tracing::debug!("UI thread exiting");
        })?;
        Ok(Self { tx })
    }

    /// 当前线程是否为 UI 线程
    pub fn is_current() -> bool {
        ON_UI_THREAD.with(|flag| flag.get())
    }

    /// 在 UI 线程执行 `f` 并等待返回值；闭包 panic 转为 DelegatePanicked
    pub async fn run<F, R>(&self, f: F) -> Result<R, UiError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if Self::is_current() {
            tracing::error!("UiDispatcher::run called from the UI thread, refusing to deadlock");
            return Err(UiError::Reentrant);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let job: UiJob = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(f));
            let _ = reply_tx.send(result);
        });
        self.tx.send(job).map_err(|_| UiError::Closed)?;

        match reply_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(UiError::DelegatePanicked),
            Err(_) => Err(UiError::Closed),
        }
    }
}

impl std::fmt::Debug for UiDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiDispatcher").finish_non_exhaustive()
    }
}

/// Agent 调用渲染委托的方式：专用 UI 线程，或直接在 Agent 队列上执行（无 UI 线程的宿主 / 测试）
#[derive(Clone, Debug, Default)]
pub enum RenderContext {
    #[default]
    Inline,
    Ui(UiDispatcher),
}

impl RenderContext {
    pub async fn invoke<F, R>(&self, f: F) -> Result<R, UiError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        match self {
            RenderContext::Inline => {
                catch_unwind(AssertUnwindSafe(f)).map_err(|_| UiError::DelegatePanicked)
            }
            RenderContext::Ui(ui) => ui.run(f).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_on_ui_thread() {
        let ui = UiDispatcher::spawn("test-ui").unwrap();
        let (on_ui, name) = ui
            .run(|| {
                (
                    UiDispatcher::is_current(),
                    thread::current().name().map(str::to_string),
                )
            })
            .await
            .unwrap();
        assert!(on_ui);
        assert_eq!(name.as_deref(), Some("test-ui"));
        assert!(!UiDispatcher::is_current());
    }

    #[tokio::test]
    async fn test_reentrant_call_is_rejected() {
        let ui = UiDispatcher::spawn("test-ui-reentrant").unwrap();
        let inner = ui.clone();
        // UI 线程内同步等待自身：必须立即返回 Reentrant 而不是挂死
        let result = ui
            .run(move || {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                rt.block_on(inner.run(|| 1))
            })
            .await
            .unwrap();
        assert_eq!(result, Err(UiError::Reentrant));
    }

    #[tokio::test]
    async fn test_panicking_job_reports_error_and_thread_survives() {
        let ui = UiDispatcher::spawn("test-ui-panic").unwrap();
        let result: Result<(), UiError> = ui.run(|| panic!("boom")).await;
        assert_eq!(result, Err(UiError::DelegatePanicked));
        assert_eq!(ui.run(|| 7).await, Ok(7));
    }

    #[tokio::test]
    async fn test_inline_context_catches_panic() {
        let ctx = RenderContext::Inline;
        assert_eq!(ctx.invoke(|| 3).await, Ok(3));
        let result: Result<(), UiError> = ctx.invoke(|| panic!("boom")).await;
        assert_eq!(result, Err(UiError::DelegatePanicked));
    }
}

//! 指令分发器
//!
//! 处理器按 (namespace, name) 注册；dispatch 查表后立即返回 DispatchHandle，不等待处理完成。
//! 同一 medium（audio / visual）上的 blocking 指令进入该 medium 的 FIFO 通道，由单个 worker 串行执行；
//! 非阻塞指令与 medium = none 的指令各自 spawn，互不约束。
//! 单条指令的失败（解码错误 / 超时 / panic）只体现在它自己的 outcome 里，不影响后续指令。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};

use crate::core::DirectiveError;
use crate::directive::{Directive, DirectiveHandler, DirectiveKey, HandlerRegistration, Medium};

type Outcome = Result<(), DirectiveError>;

struct QueuedDirective {
    directive: Arc<Directive>,
    handler: Arc<dyn DirectiveHandler>,
    reply: oneshot::Sender<Outcome>,
}

/// dispatch 的返回值：可 await 处理结果；丢弃它不会取消处理器
#[derive(Debug)]
pub struct DispatchHandle {
    type_name: String,
    rx: oneshot::Receiver<Outcome>,
}

impl DispatchHandle {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub async fn outcome(self) -> Outcome {
        self.rx.await.unwrap_or(Err(DirectiveError::DispatcherClosed))
    }
}

/// 指令分发器：注册表 + 按 medium 的阻塞通道
pub struct DirectiveDispatcher {
    handlers: RwLock<HashMap<DirectiveKey, HandlerRegistration>>,
    lanes: Mutex<HashMap<Medium, mpsc::UnboundedSender<QueuedDirective>>>,
    handler_timeout: Option<Duration>,
}

impl DirectiveDispatcher {
    pub fn new(handler_timeout: Option<Duration>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            lanes: Mutex::new(HashMap::new()),
            handler_timeout,
        }
    }

    /// upsert：同 key 的旧注册项被替换
    pub fn register(&self, registrations: impl IntoIterator<Item = HandlerRegistration>) {
        let mut handlers = self.handlers.write();
        for registration in registrations {
            tracing::debug!(directive = %registration.key, "Register directive handler");
            handlers.insert(registration.key.clone(), registration);
        }
    }

    /// 仅当 key 与处理器实例都匹配时移除，避免撤掉其他 Agent 后来替换上的注册项
    pub fn unregister(&self, registrations: impl IntoIterator<Item = HandlerRegistration>) {
        let mut handlers = self.handlers.write();
        for registration in registrations {
            let matches = handlers
                .get(&registration.key)
                .is_some_and(|current| Arc::ptr_eq(&current.handler, &registration.handler));
            if matches {
                tracing::debug!(directive = %registration.key, "Unregister directive handler");
                handlers.remove(&registration.key);
            }
        }
    }

    pub fn registered_keys(&self) -> Vec<DirectiveKey> {
        let mut keys: Vec<DirectiveKey> = self.handlers.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// 分发一条指令；需在 tokio runtime 内调用
    pub fn dispatch(&self, directive: Directive) -> Result<DispatchHandle, DirectiveError> {
        let key = directive.key();
        let registration = self.handlers.read().get(&key).cloned().ok_or_else(|| {
            tracing::warn!(directive = %key, "No handler registered");
            DirectiveError::UnhandledDirective {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
            }
        })?;

        let directive = Arc::new(directive);
        let (reply, rx) = oneshot::channel();
        let handle = DispatchHandle {
            type_name: directive.type_name(),
            rx,
        };

        match registration.policy.serialized_medium() {
            Some(medium) => {
                let lane = self.lane(medium);
                lane.send(QueuedDirective {
                    directive,
                    handler: registration.handler,
                    reply,
                })
                .map_err(|_| DirectiveError::DispatcherClosed)?;
            }
            None => {
                let timeout = self.handler_timeout;
                let handler = registration.handler;
                tokio::spawn(async move {
                    let outcome = run_handler(handler, directive, timeout).await;
                    let _ = reply.send(outcome);
                });
            }
        }

        Ok(handle)
    }

    fn lane(&self, medium: Medium) -> mpsc::UnboundedSender<QueuedDirective> {
        let mut lanes = self.lanes.lock();
        if let Some(tx) = lanes.get(&medium).filter(|tx| !tx.is_closed()) {
            return tx.clone();
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedDirective>();
        let timeout = self.handler_timeout;
        tokio::spawn(async move {
            tracing::debug!(?medium, "Blocking lane started");
            while let Some(job) = rx.recv().await {
                let outcome = run_handler(job.handler, job.directive, timeout).await;
                let _ = job.reply.send(outcome);
            }
            tracing::debug!(?medium, "Blocking lane stopped");
        });
        lanes.insert(medium, tx.clone());
        tx
    }
}

impl Default for DirectiveDispatcher {
    fn default() -> Self {
        Self::new(None)
    }
}

/// 调用处理器：panic 与超时都转为错误；每次调用输出一条 JSON 审计日志
async fn run_handler(
    handler: Arc<dyn DirectiveHandler>,
    directive: Arc<Directive>,
    timeout: Option<Duration>,
) -> Outcome {
    let start = Instant::now();
    let type_name = directive.type_name();
    let guarded = AssertUnwindSafe(handler.handle(&directive)).catch_unwind();

    let caught = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(caught) => caught,
            Err(_) => Ok(Err(DirectiveError::HandlerTimeout(type_name.clone()))),
        },
        None => guarded.await,
    };
    let result = caught.unwrap_or_else(|_| Err(DirectiveError::HandlerPanicked(type_name.clone())));

    let outcome = match &result {
        Ok(()) => "ok",
        Err(DirectiveError::HandlerTimeout(_)) => "timeout",
        Err(DirectiveError::HandlerPanicked(_)) => "panic",
        Err(_) => "error",
    };
    let audit = serde_json::json!({
        "event": "directive_audit",
        "directive": type_name,
        "message_id": directive.message_id(),
        "ok": result.is_ok(),
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
    });
    tracing::info!(audit = %audit, "directive");
    if let Err(e) = &result {
        tracing::warn!(directive = %type_name, error = %e, "Directive handling failed");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::BlockingPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use tokio::time::sleep;

    fn directive(namespace: &str, name: &str, message_id: &str) -> Directive {
        Directive::new(namespace, name, "d1", message_id, "{}")
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl DirectiveHandler for Counting {
        async fn handle(&self, _directive: &Directive) -> Result<(), DirectiveError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// 记录执行窗口 (message_id, start, end)
    struct Windowed {
        windows: Mutex<Vec<(String, Instant, Instant)>>,
        hold: Duration,
    }

    #[async_trait]
    impl DirectiveHandler for Windowed {
        async fn handle(&self, directive: &Directive) -> Result<(), DirectiveError> {
            let start = Instant::now();
            sleep(self.hold).await;
            self.windows
                .lock()
                .push((directive.message_id().to_string(), start, Instant::now()));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl DirectiveHandler for Failing {
        async fn handle(&self, directive: &Directive) -> Result<(), DirectiveError> {
            match directive.message_id() {
                "bad" => Err(DirectiveError::PayloadDecode("missing token".into())),
                "panic" => panic!("handler bug"),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_unhandled_directive_does_not_mutate_state() {
        let dispatcher = DirectiveDispatcher::default();
        let handler: Arc<dyn DirectiveHandler> = Arc::new(Counting(AtomicUsize::new(0)));
        dispatcher.register([HandlerRegistration::new(
            "Display",
            "Close",
            BlockingPolicy::non_blocking(Medium::Visual),
            handler,
        )]);
        let before = dispatcher.registered_keys();

        let err = dispatcher.dispatch(directive("Display", "Unknown", "m1")).unwrap_err();
        assert_eq!(
            err,
            DirectiveError::UnhandledDirective {
                namespace: "Display".into(),
                name: "Unknown".into()
            }
        );
        assert_eq!(dispatcher.registered_keys(), before);
        assert!(dispatcher.lanes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_second_registration_replaces_first() {
        let dispatcher = DirectiveDispatcher::default();
        let first = Arc::new(Counting(AtomicUsize::new(0)));
        let second = Arc::new(Counting(AtomicUsize::new(0)));
        let policy = BlockingPolicy::non_blocking(Medium::Visual);
        dispatcher.register([HandlerRegistration::new("Display", "Close", policy, first.clone())]);
        dispatcher.register([HandlerRegistration::new("Display", "Close", policy, second.clone())]);
        assert_eq!(dispatcher.len(), 1);

        dispatcher
            .dispatch(directive("Display", "Close", "m1"))
            .unwrap()
            .outcome()
            .await
            .unwrap();
        assert_eq!(first.0.load(Ordering::SeqCst), 0);
        assert_eq!(second.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregister_only_removes_matching_handler() {
        let dispatcher = DirectiveDispatcher::default();
        let policy = BlockingPolicy::non_blocking(Medium::None);
        let old = HandlerRegistration::new("Extension", "Action", policy, Arc::new(Counting(AtomicUsize::new(0))));
        let new = HandlerRegistration::new("Extension", "Action", policy, Arc::new(Counting(AtomicUsize::new(0))));
        dispatcher.register([old.clone()]);
        dispatcher.register([new.clone()]);

        dispatcher.unregister([old]);
        assert_eq!(dispatcher.len(), 1);
        dispatcher.unregister([new.clone()]);
        assert!(dispatcher.is_empty());
        // 缺失的 key：无操作
        dispatcher.unregister([new]);
        assert!(dispatcher.is_empty());
    }

    #[tokio::test]
    async fn test_blocking_same_medium_never_overlaps_and_is_fifo() {
        let dispatcher = DirectiveDispatcher::default();
        let handler = Arc::new(Windowed {
            windows: Mutex::new(Vec::new()),
            hold: Duration::from_millis(30),
        });
        dispatcher.register([HandlerRegistration::new(
            "Display",
            "FullText1",
            BlockingPolicy::blocking(Medium::Visual),
            handler.clone(),
        )]);

        let handles: Vec<_> = ["m1", "m2", "m3"]
            .into_iter()
            .map(|id| dispatcher.dispatch(directive("Display", "FullText1", id)).unwrap())
            .collect();
        for handle in handles {
            handle.outcome().await.unwrap();
        }

        let windows = handler.windows.lock().clone();
        let order: Vec<&str> = windows.iter().map(|(id, _, _)| id.as_str()).collect();
        assert_eq!(order, vec!["m1", "m2", "m3"]);
        for pair in windows.windows(2) {
            assert!(pair[0].2 <= pair[1].1, "blocking visual handlers overlapped");
        }
    }

    /// 只有另一条指令也在执行时才能完成：用于证明两者的执行窗口重叠
    struct Rendezvous {
        arrived: AtomicUsize,
        notify: Notify,
    }

    #[async_trait]
    impl DirectiveHandler for Rendezvous {
        async fn handle(&self, _directive: &Directive) -> Result<(), DirectiveError> {
            if self.arrived.fetch_add(1, Ordering::SeqCst) == 0 {
                self.notify.notified().await;
            } else {
                self.notify.notify_one();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_blocking_on_different_media_may_overlap() {
        let dispatcher = DirectiveDispatcher::default();
        let handler = Arc::new(Rendezvous {
            arrived: AtomicUsize::new(0),
            notify: Notify::new(),
        });
        dispatcher.register([
            HandlerRegistration::new("AudioPlayer", "Play", BlockingPolicy::blocking(Medium::Audio), handler.clone()),
            HandlerRegistration::new("Display", "FullText1", BlockingPolicy::blocking(Medium::Visual), handler.clone()),
        ]);

        let audio = dispatcher.dispatch(directive("AudioPlayer", "Play", "m1")).unwrap();
        let visual = dispatcher.dispatch(directive("Display", "FullText1", "m2")).unwrap();
        let both = async { (audio.outcome().await, visual.outcome().await) };
        let (a, v) = tokio::time::timeout(Duration::from_secs(2), both)
            .await
            .expect("handlers on different media must run concurrently");
        assert!(a.is_ok() && v.is_ok());
    }

    #[tokio::test]
    async fn test_non_blocking_runs_while_visual_lane_is_busy() {
        let dispatcher = DirectiveDispatcher::default();
        let handler = Arc::new(Rendezvous {
            arrived: AtomicUsize::new(0),
            notify: Notify::new(),
        });
        dispatcher.register([
            HandlerRegistration::new("Display", "FullText1", BlockingPolicy::blocking(Medium::Visual), handler.clone()),
            HandlerRegistration::new("Display", "Close", BlockingPolicy::non_blocking(Medium::Visual), handler.clone()),
        ]);

        let blocking = dispatcher.dispatch(directive("Display", "FullText1", "m1")).unwrap();
        let close = dispatcher.dispatch(directive("Display", "Close", "m2")).unwrap();
        let both = async { (blocking.outcome().await, close.outcome().await) };
        assert!(tokio::time::timeout(Duration::from_secs(2), both).await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_and_panic_are_isolated() {
        let dispatcher = DirectiveDispatcher::default();
        dispatcher.register([HandlerRegistration::new(
            "Display",
            "FullText1",
            BlockingPolicy::blocking(Medium::Visual),
            Arc::new(Failing),
        )]);

        let bad = dispatcher.dispatch(directive("Display", "FullText1", "bad")).unwrap();
        let panicking = dispatcher.dispatch(directive("Display", "FullText1", "panic")).unwrap();
        let good = dispatcher.dispatch(directive("Display", "FullText1", "good")).unwrap();

        assert!(matches!(bad.outcome().await, Err(DirectiveError::PayloadDecode(_))));
        assert!(matches!(panicking.outcome().await, Err(DirectiveError::HandlerPanicked(_))));
        assert_eq!(good.outcome().await, Ok(()));
    }

    #[tokio::test]
    async fn test_handler_timeout_frees_the_lane() {
        let dispatcher = DirectiveDispatcher::new(Some(Duration::from_millis(20)));
        let slow = Arc::new(Windowed {
            windows: Mutex::new(Vec::new()),
            hold: Duration::from_millis(500),
        });
        dispatcher.register([
            HandlerRegistration::new("AudioPlayer", "Play", BlockingPolicy::blocking(Medium::Audio), slow),
            HandlerRegistration::new("AudioPlayer", "Stop", BlockingPolicy::blocking(Medium::Audio), Arc::new(Failing)),
        ]);

        let play = dispatcher.dispatch(directive("AudioPlayer", "Play", "m1")).unwrap();
        let stop = dispatcher.dispatch(directive("AudioPlayer", "Stop", "m2")).unwrap();
        assert_eq!(play.type_name(), "AudioPlayer.Play");
        assert!(matches!(play.outcome().await, Err(DirectiveError::HandlerTimeout(_))));
        assert_eq!(stop.outcome().await, Ok(()));
    }
}

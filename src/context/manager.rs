//! 上下文聚合器
//!
//! provider 可在任意时刻 add / remove（包括收集进行中）；收集时先取注册表快照，
//! 并发请求所有 provider，共用一个截止时间，返回后只合并仍处于注册状态的 provider 的结果。

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use parking_lot::RwLock;

use crate::context::{ContextInfo, ContextSnapshot};

/// 上下文提供方；返回即为唯一一次完成，None 表示当前没有可贡献的内容
#[async_trait]
pub trait ContextInfoProvider: Send + Sync {
    async fn request_context(&self) -> Option<ContextInfo>;
}

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

/// provider 注册句柄，用于 remove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(u64);

impl ProviderId {
    fn next() -> Self {
        Self(NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

enum Contribution {
    Delivered(Option<ContextInfo>),
    TimedOut,
    Panicked,
}

pub struct ContextManager {
    providers: RwLock<Vec<(ProviderId, Arc<dyn ContextInfoProvider>)>>,
    collect_timeout: Duration,
}

impl ContextManager {
    pub fn new(collect_timeout: Duration) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            collect_timeout,
        }
    }

    pub fn add(&self, provider: Arc<dyn ContextInfoProvider>) -> ProviderId {
        let id = ProviderId::next();
        self.providers.write().push((id, provider));
        id
    }

    /// 返回是否确实移除了
    pub fn remove(&self, id: ProviderId) -> bool {
        let mut providers = self.providers.write();
        let before = providers.len();
        providers.retain(|(pid, _)| *pid != id);
        providers.len() != before
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    /// 收集所有 provider 的上下文；超时的 provider 被跳过并记录在快照中
    pub async fn collect_context(&self) -> ContextSnapshot {
        let providers = self.providers.read().clone();
        let deadline = tokio::time::Instant::now() + self.collect_timeout;

        let requests = providers.into_iter().map(|(id, provider)| async move {
            let request = AssertUnwindSafe(provider.request_context()).catch_unwind();
            let contribution = match tokio::time::timeout_at(deadline, request).await {
                Ok(Ok(info)) => Contribution::Delivered(info),
                Ok(Err(_)) => Contribution::Panicked,
                Err(_) => Contribution::TimedOut,
            };
            (id, contribution)
        });
        // join_all 保持输入顺序，即注册顺序
        let results = join_all(requests).await;

        let active: HashSet<ProviderId> = self.providers.read().iter().map(|(id, _)| *id).collect();
        let mut snapshot = ContextSnapshot::default();
        for (id, contribution) in results {
            if !active.contains(&id) {
                tracing::debug!(provider = ?id, "Context provider removed during collection, dropped");
                continue;
            }
            match contribution {
                Contribution::Delivered(Some(info)) => snapshot.insert(info),
                Contribution::Delivered(None) => {}
                Contribution::TimedOut => {
                    tracing::warn!(
                        provider = ?id,
                        timeout_ms = self.collect_timeout.as_millis() as u64,
                        "Context provider timed out"
                    );
                    snapshot.mark_timed_out(id);
                }
                Contribution::Panicked => {
                    tracing::warn!(provider = ?id, "Context provider panicked");
                }
            }
        }
        snapshot
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

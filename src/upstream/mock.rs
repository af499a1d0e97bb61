//! Mock 传输（用于测试，无需网络）
//!
//! 记录每个发出的事件；set_reject(true) 后所有事件返回 Rejected。

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::core::EventError;
use crate::upstream::{Ack, Transport, WireEvent};

pub struct MockTransport {
    events: Mutex<Vec<WireEvent>>,
    reject: AtomicBool,
    sent: watch::Sender<usize>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (sent, _) = watch::channel(0);
        Self {
            events: Mutex::new(Vec::new()),
            reject: AtomicBool::new(false),
            sent,
        }
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<WireEvent> {
        self.events.lock().clone()
    }

    /// 已发出事件的 "Namespace.Name" 列表
    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.header().type_name()).collect()
    }

    /// 等待某个名称的事件出现，返回第一条匹配的事件
    pub async fn wait_for(&self, type_name: &str, timeout: Duration) -> Option<WireEvent> {
        let mut rx = self.sent.subscribe();
        let find = |events: &[WireEvent]| {
            events
                .iter()
                .find(|e| e.header().type_name() == type_name)
                .cloned()
        };
        tokio::time::timeout(timeout, async {
            loop {
                let found = find(self.events.lock().as_slice());
                if found.is_some() {
                    return found;
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        })
        .await
        .ok()
        .flatten()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, event: WireEvent) -> Result<Ack, EventError> {
        let message_id = event.header().message_id.clone();
        let type_name = event.header().type_name();
        let count = {
            let mut events = self.events.lock();
            events.push(event);
            events.len()
        };
        self.sent.send_replace(count);

        if self.reject.load(Ordering::SeqCst) {
            return Err(EventError::Rejected(type_name));
        }
        Ok(Ack { message_id })
    }
}

//! 集成测试公共工具：录制型渲染委托、Mock 传输与等待辅助

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chorus::agents::{ClearReason, RenderDelegate, RenderableItem, RenderingHandle};
use chorus::config::AppConfig;
use chorus::core::{RenderContext, UiDispatcher};
use chorus::play_sync::{PlaySyncEvent, PlaySyncState};
use chorus::upstream::MockTransport;
use chorus::{Client, ClientBuilder, Directive};
use parking_lot::Mutex;
use tokio::sync::broadcast;

pub struct Harness {
    pub client: Client,
    pub transport: Arc<MockTransport>,
    pub events: broadcast::Receiver<PlaySyncEvent>,
}

pub fn config(short_ms: u64) -> AppConfig {
    let mut config = AppConfig::default();
    config.play_sync.short_ms = short_ms;
    config.play_sync.mid_ms = short_ms * 2;
    config.context.collect_timeout_ms = 500;
    config
}

pub fn harness(config: AppConfig) -> Harness {
    harness_with(config, RenderContext::Inline)
}

pub fn harness_with(config: AppConfig, render: RenderContext) -> Harness {
    let transport = Arc::new(MockTransport::new());
    let client = ClientBuilder::new(config)
        .with_transport(transport.clone())
        .with_render_context(render)
        .build()
        .expect("client builds");
    let events = client.play_sync().subscribe();
    Harness {
        client,
        transport,
        events,
    }
}

pub fn ui_context(name: &str) -> RenderContext {
    RenderContext::Ui(UiDispatcher::spawn(name).expect("ui thread"))
}

pub fn template(dialog: &str, message: &str, play_service_id: &str, stack: Option<&str>) -> Directive {
    let mut payload = serde_json::json!({
        "token": format!("token-{message}"),
        "playServiceId": play_service_id,
        "title": {"text": "hello"},
    });
    if let Some(stack) = stack {
        payload["playStackControl"] = serde_json::json!({"playServiceId": stack});
    }
    Directive::new("Display", "FullText1", dialog, message, payload.to_string())
}

pub fn close(play_service_id: &str) -> Directive {
    Directive::new(
        "Display",
        "Close",
        "close-dialog",
        "close-message",
        serde_json::json!({"playServiceId": play_service_id}).to_string(),
    )
}

pub async fn next_state(rx: &mut broadcast::Receiver<PlaySyncEvent>) -> PlaySyncState {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no play sync event within 2s")
        .expect("play sync channel closed")
        .state
}

/// 在 window 时间内没有新的播放同步事件
pub async fn quiet_for(rx: &mut broadcast::Receiver<PlaySyncEvent>, window: Duration) -> bool {
    tokio::time::timeout(window, rx.recv()).await.is_err()
}

/// 轮询直到条件成立（最多 2 秒）
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// 轮询上下文快照中的 Display 条目，直到等于 expected
pub async fn display_context_becomes(client: &Client, expected: &serde_json::Value) -> bool {
    for _ in 0..200 {
        let snapshot = client.context_manager().collect_context().await;
        if snapshot.capability("Display") == Some(expected) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// 录制型渲染委托：可配置是否接受，记录 offer / clear，测试可手动 release handle
pub struct RecordingRenderer {
    accept: bool,
    /// 设置后只接受列出的 templateId
    only: Option<Vec<String>>,
    pub offers: Mutex<Vec<String>>,
    pub clears: Mutex<Vec<(String, ClearReason)>>,
    pub on_ui_thread: Mutex<Vec<bool>>,
    handles: Mutex<HashMap<String, RenderingHandle>>,
}

impl RecordingRenderer {
    pub fn accepting() -> Arc<Self> {
        Self::new(true)
    }

    pub fn declining() -> Arc<Self> {
        Self::new(false)
    }

    pub fn accepting_only(template_ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            only: Some(template_ids.iter().map(|id| id.to_string()).collect()),
            ..Self::build(true)
        })
    }

    fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self::build(accept))
    }

    fn build(accept: bool) -> Self {
        Self {
            accept,
            only: None,
            offers: Mutex::new(Vec::new()),
            clears: Mutex::new(Vec::new()),
            on_ui_thread: Mutex::new(Vec::new()),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn as_delegate(self: &Arc<Self>) -> Arc<dyn RenderDelegate> {
        self.clone()
    }

    /// 模拟渲染面被外部拆除
    pub fn release(&self, template_id: &str) {
        if let Some(handle) = self.handles.lock().remove(template_id) {
            handle.release();
        }
    }

    pub fn clears(&self) -> Vec<(String, ClearReason)> {
        self.clears.lock().clone()
    }

    pub fn offers(&self) -> Vec<String> {
        self.offers.lock().clone()
    }
}

impl RenderDelegate for RecordingRenderer {
    fn offer_render(&self, item: &RenderableItem) -> Option<RenderingHandle> {
        self.offers.lock().push(item.template_id.clone());
        self.on_ui_thread.lock().push(UiDispatcher::is_current());
        if !self.accept || self.only.as_ref().is_some_and(|ids| !ids.contains(&item.template_id)) {
            return None;
        }
        let handle = RenderingHandle::new();
        self.handles.lock().insert(item.template_id.clone(), handle.clone());
        Some(handle)
    }

    fn on_clear(&self, item: &RenderableItem, reason: ClearReason) {
        self.clears.lock().push((item.template_id.clone(), reason));
        if reason == ClearReason::Directive {
            self.handles.lock().remove(&item.template_id);
        }
    }
}

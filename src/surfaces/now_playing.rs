//! Now-playing 控制器
//!
//! 只接受带音频模板（`template.title.text` / `template.content.title`）的条目，
//! 把标题、专辑与封面发布到 watch 通道，由宿主同步到系统的 now-playing 信息。
//! 音频会话以 mix-with-others 方式运行时系统会忽略更新，此时控制器不挂载。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::watch;

use crate::agents::{ClearReason, DisplayAgent, RenderDelegate, RenderableItem, RenderingHandle};

#[derive(Debug, Clone, PartialEq)]
pub struct NowPlayingInfo {
    pub template_id: String,
    pub title: String,
    pub album_title: String,
    pub image_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct AudioTemplatePayload {
    template: AudioTemplate,
}

#[derive(Deserialize)]
struct AudioTemplate {
    title: AudioTitle,
    content: AudioContent,
}

#[derive(Deserialize)]
struct AudioTitle {
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudioContent {
    title: String,
    image_url: Option<String>,
}

pub struct NowPlayingController {
    mix_with_others: bool,
    info: watch::Sender<Option<NowPlayingInfo>>,
    rendering: Mutex<Option<(String, RenderingHandle)>>,
}

impl NowPlayingController {
    pub fn new(mix_with_others: bool) -> Arc<Self> {
        let (info, _) = watch::channel(None);
        Arc::new(Self {
            mix_with_others,
            info,
            rendering: Mutex::new(None),
        })
    }

    /// 挂载到 DisplayAgent；mix-with-others 时不挂载并返回 false
    pub fn attach(self: &Arc<Self>, agent: &DisplayAgent) -> bool {
        if self.mix_with_others {
            tracing::info!("Audio session mixes with others, now-playing controller not attached");
            return false;
        }
        agent.add_delegate(self.clone());
        true
    }

    pub fn detach(self: &Arc<Self>, agent: &DisplayAgent) {
        if self.mix_with_others {
            return;
        }
        let delegate: Arc<dyn RenderDelegate> = self.clone();
        agent.remove_delegate(&delegate);
        self.remove();
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<NowPlayingInfo>> {
        self.info.subscribe()
    }

    pub fn current(&self) -> Option<NowPlayingInfo> {
        self.info.borrow().clone()
    }

    /// 清空 now-playing 信息并释放渲染
    pub fn remove(&self) {
        if let Some((_, handle)) = self.rendering.lock().take() {
            handle.release();
        }
        self.info.send_replace(None);
    }
}

impl RenderDelegate for NowPlayingController {
    fn offer_render(&self, item: &RenderableItem) -> Option<RenderingHandle> {
        let payload: AudioTemplatePayload = serde_json::from_value(item.payload.clone()).ok()?;
        let info = NowPlayingInfo {
            template_id: item.template_id.clone(),
            title: payload.template.title.text,
            album_title: payload.template.content.title,
            image_url: payload.template.content.image_url,
            updated_at: Utc::now(),
        };
        tracing::debug!(title = %info.title, "Now playing updated");

        let handle = RenderingHandle::new();
        if let Some((_, previous)) = self
            .rendering
            .lock()
            .replace((item.template_id.clone(), handle.clone()))
        {
            previous.release();
        }
        self.info.send_replace(Some(info));
        Some(handle)
    }

    fn on_clear(&self, item: &RenderableItem, _reason: ClearReason) {
        let matches = self
            .rendering
            .lock()
            .as_ref()
            .is_some_and(|(template_id, _)| *template_id == item.template_id);
        if matches {
            self.remove();
        }
    }
}

//! 控制台渲染面：接受所有模板，把渲染与清除写入日志

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::agents::{ClearReason, RenderDelegate, RenderableItem, RenderingHandle};

#[derive(Default)]
pub struct ConsoleRenderer {
    /// templateId → 渲染 handle
    showing: Mutex<HashMap<String, RenderingHandle>>,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 关闭模板（相当于用户关掉界面）；返回是否确实在显示
    pub fn dismiss(&self, template_id: &str) -> bool {
        let Some(handle) = self.showing.lock().remove(template_id) else {
            return false;
        };
        tracing::info!(%template_id, "Console dismissed template");
        handle.release();
        true
    }

    /// 正在显示的 templateId
    pub fn showing(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.showing.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl RenderDelegate for ConsoleRenderer {
    fn offer_render(&self, item: &RenderableItem) -> Option<RenderingHandle> {
        tracing::info!(
            template = %item.template_type,
            template_id = %item.template_id,
            token = %item.token,
            duration = ?item.duration,
            "Console rendering template"
        );
        let handle = RenderingHandle::new();
        self.showing.lock().insert(item.template_id.clone(), handle.clone());
        Some(handle)
    }

    fn on_clear(&self, item: &RenderableItem, reason: ClearReason) {
        match reason {
            ClearReason::Timer => {
                self.dismiss(&item.template_id);
            }
            ClearReason::Directive => {
                if self.showing.lock().remove(&item.template_id).is_some() {
                    tracing::info!(template_id = %item.template_id, "Console cleared template");
                }
            }
        }
    }
}

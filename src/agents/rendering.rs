//! 渲染关联
//!
//! 一个 RenderDelegate 代表一个挂载的呈现面（UI 界面、now-playing 等）。Agent 按挂载顺序保存
//! 每个委托当前正在渲染的条目；委托被弱引用持有，销毁后自动失效。
//! 委托通过 [`RenderingHandle`] 显式声明渲染的存活期：handle 被 release 即表示该渲染已被外部拆除。

use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::play_sync::PlaySyncDuration;

/// Agent 解码「显示」类指令后生成的可呈现条目
#[derive(Debug, Clone, PartialEq)]
pub struct RenderableItem {
    /// 指令类型，如 "Display.FullText1"
    pub template_type: String,
    pub dialog_request_id: String,
    pub play_service_id: String,
    /// play stack 分组键
    pub play_stack_service_id: Option<String>,
    /// 等于指令的 messageId
    pub template_id: String,
    pub token: String,
    pub duration: PlaySyncDuration,
    pub payload: Value,
}

/// 清除原因：Timer 为软清除（可忽略），Directive 为硬清除（必须拆除）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    Timer,
    Directive,
}

/// 渲染存活信号；clone 共享同一信号
#[derive(Debug, Clone, Default)]
pub struct RenderingHandle {
    token: CancellationToken,
}

impl RenderingHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 声明渲染已被拆除（用户关闭、界面销毁等）
    pub fn release(&self) {
        self.token.cancel();
    }

    pub fn is_released(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn released(&self) {
        self.token.cancelled().await;
    }
}

/// 渲染委托；在 RenderContext（UI 线程或 Agent 队列）上被调用
pub trait RenderDelegate: Send + Sync {
    /// 渲染条目并返回存活 handle，None 表示拒绝
    fn offer_render(&self, item: &RenderableItem) -> Option<RenderingHandle>;

    fn on_clear(&self, item: &RenderableItem, reason: ClearReason);
}

/// 委托身份（按实例地址）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelegateId(usize);

impl DelegateId {
    pub fn of(delegate: &Arc<dyn RenderDelegate>) -> Self {
        Self(Arc::as_ptr(delegate) as *const () as usize)
    }
}

struct RenderingInfo {
    id: DelegateId,
    delegate: Weak<dyn RenderDelegate>,
    current_item: Option<RenderableItem>,
    /// 取消后停止监听 handle 的 release
    watch: Option<CancellationToken>,
}

impl RenderingInfo {
    fn clear_item(&mut self) -> Option<RenderableItem> {
        if let Some(watch) = self.watch.take() {
            watch.cancel();
        }
        self.current_item.take()
    }
}

/// 有序的渲染关联表；只在所属 Agent 的队列上访问
#[derive(Default)]
pub struct RenderingRegistry {
    entries: Vec<RenderingInfo>,
}

impl RenderingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 挂载委托；重复挂载替换旧关联并返回旧关联正在渲染的条目
    pub fn add(&mut self, delegate: &Arc<dyn RenderDelegate>) -> Option<RenderableItem> {
        let id = DelegateId::of(delegate);
        let replaced = self.remove(id);
        self.entries.push(RenderingInfo {
            id,
            delegate: Arc::downgrade(delegate),
            current_item: None,
            watch: None,
        });
        replaced
    }

    /// 卸载委托，返回它正在渲染的条目
    pub fn remove(&mut self, id: DelegateId) -> Option<RenderableItem> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        let mut info = self.entries.remove(index);
        info.clear_item()
    }

    /// 移除已销毁的委托，返回它们正在渲染的条目
    pub fn prune(&mut self) -> Vec<RenderableItem> {
        let mut orphaned = Vec::new();
        self.entries.retain_mut(|info| {
            if info.delegate.strong_count() > 0 {
                return true;
            }
            orphaned.extend(info.clear_item());
            false
        });
        orphaned
    }

    /// 存活的委托（挂载顺序）
    pub fn delegates(&self) -> Vec<(DelegateId, Arc<dyn RenderDelegate>)> {
        self.entries
            .iter()
            .filter_map(|info| info.delegate.upgrade().map(|d| (info.id, d)))
            .collect()
    }

    /// 记录委托开始渲染 item（原位更新，保持挂载顺序），返回被替换的旧条目
    pub fn set_rendered(
        &mut self,
        id: DelegateId,
        item: RenderableItem,
        watch: CancellationToken,
    ) -> Option<RenderableItem> {
        let Some(info) = self.entries.iter_mut().find(|e| e.id == id) else {
            watch.cancel();
            return None;
        };
        let previous = info.clear_item();
        info.current_item = Some(item);
        info.watch = Some(watch);
        previous
    }

    /// 若委托正在渲染 template_id，清除并返回该条目
    pub fn remove_rendered(&mut self, id: DelegateId, template_id: &str) -> Option<RenderableItem> {
        let info = self.entries.iter_mut().find(|e| {
            e.id == id
                && e.current_item
                    .as_ref()
                    .is_some_and(|item| item.template_id == template_id)
        })?;
        info.clear_item()
    }

    /// 清除所有满足条件的渲染，返回 (委托, 条目)
    pub fn take_rendered(
        &mut self,
        predicate: impl Fn(&RenderableItem) -> bool,
    ) -> Vec<(Arc<dyn RenderDelegate>, RenderableItem)> {
        let mut taken = Vec::new();
        for info in &mut self.entries {
            if !info.current_item.as_ref().is_some_and(&predicate) {
                continue;
            }
            let delegate = info.delegate.upgrade();
            if let (Some(delegate), Some(item)) = (delegate, info.clear_item()) {
                taken.push((delegate, item));
            }
        }
        taken
    }

    /// 满足条件的渲染（不修改）
    pub fn rendered(
        &self,
        predicate: impl Fn(&RenderableItem) -> bool,
    ) -> Vec<(Arc<dyn RenderDelegate>, RenderableItem)> {
        self.entries
            .iter()
            .filter_map(|info| {
                let item = info.current_item.as_ref().filter(|item| predicate(*item))?;
                Some((info.delegate.upgrade()?, item.clone()))
            })
            .collect()
    }

    /// 是否还有委托在渲染 template_id
    pub fn has_rendered(&self, template_id: &str) -> bool {
        self.entries.iter().any(|e| {
            e.current_item
                .as_ref()
                .is_some_and(|item| item.template_id == template_id)
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

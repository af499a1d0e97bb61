//! DisplayAgent
//!
//! 所有状态（渲染关联、计时标记、当前条目）只在 Agent 自己的后台任务上修改；
//! 指令处理、播放同步回调、委托挂载与 handle 释放都以命令形式进入同一队列，严格串行。
//!
//! 上行事件一律后台发送：上下文收集会向本队列请求 Display 上下文，在队列内 await 发送会自锁。

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::agents::display::payload::{decode_template, ClosePayload, TEMPLATE_NAMES};
use crate::agents::{
    AgentServices, CapabilityAgentProperty, ClearReason, DelegateId, RenderDelegate,
    RenderableItem, RenderingHandle, RenderingRegistry,
};
use crate::config::DisplaySection;
use crate::context::{ContextInfo, ContextInfoProvider, ProviderId};
use crate::core::{DirectiveError, RenderContext};
use crate::directive::{BlockingPolicy, Directive, DirectiveHandler, HandlerRegistration, Medium};
use crate::play_sync::{PlayStackKey, PlaySyncDelegate, PlaySyncDuration, PlaySyncManager, PlaySyncState};
use crate::upstream::{UpstreamDataSender, UpstreamHeader};

const NAMESPACE: &str = "Display";

type Reply = oneshot::Sender<Result<(), DirectiveError>>;

enum DisplayCommand {
    Render {
        directive: Directive,
        reply: Reply,
    },
    Close {
        directive: Directive,
        reply: Reply,
    },
    PlaySyncChanged {
        state: PlaySyncState,
        dialog_request_id: String,
    },
    AddDelegate(Arc<dyn RenderDelegate>),
    RemoveDelegate(DelegateId),
    ElementSelected {
        template_id: String,
        token: String,
    },
    StopRenderingTimer(String),
    RenderingReleased {
        delegate_id: DelegateId,
        template_id: String,
    },
    RequestContext(oneshot::Sender<ContextInfo>),
}

/// Display 能力（模板显示 / 关闭 / 元素选择）
pub struct DisplayAgent {
    property: CapabilityAgentProperty,
    services: AgentServices,
    tx: mpsc::UnboundedSender<DisplayCommand>,
    /// 分组 → 条目时长档位，供播放同步任务读取
    durations: Arc<Mutex<HashMap<PlayStackKey, PlaySyncDuration>>>,
    registrations: Mutex<Vec<HandlerRegistration>>,
    provider_id: Mutex<Option<ProviderId>>,
    shutdown: CancellationToken,
}

impl DisplayAgent {
    /// 创建 Agent，注册指令处理器与上下文；需在 tokio runtime 内调用
    pub fn new(config: &DisplaySection, services: AgentServices, render: RenderContext) -> Arc<Self> {
        let property = CapabilityAgentProperty::new(NAMESPACE, config.version.as_str());
        let durations = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let agent = Arc::new_cyclic(move |weak: &Weak<DisplayAgent>| {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = DisplayWorker {
                agent: weak.clone(),
                version: property.version.clone(),
                play_sync: services.play_sync.clone(),
                upstream: services.upstream.clone(),
                render,
                renderings: RenderingRegistry::new(),
                timer_flags: HashMap::new(),
                current_item: None,
                durations: durations.clone(),
                tx: tx.clone(),
            };
            tokio::spawn(worker.run(rx, shutdown.clone()));

            DisplayAgent {
                property,
                services,
                tx,
                durations,
                registrations: Mutex::new(Vec::new()),
                provider_id: Mutex::new(None),
                shutdown,
            }
        });

        let handler: Arc<dyn DirectiveHandler> = agent.clone();
        let registrations = handler_registrations(handler);
        agent.services.dispatcher.register(registrations.clone());
        *agent.registrations.lock() = registrations;

        let provider: Arc<dyn ContextInfoProvider> = agent.clone();
        *agent.provider_id.lock() = Some(agent.services.context.add(provider));

        tracing::info!(version = %agent.property.version, "DisplayAgent initialized");
        agent
    }

    pub fn property(&self) -> &CapabilityAgentProperty {
        &self.property
    }

    /// 挂载渲染委托；重复挂载会替换旧关联
    pub fn add_delegate(&self, delegate: Arc<dyn RenderDelegate>) -> DelegateId {
        let id = DelegateId::of(&delegate);
        self.send(DisplayCommand::AddDelegate(delegate));
        id
    }

    /// 卸载渲染委托；若它是某条目最后的渲染者，该条目的播放同步立即释放
    pub fn remove_delegate(&self, delegate: &Arc<dyn RenderDelegate>) {
        self.send(DisplayCommand::RemoveDelegate(DelegateId::of(delegate)));
    }

    /// 用户选择了模板中的元素
    pub fn element_did_select(&self, template_id: &str, token: &str) {
        self.send(DisplayCommand::ElementSelected {
            template_id: template_id.to_string(),
            token: token.to_string(),
        });
    }

    /// 保持显示：取消 template_id 的自动消失
    pub fn stop_rendering_timer(&self, template_id: &str) {
        self.send(DisplayCommand::StopRenderingTimer(template_id.to_string()));
    }

    /// 撤销指令注册与上下文，停止后台任务
    pub fn shutdown(&self) {
        let registrations = std::mem::take(&mut *self.registrations.lock());
        self.services.dispatcher.unregister(registrations);
        if let Some(id) = self.provider_id.lock().take() {
            self.services.context.remove(id);
        }
        self.shutdown.cancel();
        tracing::info!("DisplayAgent shut down");
    }

    fn send(&self, command: DisplayCommand) {
        if self.tx.send(command).is_err() {
            tracing::debug!("DisplayAgent stopped, command dropped");
        }
    }

    fn unavailable() -> DirectiveError {
        DirectiveError::AgentUnavailable(NAMESPACE.to_string())
    }
}

impl Drop for DisplayAgent {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn handler_registrations(handler: Arc<dyn DirectiveHandler>) -> Vec<HandlerRegistration> {
    let mut registrations = vec![HandlerRegistration::new(
        NAMESPACE,
        "Close",
        BlockingPolicy::non_blocking(Medium::Visual),
        handler.clone(),
    )];
    registrations.extend(TEMPLATE_NAMES.iter().map(|name| {
        HandlerRegistration::new(
            NAMESPACE,
            *name,
            BlockingPolicy::blocking(Medium::Visual),
            handler.clone(),
        )
    }));
    registrations
}

#[async_trait]
impl DirectiveHandler for DisplayAgent {
    async fn handle(&self, directive: &Directive) -> Result<(), DirectiveError> {
        let (reply, rx) = oneshot::channel();
        let directive = directive.clone();
        let command = if directive.name() == "Close" {
            DisplayCommand::Close { directive, reply }
        } else {
            DisplayCommand::Render { directive, reply }
        };
        self.tx.send(command).map_err(|_| Self::unavailable())?;
        rx.await.map_err(|_| Self::unavailable())?
    }
}

impl PlaySyncDelegate for DisplayAgent {
    fn name(&self) -> &str {
        &self.property.name
    }

    fn play_sync_duration(&self, key: &PlayStackKey) -> PlaySyncDuration {
        self.durations.lock().get(key).copied().unwrap_or_default()
    }

    fn play_sync_did_change(&self, state: PlaySyncState, dialog_request_id: &str) {
        self.send(DisplayCommand::PlaySyncChanged {
            state,
            dialog_request_id: dialog_request_id.to_string(),
        });
    }
}

#[async_trait]
impl ContextInfoProvider for DisplayAgent {
    async fn request_context(&self) -> Option<ContextInfo> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(DisplayCommand::RequestContext(reply)).ok()?;
        rx.await.ok()
    }
}

fn same_group(a: &RenderableItem, b: &RenderableItem) -> bool {
    a.dialog_request_id == b.dialog_request_id && a.play_stack_service_id == b.play_stack_service_id
}

/// Agent 的串行队列
struct DisplayWorker {
    agent: Weak<DisplayAgent>,
    version: String,
    play_sync: Arc<PlaySyncManager>,
    upstream: Arc<UpstreamDataSender>,
    render: RenderContext,
    renderings: RenderingRegistry,
    /// templateId → 是否允许自动消失
    timer_flags: HashMap<String, bool>,
    current_item: Option<RenderableItem>,
    durations: Arc<Mutex<HashMap<PlayStackKey, PlaySyncDuration>>>,
    tx: mpsc::UnboundedSender<DisplayCommand>,
}

impl DisplayWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DisplayCommand>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        if let (Some(item), Some(owner)) = (self.current_item.take(), self.owner()) {
            self.play_sync
                .cancel_sync(&owner, &item.dialog_request_id, item.play_stack_service_id.as_deref());
        }
        self.renderings.take_rendered(|_| true);
        tracing::debug!("DisplayAgent worker stopped");
    }

    async fn handle(&mut self, command: DisplayCommand) {
        match command {
            DisplayCommand::Render { directive, reply } => {
                let _ = reply.send(self.render_template(&directive));
            }
            DisplayCommand::Close { directive, reply } => {
                let _ = reply.send(self.close(&directive));
            }
            DisplayCommand::PlaySyncChanged {
                state,
                dialog_request_id,
            } => {
                tracing::debug!(%state, %dialog_request_id, "Display play sync changed");
                match state {
                    PlaySyncState::Synced => self.on_synced(&dialog_request_id).await,
                    PlaySyncState::Releasing => self.on_releasing(&dialog_request_id).await,
                    PlaySyncState::Released => self.on_released(&dialog_request_id).await,
                    PlaySyncState::Prepared => {}
                }
            }
            DisplayCommand::AddDelegate(delegate) => {
                if let Some(item) = self.renderings.add(&delegate) {
                    self.release_if_unrendered(&item);
                }
            }
            DisplayCommand::RemoveDelegate(id) => {
                if let Some(item) = self.renderings.remove(id) {
                    self.release_if_unrendered(&item);
                }
            }
            DisplayCommand::ElementSelected { template_id, token } => {
                self.element_selected(&template_id, token);
            }
            DisplayCommand::StopRenderingTimer(template_id) => {
                self.stop_rendering_timer(template_id);
            }
            DisplayCommand::RenderingReleased {
                delegate_id,
                template_id,
            } => {
                if let Some(item) = self.renderings.remove_rendered(delegate_id, &template_id) {
                    tracing::debug!(%template_id, "Rendering released by delegate");
                    self.release_if_unrendered(&item);
                }
            }
            DisplayCommand::RequestContext(reply) => {
                let _ = reply.send(self.context_info());
            }
        }
    }

    fn owner(&self) -> Option<Arc<dyn PlaySyncDelegate>> {
        self.agent
            .upgrade()
            .map(|agent| agent as Arc<dyn PlaySyncDelegate>)
    }

    fn render_template(&mut self, directive: &Directive) -> Result<(), DirectiveError> {
        let item = decode_template(directive)?;
        let owner = self.owner().ok_or_else(DisplayAgent::unavailable)?;
        tracing::info!(
            template = %item.template_type,
            template_id = %item.template_id,
            play_service_id = %item.play_service_id,
            "Display template received"
        );

        // 尚未渲染就被新条目取代的旧条目不会再被显示，撤销它的播放同步
        if let Some(previous) = self.current_item.take() {
            if !same_group(&previous, &item) && !self.renderings.has_rendered(&previous.template_id) {
                self.timer_flags.remove(&previous.template_id);
                self.play_sync.cancel_sync(
                    &owner,
                    &previous.dialog_request_id,
                    previous.play_stack_service_id.as_deref(),
                );
            }
        }

        self.timer_flags.insert(item.template_id.clone(), true);
        self.durations.lock().insert(
            PlayStackKey::new(&item.dialog_request_id, item.play_stack_service_id.as_deref()),
            item.duration,
        );
        self.play_sync
            .start_sync(&owner, &item.dialog_request_id, item.play_stack_service_id.as_deref());
        self.current_item = Some(item);
        Ok(())
    }

    fn close(&mut self, directive: &Directive) -> Result<(), DirectiveError> {
        let payload = ClosePayload::decode(directive)?;
        let matched = self
            .current_item
            .clone()
            .filter(|item| item.play_service_id == payload.play_service_id);

        let name = if matched.is_some() { "CloseSucceeded" } else { "CloseFailed" };
        self.send_event(name, json!({ "playServiceId": payload.play_service_id }));

        if let Some(item) = matched {
            self.play_sync
                .release_sync_immediately(&item.dialog_request_id, item.play_stack_service_id.as_deref());
        }
        Ok(())
    }

    async fn on_synced(&mut self, dialog_request_id: &str) {
        let Some(item) = self
            .current_item
            .clone()
            .filter(|item| item.dialog_request_id == dialog_request_id)
        else {
            return;
        };
        for orphan in self.renderings.prune() {
            if !same_group(&orphan, &item) {
                self.release_if_unrendered(&orphan);
            }
        }

        let mut rendered = false;
        for (id, delegate) in self.renderings.delegates() {
            let offer = item.clone();
            let offered = self.render.invoke(move || delegate.offer_render(&offer)).await;
            match offered {
                Ok(Some(handle)) => {
                    rendered = true;
                    let watch = self.watch_release(id, &item.template_id, handle);
                    if let Some(previous) = self.renderings.set_rendered(id, item.clone(), watch) {
                        if !same_group(&previous, &item) {
                            self.release_if_unrendered(&previous);
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, template_id = %item.template_id, "Render delegate failed");
                }
            }
        }

        if !rendered {
            tracing::info!(template_id = %item.template_id, "No delegate rendered the template");
            self.current_item = None;
            self.timer_flags.remove(&item.template_id);
            if let Some(owner) = self.owner() {
                self.play_sync
                    .cancel_sync(&owner, &item.dialog_request_id, item.play_stack_service_id.as_deref());
            }
        } else if self.timer_flags.get(&item.template_id) == Some(&false) {
            self.play_sync
                .stop_timer(&item.dialog_request_id, item.play_stack_service_id.as_deref());
        }
    }

    async fn on_releasing(&mut self, dialog_request_id: &str) {
        for (delegate, item) in self
            .renderings
            .rendered(|item| item.dialog_request_id == dialog_request_id)
        {
            if self.timer_flags.get(&item.template_id) == Some(&false) {
                tracing::debug!(template_id = %item.template_id, "Rendering timer disabled, keep showing");
                continue;
            }
            self.clear(delegate, item, ClearReason::Timer).await;
        }
    }

    async fn on_released(&mut self, dialog_request_id: &str) {
        let is_current = self
            .current_item
            .as_ref()
            .is_some_and(|item| item.dialog_request_id == dialog_request_id);
        if let Some(item) = is_current.then(|| self.current_item.take()).flatten() {
            self.timer_flags.remove(&item.template_id);
        }
        self.durations
            .lock()
            .retain(|key, _| key.dialog_request_id != dialog_request_id);
        for (delegate, item) in self
            .renderings
            .take_rendered(|item| item.dialog_request_id == dialog_request_id)
        {
            self.timer_flags.remove(&item.template_id);
            self.clear(delegate, item, ClearReason::Directive).await;
        }
    }

    async fn clear(&self, delegate: Arc<dyn RenderDelegate>, item: RenderableItem, reason: ClearReason) {
        let template_id = item.template_id.clone();
        let result = self.render.invoke(move || delegate.on_clear(&item, reason)).await;
        if let Err(e) = result {
            tracing::warn!(error = %e, %template_id, ?reason, "Render delegate failed to clear");
        }
    }

    /// 监听 handle 的 release；返回的 token 取消后停止监听
    fn watch_release(&self, delegate_id: DelegateId, template_id: &str, handle: RenderingHandle) -> CancellationToken {
        let stop = CancellationToken::new();
        let stopped = stop.clone();
        let tx = self.tx.clone();
        let template_id = template_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = stopped.cancelled() => {}
                _ = handle.released() => {
                    let _ = tx.send(DisplayCommand::RenderingReleased { delegate_id, template_id });
                }
            }
        });
        stop
    }

    /// 条目已没有任何渲染者时立即释放其播放同步
    fn release_if_unrendered(&mut self, item: &RenderableItem) {
        if self.renderings.has_rendered(&item.template_id) {
            return;
        }
        self.timer_flags.remove(&item.template_id);
        tracing::info!(template_id = %item.template_id, "Last rendering removed, release play sync");
        self.play_sync
            .release_sync_immediately(&item.dialog_request_id, item.play_stack_service_id.as_deref());
    }

    fn element_selected(&self, template_id: &str, token: String) {
        let rendered = self
            .renderings
            .rendered(|item| item.template_id == template_id)
            .into_iter()
            .next();
        let Some((_, item)) = rendered else {
            tracing::debug!(%template_id, "Element selected on unknown template");
            return;
        };
        self.send_event(
            "ElementSelected",
            json!({ "playServiceId": item.play_service_id, "token": token }),
        );
    }

    fn stop_rendering_timer(&mut self, template_id: String) {
        let item = self
            .current_item
            .clone()
            .filter(|item| item.template_id == template_id)
            .or_else(|| {
                self.renderings
                    .rendered(|item| item.template_id == template_id)
                    .into_iter()
                    .next()
                    .map(|(_, item)| item)
            });
        self.timer_flags.insert(template_id, false);
        if let Some(item) = item {
            self.play_sync
                .stop_timer(&item.dialog_request_id, item.play_stack_service_id.as_deref());
        }
    }

    fn context_info(&self) -> ContextInfo {
        let mut payload = json!({ "version": self.version });
        if let Some(item) = &self.current_item {
            payload["token"] = Value::from(item.token.clone());
            payload["playServiceId"] = Value::from(item.play_service_id.clone());
        }
        ContextInfo::capability(NAMESPACE, payload)
    }

    fn send_event(&self, name: &str, payload: Value) {
        let header = UpstreamHeader::new(NAMESPACE, name, self.version.as_str());
        self.upstream.send_with_result(header, payload, None);
    }
}

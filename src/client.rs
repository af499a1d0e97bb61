//! 客户端构建器：按 AppConfig 统一创建并连接各组件
//!
//! DirectiveDispatcher、ContextManager、PlaySyncManager、UpstreamDataSender 为共享组件，
//! Capability Agent 在构建时向它们注册自己，Client::shutdown 时再撤销。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;

use crate::agents::{AgentServices, DisplayAgent, ExtensionAgent, KeywordContextProvider};
use crate::config::AppConfig;
use crate::context::{ContextInfoProvider, ContextManager, ProviderId};
use crate::core::{DirectiveError, RenderContext, ShutdownCleanup, UiDispatcher};
use crate::directive::{Directive, DirectiveDispatcher, DispatchHandle};
use crate::play_sync::PlaySyncManager;
use crate::upstream::{StdoutTransport, Transport, UpstreamDataSender};

/// 客户端构建器
pub struct ClientBuilder {
    config: AppConfig,
    transport: Option<Arc<dyn Transport>>,
    render_context: Option<RenderContext>,
}

impl ClientBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            transport: None,
            render_context: None,
        }
    }

    /// 上行传输；默认写标准输出
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 覆盖 `[display] use_ui_thread` 的选择
    pub fn with_render_context(mut self, render_context: RenderContext) -> Self {
        self.render_context = Some(render_context);
        self
    }

    /// 构建客户端；需在 tokio runtime 内调用
    pub fn build(self) -> anyhow::Result<Client> {
        let config = self.config;
        let render_context = match self.render_context {
            Some(render_context) => render_context,
            None if config.display.use_ui_thread => {
                let ui = UiDispatcher::spawn("chorus-ui").context("Failed to start UI thread")?;
                RenderContext::Ui(ui)
            }
            None => RenderContext::Inline,
        };
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(StdoutTransport) as Arc<dyn Transport>);

        let dispatcher = Arc::new(DirectiveDispatcher::new(config.dispatcher.handler_timeout()));
        let context = Arc::new(ContextManager::new(config.context.collect_timeout()));
        let play_sync = Arc::new(PlaySyncManager::new(config.play_sync.clone()));
        let upstream = Arc::new(UpstreamDataSender::new(context.clone(), transport));
        let services = AgentServices {
            dispatcher: dispatcher.clone(),
            context: context.clone(),
            play_sync: play_sync.clone(),
            upstream: upstream.clone(),
        };

        let display = DisplayAgent::new(&config.display, services.clone(), render_context);
        let extension = ExtensionAgent::new(&config.extension, services);

        let keyword = Arc::new(KeywordContextProvider::new(config.app.wakeup_word.clone()));
        let keyword_provider: Arc<dyn ContextInfoProvider> = keyword.clone();
        let keyword_id = context.add(keyword_provider);

        tracing::info!(
            name = config.app.name.as_deref().unwrap_or("chorus"),
            handlers = dispatcher.len(),
            providers = context.len(),
            "Client built"
        );

        Ok(Client {
            config,
            dispatcher,
            context,
            play_sync,
            upstream,
            display,
            extension,
            keyword,
            keyword_id,
            closed: AtomicBool::new(false),
        })
    }
}

/// 已连接的客户端
pub struct Client {
    config: AppConfig,
    dispatcher: Arc<DirectiveDispatcher>,
    context: Arc<ContextManager>,
    play_sync: Arc<PlaySyncManager>,
    upstream: Arc<UpstreamDataSender>,
    display: Arc<DisplayAgent>,
    extension: Arc<ExtensionAgent>,
    keyword: Arc<KeywordContextProvider>,
    keyword_id: ProviderId,
    closed: AtomicBool,
}

impl Client {
    pub fn dispatch(&self, directive: Directive) -> Result<DispatchHandle, DirectiveError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DirectiveError::DispatcherClosed);
        }
        self.dispatcher.dispatch(directive)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<DirectiveDispatcher> {
        &self.dispatcher
    }

    pub fn context_manager(&self) -> &Arc<ContextManager> {
        &self.context
    }

    pub fn play_sync(&self) -> &Arc<PlaySyncManager> {
        &self.play_sync
    }

    pub fn upstream(&self) -> &Arc<UpstreamDataSender> {
        &self.upstream
    }

    pub fn display(&self) -> &Arc<DisplayAgent> {
        &self.display
    }

    pub fn extension(&self) -> &Arc<ExtensionAgent> {
        &self.extension
    }

    pub fn keyword(&self) -> &Arc<KeywordContextProvider> {
        &self.keyword
    }

    /// 撤销所有注册并停止后台任务；重复调用无副作用
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.display.shutdown();
        self.extension.shutdown();
        self.context.remove(self.keyword_id);
        self.play_sync.shutdown();
        tracing::info!("Client shut down");
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for Client {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.shutdown();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "client"
    }
}

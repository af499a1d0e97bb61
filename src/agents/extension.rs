//! ExtensionAgent
//!
//! 把服务端的 `Extension.Action` 转交给宿主应用（delegate），并按处理结果上报
//! ActionSucceeded / ActionFailed；宿主也可以主动发起 CommandIssued。

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agents::{AgentServices, CapabilityAgentProperty};
use crate::config::ExtensionSection;
use crate::context::{ContextInfo, ContextInfoProvider, ProviderId};
use crate::core::{DirectiveError, EventError};
use crate::directive::{BlockingPolicy, Directive, DirectiveHandler, HandlerRegistration, Medium};
use crate::upstream::{Ack, UpstreamDataSender, UpstreamHeader};

const NAMESPACE: &str = "Extension";

/// 宿主应用实现的扩展动作处理
#[async_trait]
pub trait ExtensionAgentDelegate: Send + Sync {
    /// 执行动作，返回是否成功
    async fn did_receive_action(&self, data: Value, play_service_id: &str) -> bool;

    /// 随 Extension 上下文上报的数据
    fn request_context(&self) -> Option<Value> {
        None
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionPayload {
    data: Value,
    play_service_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayServiceIdOnly {
    play_service_id: String,
}

pub struct ExtensionAgent {
    property: CapabilityAgentProperty,
    services: AgentServices,
    delegate: RwLock<Option<Arc<dyn ExtensionAgentDelegate>>>,
    registrations: Mutex<Vec<HandlerRegistration>>,
    provider_id: Mutex<Option<ProviderId>>,
}

impl ExtensionAgent {
    pub fn new(config: &ExtensionSection, services: AgentServices) -> Arc<Self> {
        let agent = Arc::new(Self {
            property: CapabilityAgentProperty::new(NAMESPACE, config.version.as_str()),
            services,
            delegate: RwLock::new(None),
            registrations: Mutex::new(Vec::new()),
            provider_id: Mutex::new(None),
        });

        let handler: Arc<dyn DirectiveHandler> = agent.clone();
        let registrations = vec![HandlerRegistration::new(
            NAMESPACE,
            "Action",
            BlockingPolicy::non_blocking(Medium::None),
            handler,
        )];
        agent.services.dispatcher.register(registrations.clone());
        *agent.registrations.lock() = registrations;

        let provider: Arc<dyn ContextInfoProvider> = agent.clone();
        *agent.provider_id.lock() = Some(agent.services.context.add(provider));

        tracing::info!(version = %agent.property.version, "ExtensionAgent initialized");
        agent
    }

    pub fn property(&self) -> &CapabilityAgentProperty {
        &self.property
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn ExtensionAgentDelegate>>) {
        *self.delegate.write() = delegate;
    }

    /// 主动向服务端发起命令（CommandIssued），等待服务端确认
    pub async fn request_command(&self, play_service_id: &str, data: Value) -> Result<Ack, EventError> {
        let header = UpstreamHeader::new(NAMESPACE, "CommandIssued", self.property.version.as_str());
        self.services
            .upstream
            .send(header, json!({ "playServiceId": play_service_id, "data": data }))
            .await
    }

    pub fn shutdown(&self) {
        let registrations = std::mem::take(&mut *self.registrations.lock());
        self.services.dispatcher.unregister(registrations);
        if let Some(id) = self.provider_id.lock().take() {
            self.services.context.remove(id);
        }
        tracing::info!("ExtensionAgent shut down");
    }
}

fn send_action_result(
    upstream: &Arc<UpstreamDataSender>,
    version: &str,
    succeeded: bool,
    play_service_id: &str,
    dialog_request_id: &str,
) {
    let name = if succeeded { "ActionSucceeded" } else { "ActionFailed" };
    let header = UpstreamHeader::new(NAMESPACE, name, version).with_dialog_request_id(dialog_request_id);
    upstream.send_with_result(header, json!({ "playServiceId": play_service_id }), None);
}

#[async_trait]
impl DirectiveHandler for ExtensionAgent {
    async fn handle(&self, directive: &Directive) -> Result<(), DirectiveError> {
        let payload: ActionPayload = match serde_json::from_str(directive.payload()) {
            Ok(payload) => payload,
            Err(e) => {
                // payload 不完整但能取到 playServiceId 时仍需上报失败
                if let Ok(partial) = serde_json::from_str::<PlayServiceIdOnly>(directive.payload()) {
                    send_action_result(
                        &self.services.upstream,
                        &self.property.version,
                        false,
                        &partial.play_service_id,
                        directive.dialog_request_id(),
                    );
                }
                return Err(e.into());
            }
        };

        let Some(delegate) = self.delegate.read().clone() else {
            tracing::info!(play_service_id = %payload.play_service_id, "No extension delegate, action ignored");
            return Ok(());
        };

        let upstream = self.services.upstream.clone();
        let version = self.property.version.clone();
        let dialog_request_id = directive.dialog_request_id().to_string();
        tokio::spawn(async move {
            let succeeded = delegate
                .did_receive_action(payload.data, &payload.play_service_id)
                .await;
            tracing::debug!(play_service_id = %payload.play_service_id, succeeded, "Extension action finished");
            send_action_result(&upstream, &version, succeeded, &payload.play_service_id, &dialog_request_id);
        });
        Ok(())
    }
}

#[async_trait]
impl ContextInfoProvider for ExtensionAgent {
    async fn request_context(&self) -> Option<ContextInfo> {
        let mut payload = json!({ "version": self.property.version });
        let data = self.delegate.read().as_ref().and_then(|d| d.request_context());
        if let Some(data) = data {
            payload["data"] = data;
        }
        Some(ContextInfo::capability(NAMESPACE, payload))
    }
}

//! 上行发送：收集上下文 → 构建 WireEvent → 交给传输层

use std::sync::Arc;

use serde_json::Value;

use crate::context::ContextManager;
use crate::core::EventError;
use crate::upstream::{Ack, Transport, UpstreamHeader, WireEvent};

/// 发送结果回调
pub type ResultHandler = Box<dyn FnOnce(Result<Ack, EventError>) + Send>;

pub struct UpstreamDataSender {
    context: Arc<ContextManager>,
    transport: Arc<dyn Transport>,
}

impl UpstreamDataSender {
    pub fn new(context: Arc<ContextManager>, transport: Arc<dyn Transport>) -> Self {
        Self { context, transport }
    }

    pub async fn send(&self, header: UpstreamHeader, payload: Value) -> Result<Ack, EventError> {
        let snapshot = self.context.collect_context().await;
        let event = WireEvent::build(payload, header, snapshot)?;
        let type_name = event.header().type_name();
        tracing::debug!(event = %type_name, message_id = %event.header().message_id, "Send upstream event");

        let result = self.transport.send(event).await;
        if let Err(e) = &result {
            tracing::warn!(event = %type_name, error = %e, "Upstream event failed");
        }
        result
    }

    /// 后台发送；调用方不等待，结果（若需要）经回调送达
    pub fn send_with_result(self: &Arc<Self>, header: UpstreamHeader, payload: Value, handler: Option<ResultHandler>) {
        let sender = Arc::clone(self);
        tokio::spawn(async move {
            let result = sender.send(header, payload).await;
            if let Some(handler) = handler {
                handler(result);
            }
        });
    }
}

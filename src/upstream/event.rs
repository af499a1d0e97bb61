//! 上行事件构建
//!
//! WireEvent 由 payload、header 与一次上下文快照组装而成，三部分各自序列化为独立的 JSON 文本；
//! 构建过程不做任何 I/O。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ContextSnapshot;
use crate::core::EventError;

/// 上行事件头
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamHeader {
    pub namespace: String,
    pub name: String,
    pub dialog_request_id: String,
    pub message_id: String,
    pub version: String,
}

impl UpstreamHeader {
    /// dialogRequestId 与 messageId 使用新生成的 uuid
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            dialog_request_id: uuid::Uuid::new_v4().to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
            version: version.into(),
        }
    }

    pub fn with_dialog_request_id(mut self, dialog_request_id: impl Into<String>) -> Self {
        self.dialog_request_id = dialog_request_id.into();
        self
    }

    /// "Namespace.Name"
    pub fn type_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

/// 组装完成、可交给传输层的事件
#[derive(Debug, Clone)]
pub struct WireEvent {
    header: UpstreamHeader,
    header_json: String,
    payload_json: String,
    context_json: String,
}

impl WireEvent {
    pub fn build(payload: Value, header: UpstreamHeader, context: ContextSnapshot) -> Result<Self, EventError> {
        let header_json = serde_json::to_string(&header)?;
        let payload_json = serde_json::to_string(&payload)?;
        let context_json = serde_json::to_string(&context.into_json())?;
        Ok(Self {
            header,
            header_json,
            payload_json,
            context_json,
        })
    }

    pub fn header(&self) -> &UpstreamHeader {
        &self.header
    }

    pub fn header_json(&self) -> &str {
        &self.header_json
    }

    pub fn payload_json(&self) -> &str {
        &self.payload_json
    }

    pub fn context_json(&self) -> &str {
        &self.context_json
    }

    pub fn decode_header(&self) -> Result<UpstreamHeader, EventError> {
        Ok(serde_json::from_str(&self.header_json)?)
    }

    pub fn decode_payload(&self) -> Result<Value, EventError> {
        Ok(serde_json::from_str(&self.payload_json)?)
    }

    pub fn decode_context(&self) -> Result<Value, EventError> {
        Ok(serde_json::from_str(&self.context_json)?)
    }

    /// 单行 JSON：`{"header":..,"payload":..,"context":..}`
    pub fn to_line(&self) -> Result<String, EventError> {
        let line = serde_json::json!({
            "header": self.decode_header()?,
            "payload": self.decode_payload()?,
            "context": self.decode_context()?,
        });
        Ok(line.to_string())
    }
}

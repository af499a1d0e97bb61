//! 指令数据模型与处理器 trait
//!
//! Directive 创建后只读；路由身份为 (namespace, name)，关联身份为 (dialogRequestId, messageId)。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::DirectiveError;

/// 服务端下发的指令（只读）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    namespace: String,
    name: String,
    dialog_request_id: String,
    message_id: String,
    payload: String,
}

/// 传输层 JSON 信封：`{"header": {...}, "payload": <任意 JSON>}`
#[derive(Debug, Deserialize, Serialize)]
struct DirectiveEnvelope {
    header: DirectiveHeader,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct DirectiveHeader {
    namespace: String,
    name: String,
    dialog_request_id: String,
    message_id: String,
}

impl Directive {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        dialog_request_id: impl Into<String>,
        message_id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            dialog_request_id: dialog_request_id.into(),
            message_id: message_id.into(),
            payload: payload.into(),
        }
    }

    /// 解析一行 JSON 信封；payload 保留为原始 JSON 文本，由所属 Agent 自行解码
    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        let envelope: DirectiveEnvelope = serde_json::from_str(line)?;
        Ok(Self {
            namespace: envelope.header.namespace,
            name: envelope.header.name,
            dialog_request_id: envelope.header.dialog_request_id,
            message_id: envelope.header.message_id,
            payload: envelope.payload.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dialog_request_id(&self) -> &str {
        &self.dialog_request_id
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn key(&self) -> DirectiveKey {
        DirectiveKey::new(&self.namespace, &self.name)
    }

    /// "Namespace.Name"
    pub fn type_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

/// 路由键 (namespace, name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirectiveKey {
    pub namespace: String,
    pub name: String,
}

impl DirectiveKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for DirectiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// 指令影响的呈现通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    Audio,
    Visual,
    None,
}

/// 阻塞策略：同一 medium 上的 blocking 指令严格 FIFO 串行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingPolicy {
    pub medium: Medium,
    pub is_blocking: bool,
}

impl BlockingPolicy {
    pub const fn new(medium: Medium, is_blocking: bool) -> Self {
        Self { medium, is_blocking }
    }

    pub const fn non_blocking(medium: Medium) -> Self {
        Self::new(medium, false)
    }

    pub const fn blocking(medium: Medium) -> Self {
        Self::new(medium, true)
    }

    /// 需要串行化的 medium；`none` 或非阻塞返回 None
    pub fn serialized_medium(&self) -> Option<Medium> {
        match (self.is_blocking, self.medium) {
            (true, Medium::Audio) | (true, Medium::Visual) => Some(self.medium),
            _ => None,
        }
    }
}

/// 指令处理器；返回即视为完成信号
#[async_trait]
pub trait DirectiveHandler: Send + Sync {
    async fn handle(&self, directive: &Directive) -> Result<(), DirectiveError>;
}

/// 处理器注册项
#[derive(Clone)]
pub struct HandlerRegistration {
    pub key: DirectiveKey,
    pub policy: BlockingPolicy,
    pub handler: Arc<dyn DirectiveHandler>,
}

impl HandlerRegistration {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        policy: BlockingPolicy,
        handler: Arc<dyn DirectiveHandler>,
    ) -> Self {
        Self {
            key: DirectiveKey::new(namespace, name),
            policy,
            handler,
        }
    }
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("key", &self.key)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

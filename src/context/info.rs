//! 上下文条目与快照

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::context::ProviderId;

/// 上下文归属：capability 条目进入 `supportedInterfaces`，client 条目进入 `client`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    Capability,
    Client,
}

/// 单个 provider 贡献的一条上下文（按需生成，不持久化）
#[derive(Debug, Clone, PartialEq)]
pub struct ContextInfo {
    pub context_type: ContextType,
    pub name: String,
    pub payload: Value,
}

impl ContextInfo {
    pub fn capability(name: impl Into<String>, payload: Value) -> Self {
        Self {
            context_type: ContextType::Capability,
            name: name.into(),
            payload,
        }
    }

    pub fn client(name: impl Into<String>, payload: Value) -> Self {
        Self {
            context_type: ContextType::Client,
            name: name.into(),
            payload,
        }
    }
}

/// 一次收集的结果；按值交给事件构建方，用完即弃（不缓存、不可 Clone）
#[derive(Debug, Default)]
pub struct ContextSnapshot {
    capabilities: BTreeMap<String, Value>,
    client: BTreeMap<String, Value>,
    timed_out: Vec<ProviderId>,
}

impl ContextSnapshot {
    /// 同名条目后写覆盖先写
    pub(crate) fn insert(&mut self, info: ContextInfo) {
        let target = match info.context_type {
            ContextType::Capability => &mut self.capabilities,
            ContextType::Client => &mut self.client,
        };
        target.insert(info.name, info.payload);
    }

    pub(crate) fn mark_timed_out(&mut self, id: ProviderId) {
        self.timed_out.push(id);
    }

    pub fn capability(&self, name: &str) -> Option<&Value> {
        self.capabilities.get(name)
    }

    pub fn client(&self, name: &str) -> Option<&Value> {
        self.client.get(name)
    }

    /// 在时限内没有完成的 provider
    pub fn timed_out(&self) -> &[ProviderId] {
        &self.timed_out
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty() && self.client.is_empty()
    }

    /// `{"supportedInterfaces": {...}, "client": {...}}`
    pub fn into_json(self) -> Value {
        serde_json::json!({
            "supportedInterfaces": self.capabilities,
            "client": self.client,
        })
    }
}

//! 唤醒词上下文：把当前配置的唤醒词作为 client 上下文 `wakeupWord` 上报

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::context::{ContextInfo, ContextInfoProvider};

#[derive(Debug, Default)]
pub struct KeywordContextProvider {
    keyword: RwLock<Option<String>>,
}

impl KeywordContextProvider {
    pub fn new(keyword: Option<String>) -> Self {
        Self {
            keyword: RwLock::new(keyword),
        }
    }

    pub fn set_keyword(&self, keyword: Option<String>) {
        *self.keyword.write() = keyword;
    }

    pub fn keyword(&self) -> Option<String> {
        self.keyword.read().clone()
    }
}

#[async_trait]
impl ContextInfoProvider for KeywordContextProvider {
    async fn request_context(&self) -> Option<ContextInfo> {
        let keyword = self.keyword()?;
        Some(ContextInfo::client("wakeupWord", Value::String(keyword)))
    }
}

//! 播放同步状态、时长档位与 play stack 分组键

use std::fmt;

use serde::{Deserialize, Serialize};

/// 分组的生命周期状态：prepared → synced → releasing → released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaySyncState {
    Prepared,
    Synced,
    Releasing,
    Released,
}

impl PlaySyncState {
    /// 合法的状态边；不存在回到 prepared / synced 的边
    pub fn can_transition_to(self, next: PlaySyncState) -> bool {
        use PlaySyncState::*;
        matches!(
            (self, next),
            (Prepared, Synced)
                | (Prepared, Released)
                | (Synced, Releasing)
                | (Synced, Released)
                | (Releasing, Released)
        )
    }
}

impl fmt::Display for PlaySyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaySyncState::Prepared => "prepared",
            PlaySyncState::Synced => "synced",
            PlaySyncState::Releasing => "releasing",
            PlaySyncState::Released => "released",
        };
        f.write_str(s)
    }
}

/// 自动消失的时长档位（payload 中的 `duration` 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlaySyncDuration {
    #[default]
    Short,
    Mid,
    Long,
    Longest,
}

impl PlaySyncDuration {
    /// 解析 payload 字符串；未知值返回 None，由调用方回退到 Short
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SHORT" => Some(Self::Short),
            "MID" => Some(Self::Mid),
            "LONG" => Some(Self::Long),
            "LONGEST" => Some(Self::Longest),
            _ => None,
        }
    }
}

/// 分组键 (dialogRequestId, playStackServiceId)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlayStackKey {
    pub dialog_request_id: String,
    pub play_service_id: Option<String>,
}

impl PlayStackKey {
    pub fn new(dialog_request_id: impl Into<String>, play_service_id: Option<&str>) -> Self {
        Self {
            dialog_request_id: dialog_request_id.into(),
            play_service_id: play_service_id.map(str::to_string),
        }
    }
}

impl fmt::Display for PlayStackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.play_service_id {
            Some(id) => write!(f, "{}/{}", self.dialog_request_id, id),
            None => write!(f, "{}/-", self.dialog_request_id),
        }
    }
}

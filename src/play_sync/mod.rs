//! 播放同步：把属于同一 (dialogRequestId, playStackServiceId) 的多个 Agent 绑定为一个生命周期分组

pub mod manager;
pub mod state;

pub use manager::{PlaySyncDelegate, PlaySyncEvent, PlaySyncManager};
pub use state::{PlayStackKey, PlaySyncDuration, PlaySyncState};

//! 播放同步管理器
//!
//! 以 (dialogRequestId, playStackServiceId) 为分组维护 PlaySyncState，并把每次状态变化广播给该组所有 stakeholder。
//! 所有分组状态由一个后台任务独占（串行上下文），公开方法只向任务发送命令，因此：
//! - 同一分组的状态变化严格有序，且一次变化投递给全部 stakeholder 之后才会处理下一次；
//! - stakeholder 回调中再调用 cancel_sync / release_sync_immediately 不会重入死锁。
//!
//! 定时器：进入 synced 后按 stakeholder 的最长 duration 档位启动 releasing 定时器；
//! 任何状态变化、stop_timer、cancel_sync / release_sync_immediately 都会使挂起的定时器失效（epoch + CancellationToken）。

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::PlaySyncSection;
use crate::play_sync::{PlayStackKey, PlaySyncDuration, PlaySyncState};

/// 播放同步的参与方（通常是 Capability Agent）
pub trait PlaySyncDelegate: Send + Sync {
    fn name(&self) -> &str;

    /// 该分组条目的时长档位，决定 releasing 定时器长度
    fn play_sync_duration(&self, _key: &PlayStackKey) -> PlaySyncDuration {
        PlaySyncDuration::Short
    }

    /// 在播放同步任务上调用；实现方只应把事件投递到自己的队列，不得阻塞或等待
    fn play_sync_did_change(&self, state: PlaySyncState, dialog_request_id: &str);
}

/// 分组状态变化通知（订阅用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaySyncEvent {
    pub key: PlayStackKey,
    pub state: PlaySyncState,
}

type StakeholderId = usize;

fn stakeholder_id(delegate: &Arc<dyn PlaySyncDelegate>) -> StakeholderId {
    Arc::as_ptr(delegate) as *const () as usize
}

enum SyncCommand {
    Start {
        key: PlayStackKey,
        id: StakeholderId,
        delegate: Weak<dyn PlaySyncDelegate>,
    },
    Cancel {
        key: PlayStackKey,
        id: StakeholderId,
    },
    ReleaseImmediately {
        key: PlayStackKey,
    },
    StopTimer {
        key: PlayStackKey,
    },
    Advance {
        key: PlayStackKey,
    },
    TimerFired {
        key: PlayStackKey,
        epoch: u64,
        target: PlaySyncState,
    },
    Query {
        key: PlayStackKey,
        reply: oneshot::Sender<Option<PlaySyncState>>,
    },
}

/// 播放同步管理器句柄；Drop 或 shutdown 时停止后台任务
pub struct PlaySyncManager {
    tx: mpsc::UnboundedSender<SyncCommand>,
    events: broadcast::Sender<PlaySyncEvent>,
    shutdown: CancellationToken,
}

impl PlaySyncManager {
    /// 创建并启动后台任务；需在 tokio runtime 内调用
    pub fn new(config: PlaySyncSection) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        let shutdown = CancellationToken::new();

        let worker = SyncWorker {
            config,
            groups: HashMap::new(),
            tx: tx.clone(),
            events: events.clone(),
        };
        tokio::spawn(worker.run(rx, shutdown.clone()));

        Self {
            tx,
            events,
            shutdown,
        }
    }

    /// 把 owner 登记为分组的 stakeholder；分组不存在时创建为 prepared，随后整组推进到 synced
    pub fn start_sync(
        &self,
        owner: &Arc<dyn PlaySyncDelegate>,
        dialog_request_id: &str,
        play_stack_service_id: Option<&str>,
    ) {
        self.send(SyncCommand::Start {
            key: PlayStackKey::new(dialog_request_id, play_stack_service_id),
            id: stakeholder_id(owner),
            delegate: Arc::downgrade(owner),
        });
    }

    /// 撤销 owner 的参与；没有 stakeholder 时分组直接 released（不经过 releasing）
    pub fn cancel_sync(
        &self,
        owner: &Arc<dyn PlaySyncDelegate>,
        dialog_request_id: &str,
        play_stack_service_id: Option<&str>,
    ) {
        self.send(SyncCommand::Cancel {
            key: PlayStackKey::new(dialog_request_id, play_stack_service_id),
            id: stakeholder_id(owner),
        });
    }

    /// 立即 released，丢弃挂起的定时器
    pub fn release_sync_immediately(&self, dialog_request_id: &str, play_stack_service_id: Option<&str>) {
        self.send(SyncCommand::ReleaseImmediately {
            key: PlayStackKey::new(dialog_request_id, play_stack_service_id),
        });
    }

    /// 保持显示：分组此后不再自动进入 releasing；已处于 releasing 的分组不受影响
    pub fn stop_timer(&self, dialog_request_id: &str, play_stack_service_id: Option<&str>) {
        self.send(SyncCommand::StopTimer {
            key: PlayStackKey::new(dialog_request_id, play_stack_service_id),
        });
    }

    /// 查询分组当前状态；分组不存在（或已 released）返回 None
    pub async fn state(
        &self,
        dialog_request_id: &str,
        play_stack_service_id: Option<&str>,
    ) -> Option<PlaySyncState> {
        let (reply, rx) = oneshot::channel();
        self.send(SyncCommand::Query {
            key: PlayStackKey::new(dialog_request_id, play_stack_service_id),
            reply,
        });
        rx.await.ok().flatten()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaySyncEvent> {
        self.events.subscribe()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn send(&self, command: SyncCommand) {
        if self.tx.send(command).is_err() {
            tracing::debug!("PlaySync worker stopped, command dropped");
        }
    }
}

impl Drop for PlaySyncManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Stakeholder {
    id: StakeholderId,
    delegate: Weak<dyn PlaySyncDelegate>,
}

struct Group {
    state: PlaySyncState,
    stakeholders: Vec<Stakeholder>,
    epoch: u64,
    timer: Option<CancellationToken>,
    /// stop_timer 之后不再安排 releasing 定时器
    timer_stopped: bool,
}

impl Group {
    fn new() -> Self {
        Self {
            state: PlaySyncState::Prepared,
            stakeholders: Vec::new(),
            epoch: 0,
            timer: None,
            timer_stopped: false,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.epoch += 1;
    }

    /// 存活的 stakeholder（顺带清理已释放的）
    fn live_delegates(&mut self) -> Vec<Arc<dyn PlaySyncDelegate>> {
        self.stakeholders.retain(|s| s.delegate.strong_count() > 0);
        self.stakeholders
            .iter()
            .filter_map(|s| s.delegate.upgrade())
            .collect()
    }
}

struct SyncWorker {
    config: PlaySyncSection,
    groups: HashMap<PlayStackKey, Group>,
    tx: mpsc::UnboundedSender<SyncCommand>,
    events: broadcast::Sender<PlaySyncEvent>,
}

impl SyncWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SyncCommand>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        for group in self.groups.values_mut() {
            group.cancel_timer();
        }
        tracing::debug!("PlaySync worker stopped");
    }

    fn handle(&mut self, command: SyncCommand) {
        match command {
            SyncCommand::Start { key, id, delegate } => self.start(key, id, delegate),
            SyncCommand::Cancel { key, id } => {
                let Some(group) = self.groups.get_mut(&key) else {
                    return;
                };
                group
                    .stakeholders
                    .retain(|s| s.id != id && s.delegate.strong_count() > 0);
                if group.stakeholders.is_empty() {
                    self.transition(&key, PlaySyncState::Released);
                }
            }
            SyncCommand::ReleaseImmediately { key } => {
                self.transition(&key, PlaySyncState::Released);
            }
            SyncCommand::StopTimer { key } => {
                let Some(group) = self.groups.get_mut(&key) else {
                    return;
                };
                match group.state {
                    PlaySyncState::Prepared | PlaySyncState::Synced => {
                        tracing::debug!(%key, state = %group.state, "PlaySync timer stopped");
                        group.timer_stopped = true;
                        if group.state == PlaySyncState::Synced {
                            group.cancel_timer();
                        }
                    }
                    // releasing 已经送达；强制释放定时器照常生效
                    PlaySyncState::Releasing | PlaySyncState::Released => {
                        tracing::debug!(%key, state = %group.state, "PlaySync timer stop ignored");
                    }
                }
            }
            SyncCommand::Advance { key } => {
                if self.groups.get(&key).map(|g| g.state) == Some(PlaySyncState::Prepared) {
                    self.transition(&key, PlaySyncState::Synced);
                }
            }
            SyncCommand::TimerFired { key, epoch, target } => {
                if self.groups.get(&key).map(|g| g.epoch) == Some(epoch) {
                    self.transition(&key, target);
                }
            }
            SyncCommand::Query { key, reply } => {
                let _ = reply.send(self.groups.get(&key).map(|g| g.state));
            }
        }
    }

    fn start(&mut self, key: PlayStackKey, id: StakeholderId, delegate: Weak<dyn PlaySyncDelegate>) {
        // releasing 不能回到 synced：旧分组先释放，再按新分组处理
        if self.groups.get(&key).map(|g| g.state) == Some(PlaySyncState::Releasing) {
            self.transition(&key, PlaySyncState::Released);
        }
        let Some(owner) = delegate.upgrade() else {
            return;
        };

        let Some(group) = self.groups.get_mut(&key) else {
            let mut group = Group::new();
            group.stakeholders.push(Stakeholder { id, delegate });
            self.groups.insert(key.clone(), group);

            tracing::debug!(%key, owner = owner.name(), "PlaySync group prepared");
            owner.play_sync_did_change(PlaySyncState::Prepared, &key.dialog_request_id);
            let _ = self.events.send(PlaySyncEvent {
                key: key.clone(),
                state: PlaySyncState::Prepared,
            });
            // 排在已入队的 start_sync 之后推进，使同批 stakeholder 一起进入 synced
            let _ = self.tx.send(SyncCommand::Advance { key });
            return;
        };

        if !group.stakeholders.iter().any(|s| s.id == id) {
            group.stakeholders.push(Stakeholder { id, delegate });
        }
        let state = group.state;
        let delegates = group.live_delegates();
        match state {
            PlaySyncState::Prepared => {
                owner.play_sync_did_change(PlaySyncState::Prepared, &key.dialog_request_id);
            }
            PlaySyncState::Synced => {
                owner.play_sync_did_change(PlaySyncState::Synced, &key.dialog_request_id);
                let timeout = self.release_timeout(&key, &delegates);
                self.schedule(&key, timeout, PlaySyncState::Releasing);
            }
            PlaySyncState::Releasing | PlaySyncState::Released => {}
        }
    }

    fn transition(&mut self, key: &PlayStackKey, next: PlaySyncState) {
        let delegates = {
            let Some(group) = self.groups.get_mut(key) else {
                return;
            };
            let delegates = group.live_delegates();
            // 没有存活 stakeholder 的分组不能停留在非 released 状态
            let next = if delegates.is_empty() { PlaySyncState::Released } else { next };
            if !group.state.can_transition_to(next) {
                tracing::debug!(%key, from = %group.state, to = %next, "Ignored PlaySync transition");
                return;
            }
            tracing::debug!(%key, from = %group.state, to = %next, "PlaySync transition");
            group.state = next;
            group.cancel_timer();
            delegates
        };
        let next = self.groups.get(key).map(|g| g.state).unwrap_or(next);

        for delegate in &delegates {
            delegate.play_sync_did_change(next, &key.dialog_request_id);
        }
        let _ = self.events.send(PlaySyncEvent {
            key: key.clone(),
            state: next,
        });

        match next {
            PlaySyncState::Synced => {
                let timeout = self.release_timeout(key, &delegates);
                self.schedule(key, timeout, PlaySyncState::Releasing);
            }
            PlaySyncState::Releasing => {
                if let Some(after) = self.config.force_release() {
                    self.schedule(key, after, PlaySyncState::Released);
                }
            }
            PlaySyncState::Released => {
                self.groups.remove(key);
            }
            PlaySyncState::Prepared => {}
        }
    }

    fn release_timeout(&self, key: &PlayStackKey, delegates: &[Arc<dyn PlaySyncDelegate>]) -> Duration {
        let duration = delegates
            .iter()
            .map(|d| d.play_sync_duration(key))
            .max()
            .unwrap_or_default();
        self.config.timeout_for(duration)
    }

    fn schedule(&mut self, key: &PlayStackKey, after: Duration, target: PlaySyncState) {
        let Some(group) = self.groups.get_mut(key) else {
            return;
        };
        if target == PlaySyncState::Releasing && group.timer_stopped {
            tracing::debug!(%key, "PlaySync timer stopped, releasing not scheduled");
            return;
        }
        group.cancel_timer();
        let token = CancellationToken::new();
        group.timer = Some(token.clone());
        let epoch = group.epoch;

        let tx = self.tx.clone();
        let key = key.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    let _ = tx.send(SyncCommand::TimerFired { key, epoch, target });
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: String,
        duration: PlaySyncDuration,
        /// dialogRequestId → 该分组条目的档位
        durations: HashMap<String, PlaySyncDuration>,
        seen: Mutex<Vec<(PlaySyncState, String)>>,
    }

    impl Recorder {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                duration: PlaySyncDuration::Short,
                durations: HashMap::new(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn with_durations(name: &str, durations: &[(&str, PlaySyncDuration)]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                duration: PlaySyncDuration::Short,
                durations: durations.iter().map(|(d, v)| (d.to_string(), *v)).collect(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn states(&self) -> Vec<PlaySyncState> {
            self.seen.lock().iter().map(|(s, _)| *s).collect()
        }
    }

    impl PlaySyncDelegate for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn play_sync_duration(&self, key: &PlayStackKey) -> PlaySyncDuration {
            self.durations
                .get(&key.dialog_request_id)
                .copied()
                .unwrap_or(self.duration)
        }

        fn play_sync_did_change(&self, state: PlaySyncState, dialog_request_id: &str) {
            self.seen.lock().push((state, dialog_request_id.to_string()));
        }
    }

    fn config(short_ms: u64) -> PlaySyncSection {
        PlaySyncSection {
            short_ms,
            ..PlaySyncSection::default()
        }
    }

    async fn next_state(rx: &mut broadcast::Receiver<PlaySyncEvent>) -> PlaySyncState {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no play sync event")
            .expect("event channel closed")
            .state
    }

    fn as_delegate(recorder: &Arc<Recorder>) -> Arc<dyn PlaySyncDelegate> {
        recorder.clone()
    }

    #[tokio::test]
    async fn test_start_sync_prepares_then_syncs() {
        let manager = PlaySyncManager::new(config(60_000));
        let mut events = manager.subscribe();
        let agent = Recorder::new("A");

        manager.start_sync(&as_delegate(&agent), "d1", Some("s1"));
        assert_eq!(next_state(&mut events).await, PlaySyncState::Prepared);
        assert_eq!(next_state(&mut events).await, PlaySyncState::Synced);
        assert_eq!(manager.state("d1", Some("s1")).await, Some(PlaySyncState::Synced));
        assert_eq!(agent.states(), vec![PlaySyncState::Prepared, PlaySyncState::Synced]);
        assert_eq!(agent.seen.lock()[1].1, "d1");
    }

    #[tokio::test]
    async fn test_cancel_last_stakeholder_releases_without_releasing() {
        let manager = PlaySyncManager::new(config(60_000));
        let mut events = manager.subscribe();
        let agent = Recorder::new("A");
        let delegate = as_delegate(&agent);

        manager.start_sync(&delegate, "d1", None);
        next_state(&mut events).await;
        next_state(&mut events).await;
        manager.cancel_sync(&delegate, "d1", None);

        assert_eq!(next_state(&mut events).await, PlaySyncState::Released);
        assert_eq!(
            agent.states(),
            vec![PlaySyncState::Prepared, PlaySyncState::Synced, PlaySyncState::Released]
        );
        assert_eq!(manager.state("d1", None).await, None);
    }

    #[tokio::test]
    async fn test_timer_moves_synced_to_releasing() {
        let manager = PlaySyncManager::new(config(40));
        let mut events = manager.subscribe();
        let agent = Recorder::new("A");

        manager.start_sync(&as_delegate(&agent), "d1", Some("s1"));
        next_state(&mut events).await;
        next_state(&mut events).await;
        assert_eq!(next_state(&mut events).await, PlaySyncState::Releasing);
        assert_eq!(manager.state("d1", Some("s1")).await, Some(PlaySyncState::Releasing));
    }

    #[tokio::test]
    async fn test_stop_timer_prevents_releasing() {
        let manager = PlaySyncManager::new(config(60));
        let mut events = manager.subscribe();
        let agent = Recorder::new("A");

        manager.start_sync(&as_delegate(&agent), "d1", Some("s1"));
        next_state(&mut events).await;
        next_state(&mut events).await;
        manager.stop_timer("d1", Some("s1"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.state("d1", Some("s1")).await, Some(PlaySyncState::Synced));
        assert!(!agent.states().contains(&PlaySyncState::Releasing));
    }

    #[tokio::test]
    async fn test_release_immediately_invalidates_timer() {
        let manager = PlaySyncManager::new(config(60));
        let mut events = manager.subscribe();
        let agent = Recorder::new("A");

        manager.start_sync(&as_delegate(&agent), "d1", None);
        next_state(&mut events).await;
        next_state(&mut events).await;
        manager.release_sync_immediately("d1", None);
        assert_eq!(next_state(&mut events).await, PlaySyncState::Released);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            agent.states(),
            vec![PlaySyncState::Prepared, PlaySyncState::Synced, PlaySyncState::Released]
        );
    }

    #[tokio::test]
    async fn test_stakeholders_started_together_transition_as_unit() {
        let manager = PlaySyncManager::new(config(60_000));
        let mut events = manager.subscribe();
        let display = Recorder::new("Display");
        let audio = Recorder::new("AudioPlayer");
        let display_delegate = as_delegate(&display);
        let audio_delegate = as_delegate(&audio);

        manager.start_sync(&display_delegate, "d1", Some("s1"));
        manager.start_sync(&audio_delegate, "d1", Some("s1"));
        assert_eq!(next_state(&mut events).await, PlaySyncState::Prepared);
        assert_eq!(next_state(&mut events).await, PlaySyncState::Synced);
        assert_eq!(display.states(), vec![PlaySyncState::Prepared, PlaySyncState::Synced]);
        assert_eq!(audio.states(), vec![PlaySyncState::Prepared, PlaySyncState::Synced]);

        manager.cancel_sync(&display_delegate, "d1", Some("s1"));
        assert_eq!(manager.state("d1", Some("s1")).await, Some(PlaySyncState::Synced));
        manager.cancel_sync(&audio_delegate, "d1", Some("s1"));
        assert_eq!(next_state(&mut events).await, PlaySyncState::Released);
        // 仍在组内的 stakeholder 才会收到 released
        assert_eq!(audio.states().last(), Some(&PlaySyncState::Released));
        assert_eq!(display.states().len(), 2);
    }

    #[tokio::test]
    async fn test_force_release_after_releasing() {
        let manager = PlaySyncManager::new(PlaySyncSection {
            short_ms: 30,
            force_release_ms: Some(30),
            ..PlaySyncSection::default()
        });
        let mut events = manager.subscribe();
        let agent = Recorder::new("A");

        manager.start_sync(&as_delegate(&agent), "d1", None);
        assert_eq!(next_state(&mut events).await, PlaySyncState::Prepared);
        assert_eq!(next_state(&mut events).await, PlaySyncState::Synced);
        assert_eq!(next_state(&mut events).await, PlaySyncState::Releasing);
        assert_eq!(next_state(&mut events).await, PlaySyncState::Released);
    }

    #[tokio::test]
    async fn test_start_on_releasing_group_starts_fresh() {
        let manager = PlaySyncManager::new(config(30));
        let mut events = manager.subscribe();
        let agent = Recorder::new("A");
        let delegate = as_delegate(&agent);

        manager.start_sync(&delegate, "d1", None);
        next_state(&mut events).await;
        next_state(&mut events).await;
        assert_eq!(next_state(&mut events).await, PlaySyncState::Releasing);

        manager.start_sync(&delegate, "d1", None);
        assert_eq!(next_state(&mut events).await, PlaySyncState::Released);
        assert_eq!(next_state(&mut events).await, PlaySyncState::Prepared);
        assert_eq!(next_state(&mut events).await, PlaySyncState::Synced);
    }

    #[tokio::test]
    async fn test_stopped_timer_survives_late_stakeholder() {
        let manager = PlaySyncManager::new(config(60));
        let mut events = manager.subscribe();
        let display = Recorder::new("Display");
        let audio = Recorder::new("AudioPlayer");

        manager.start_sync(&as_delegate(&display), "d1", None);
        next_state(&mut events).await;
        assert_eq!(next_state(&mut events).await, PlaySyncState::Synced);
        manager.stop_timer("d1", None);
        // 后加入的 stakeholder 不会重新启动定时器
        manager.start_sync(&as_delegate(&audio), "d1", None);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(manager.state("d1", None).await, Some(PlaySyncState::Synced));
        assert_eq!(display.states(), vec![PlaySyncState::Prepared, PlaySyncState::Synced]);
        assert_eq!(audio.states(), vec![PlaySyncState::Synced]);
    }

    #[tokio::test]
    async fn test_stop_timer_while_prepared_is_remembered() {
        let manager = PlaySyncManager::new(config(60));
        let mut events = manager.subscribe();
        let agent = Recorder::new("A");

        manager.start_sync(&as_delegate(&agent), "d1", Some("s1"));
        manager.stop_timer("d1", Some("s1"));
        assert_eq!(next_state(&mut events).await, PlaySyncState::Prepared);
        assert_eq!(next_state(&mut events).await, PlaySyncState::Synced);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(manager.state("d1", Some("s1")).await, Some(PlaySyncState::Synced));
        assert_eq!(agent.states(), vec![PlaySyncState::Prepared, PlaySyncState::Synced]);
    }

    #[tokio::test]
    async fn test_stop_timer_after_releasing_keeps_force_release() {
        let manager = PlaySyncManager::new(PlaySyncSection {
            short_ms: 40,
            force_release_ms: Some(80),
            ..PlaySyncSection::default()
        });
        let mut events = manager.subscribe();
        let agent = Recorder::new("A");

        manager.start_sync(&as_delegate(&agent), "d1", None);
        next_state(&mut events).await;
        next_state(&mut events).await;
        assert_eq!(next_state(&mut events).await, PlaySyncState::Releasing);
        manager.stop_timer("d1", None);

        assert_eq!(next_state(&mut events).await, PlaySyncState::Released);
        assert_eq!(manager.state("d1", None).await, None);
        assert_eq!(
            agent.states(),
            vec![
                PlaySyncState::Prepared,
                PlaySyncState::Synced,
                PlaySyncState::Releasing,
                PlaySyncState::Released
            ]
        );
    }

    #[tokio::test]
    async fn test_release_timeout_uses_each_groups_duration() {
        let manager = PlaySyncManager::new(PlaySyncSection {
            short_ms: 40,
            long_ms: 60_000,
            ..PlaySyncSection::default()
        });
        let mut events = manager.subscribe();
        let agent = Recorder::with_durations(
            "A",
            &[("d1", PlaySyncDuration::Long), ("d2", PlaySyncDuration::Short)],
        );
        let delegate = as_delegate(&agent);

        manager.start_sync(&delegate, "d1", None);
        manager.start_sync(&delegate, "d2", None);

        let mut releasing = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
        while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
            if event.state == PlaySyncState::Releasing {
                releasing.push(event.key.dialog_request_id);
            }
        }
        assert_eq!(releasing, vec!["d2".to_string()]);
        assert_eq!(manager.state("d1", None).await, Some(PlaySyncState::Synced));
    }
}

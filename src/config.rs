//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CHORUS__*` 覆盖（双下划线表示嵌套，如 `CHORUS__PLAY_SYNC__SHORT_MS=3000`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::play_sync::PlaySyncDuration;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub dispatcher: DispatcherSection,
    pub play_sync: PlaySyncSection,
    pub context: ContextSection,
    pub display: DisplaySection,
    pub extension: ExtensionSection,
    pub now_playing: NowPlayingSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 唤醒词，作为 client 上下文 `wakeupWord` 上报；未设置则不上报
    pub wakeup_word: Option<String>,
    /// 指令输入结束后继续运行的时间（毫秒），让定时器与渲染走完
    pub linger_ms: u64,
}

impl AppSection {
    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}

/// [dispatcher] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    /// 单个指令处理器的超时（毫秒），0 表示不限制
    pub handler_timeout_ms: u64,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 10_000,
        }
    }
}

impl DispatcherSection {
    pub fn handler_timeout(&self) -> Option<Duration> {
        (self.handler_timeout_ms > 0).then(|| Duration::from_millis(self.handler_timeout_ms))
    }
}

/// [play_sync] 段：各 duration 档位对应的 releasing 超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaySyncSection {
    pub short_ms: u64,
    pub mid_ms: u64,
    pub long_ms: u64,
    pub longest_ms: u64,
    /// 进入 releasing 后强制 released 的延迟；未设置时 releasing 一直保持到外部释放
    pub force_release_ms: Option<u64>,
}

impl Default for PlaySyncSection {
    fn default() -> Self {
        Self {
            short_ms: 7_000,
            mid_ms: 15_000,
            long_ms: 30_000,
            longest_ms: 600_000,
            force_release_ms: None,
        }
    }
}

impl PlaySyncSection {
    pub fn timeout_for(&self, duration: PlaySyncDuration) -> Duration {
        let ms = match duration {
            PlaySyncDuration::Short => self.short_ms,
            PlaySyncDuration::Mid => self.mid_ms,
            PlaySyncDuration::Long => self.long_ms,
            PlaySyncDuration::Longest => self.longest_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn force_release(&self) -> Option<Duration> {
        self.force_release_ms.map(Duration::from_millis)
    }
}

/// [context] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    /// 一次上下文收集的总时限（毫秒），超时的 provider 被跳过
    pub collect_timeout_ms: u64,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            collect_timeout_ms: 1_000,
        }
    }
}

impl ContextSection {
    pub fn collect_timeout(&self) -> Duration {
        Duration::from_millis(self.collect_timeout_ms)
    }
}

/// [display] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplaySection {
    pub version: String,
    /// 渲染委托是否在专用 UI 线程上调用
    pub use_ui_thread: bool,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            version: "1.1".to_string(),
            use_ui_thread: true,
        }
    }
}

/// [extension] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtensionSection {
    pub version: String,
}

impl Default for ExtensionSection {
    fn default() -> Self {
        Self {
            version: "1.1".to_string(),
        }
    }
}

/// [now_playing] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NowPlayingSection {
    pub enabled: bool,
    /// 音频会话以 mix-with-others 方式运行时，系统会忽略 now-playing 更新，控制器不挂载
    pub mix_with_others: bool,
}

/// 从 config 目录加载配置，环境变量 CHORUS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CHORUS__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CHORUS")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.play_sync.timeout_for(PlaySyncDuration::Short), Duration::from_secs(7));
        assert_eq!(cfg.play_sync.timeout_for(PlaySyncDuration::Longest), Duration::from_secs(600));
        assert_eq!(cfg.dispatcher.handler_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(cfg.display.version, "1.1");
        assert!(cfg.play_sync.force_release().is_none());
    }

    #[test]
    fn test_zero_handler_timeout_disables_it() {
        let section = DispatcherSection { handler_timeout_ms: 0 };
        assert!(section.handler_timeout().is_none());
    }

    #[test]
    fn test_load_partial_file_keeps_section_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[play_sync]\nshort_ms = 50\n\n[app]\nwakeup_word = \"aria\"\n"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.play_sync.short_ms, 50);
        assert_eq!(cfg.play_sync.mid_ms, 15_000);
        assert_eq!(cfg.app.wakeup_word.as_deref(), Some("aria"));
        assert_eq!(cfg.context.collect_timeout_ms, 1_000);
    }
}

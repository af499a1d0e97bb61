//! Chorus 演示程序
//!
//! 从文件（参数）或标准输入逐行读取 JSON 指令并分发，上行事件写到标准输出，日志写到标准错误。
//! 输入结束、Ctrl+C 或 SIGTERM 时优雅关闭。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chorus::core::{run_with_graceful_shutdown, ShutdownCoordinator, ShutdownManager, ShutdownReason};
use chorus::surfaces::{ConsoleRenderer, NowPlayingController};
use chorus::{load_config, observability, ClientBuilder, Directive};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config = load_config(None).context("Failed to load config")?;
    let client = Arc::new(ClientBuilder::new(config).build().context("Failed to build client")?);

    let console = Arc::new(ConsoleRenderer::new());
    client.display().add_delegate(console.clone());
    let now_playing = client.config().now_playing.enabled.then(|| {
        let controller = NowPlayingController::new(client.config().now_playing.mix_with_others);
        controller.attach(client.display());
        controller
    });

    let input: Box<dyn AsyncBufRead + Unpin + Send> = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let shutdown = Arc::new(ShutdownManager::new());
    let mut coordinator = ShutdownCoordinator::new();
    coordinator.register(client.clone());

    let intake = {
        let client = client.clone();
        let shutdown = shutdown.clone();
        async move {
            read_directives(&client, input).await;
            tokio::time::sleep(client.config().app.linger()).await;
            shutdown.shutdown(ShutdownReason::InputClosed);
        }
    };

    run_with_graceful_shutdown(shutdown, intake, move || async move {
        if let Some(controller) = &now_playing {
            controller.remove();
        }
        coordinator.run_cleanup().await;
    })
    .await;

    Ok(())
}

async fn read_directives(client: &Arc<chorus::Client>, input: Box<dyn AsyncBufRead + Unpin + Send>) {
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read directive input");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let directive = match Directive::from_json(line) {
            Ok(directive) => directive,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed directive line skipped");
                continue;
            }
        };
        match client.dispatch(directive) {
            Ok(handle) => {
                tokio::spawn(async move {
                    let type_name = handle.type_name().to_string();
                    if let Err(e) = handle.outcome().await {
                        tracing::warn!(directive = %type_name, error = %e, "Directive failed");
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "Directive not dispatched"),
        }
    }
}

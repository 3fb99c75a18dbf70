//! Udahub - CultPass 客服助手
//!
//! 入口：初始化日志、按配置装配 SessionManager，在标准输入上跑单个 thread 的对话循环。
//! 命令：`/clear` 清除转人工标记，`/quit` 退出。

use std::path::PathBuf;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use udahub::agent::create_session_manager;
use udahub::config::load_config;
use udahub::SessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    udahub::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let manager = create_session_manager(&cfg)
        .await
        .context("Failed to create session manager")?;

    let thread_id = uuid::Uuid::new_v4().to_string();
    let app_name = cfg.app.name.as_deref().unwrap_or("udahub");
    tracing::info!(app = app_name, thread_id = %thread_id, "conversation started");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"you> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        match line.trim() {
            "/quit" | "/exit" => break,
            "/clear" => {
                let note = clear_command(&manager, &thread_id).await;
                stdout.write_all(format!("{note}\n").as_bytes()).await?;
                continue;
            }
            _ => {}
        }

        let reply = manager
            .handle_turn(&thread_id, &line)
            .await
            .context("Turn failed")?;
        let mut out = format!("bot> {}\n", reply.response_text);
        if reply.escalated {
            let reason = reply.reason.map(|r| r.to_string()).unwrap_or_default();
            out.push_str(&format!("[escalated: {reason}]\n"));
        }
        stdout.write_all(out.as_bytes()).await?;
    }

    Ok(())
}

/// `/clear`：清除转人工标记；thread 尚无会话时如实提示
async fn clear_command(manager: &SessionManager, thread_id: &str) -> String {
    match manager.clear_escalation(thread_id).await {
        Ok(()) => "(escalation cleared)".to_string(),
        Err(e) => {
            tracing::warn!(thread_id, error = %e, "clear escalation failed");
            format!("(nothing to clear: {e})")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use udahub::config::AppConfig;

    #[tokio::test]
    async fn clear_before_first_turn_reports_missing_thread() {
        let manager = create_session_manager(&AppConfig::default()).await.unwrap();
        let note = clear_command(&manager, "t-1").await;
        assert!(note.starts_with("(nothing to clear"));

        manager.handle_turn("t-1", "talk to a human").await.unwrap();
        assert_eq!(clear_command(&manager, "t-1").await, "(escalation cleared)");
    }
}

//! Bee 控制台聊天
//!
//! 从标准输入逐行读取消息，走与 WhatsApp 相同的会话与记忆流程。
//! 用法: bee-chat [chat_identity]（默认 "console"），输入 /quit 退出。

use std::sync::Arc;

use anyhow::Context;
use bee::agent::ChatService;
use bee::config::load_config;
use bee::core::{
    SchedulerCleanup, ServiceContext, ShutdownCoordinator, ShutdownManager, ShutdownReason,
    VectorStoreCleanup,
};
use bee::integrations::InboundMessage;
use bee::llm::create_llm_from_config;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(None).context("Failed to load config")?;
    bee::observability::init(&config.app.log_level);

    let chat = std::env::args().nth(1).unwrap_or_else(|| "console".to_string());

    let llm = create_llm_from_config(
        config.llm.base_url.as_deref(),
        &config.llm.model,
        config.llm.api_key.as_deref(),
    );
    let ctx = Arc::new(ServiceContext::from_config(config).context("Invalid configuration")?);

    let scheduler = ctx.scheduler.clone();
    match tokio::task::spawn_blocking(move || scheduler.run_startup_cleanup()).await? {
        Ok(report) => tracing::info!(
            "Startup cleanup: {} found, {} transferred, {} failed",
            report.found,
            report.transferred,
            report.failed
        ),
        Err(e) => tracing::error!("Startup cleanup failed: {}", e),
    }

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let cleanup_handle = ctx.scheduler.clone().spawn(shutdown.token());

    let mut coordinator = ShutdownCoordinator::new(shutdown.clone());
    coordinator.register(SchedulerCleanup::new(cleanup_handle));
    coordinator.register(VectorStoreCleanup::new(ctx.long_term.clone()));

    let service = ChatService::new(ctx, llm);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("Bee chat as '{}'. Type /quit to exit.", chat);
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            shutdown.shutdown(ShutdownReason::UserInitiated);
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" {
            shutdown.shutdown(ShutdownReason::UserInitiated);
            break;
        }

        match service.handle(InboundMessage::text(&chat, text)).await {
            Ok(reply) => println!("{}", reply),
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }

    coordinator.run_cleanup().await;
    Ok(())
}

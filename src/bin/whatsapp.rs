//! Bee WhatsApp 服务
//!
//! 通过 Green API 与 Bee 对话。Green API 控制台中把 Webhook 地址设为
//! http://YOUR_HOST:3000/webhook 并开启 incomingWebhook。
//!
//! 配置（config/default.toml 或环境变量）:
//! - BEE__WHATSAPP__ID_INSTANCE / BEE__WHATSAPP__API_TOKEN: Green API 实例凭据
//! - BEE__LLM__API_KEY（或 DEEPSEEK_API_KEY / OPENAI_API_KEY）: LLM API Key
//!
//! 启动: cargo run --bin bee-whatsapp --features whatsapp

#[cfg(feature = "whatsapp")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::sync::Arc;

    use anyhow::Context;
    use bee::agent::ChatService;
    use bee::config::load_config;
    use bee::core::{
        SchedulerCleanup, ServiceContext, ShutdownCoordinator, ShutdownManager, ShutdownReason,
        VectorStoreCleanup,
    };
    use bee::integrations::whatsapp::{create_router, GreenApiTransport, WhatsappState};
    use bee::llm::create_llm_from_config;

    let config = load_config(None).context("Failed to load config")?;
    bee::observability::init(&config.app.log_level);

    let id_instance = config
        .whatsapp
        .id_instance
        .clone()
        .context("whatsapp.id_instance must be set")?;
    let api_token = config
        .whatsapp
        .api_token
        .clone()
        .context("whatsapp.api_token must be set")?;
    let listen_addr = config.whatsapp.listen_addr.clone();

    let llm = create_llm_from_config(
        config.llm.base_url.as_deref(),
        &config.llm.model,
        config.llm.api_key.as_deref(),
    );
    let transport = Arc::new(GreenApiTransport::new(
        &config.whatsapp.api_url,
        &id_instance,
        &api_token,
    ));

    let ctx = Arc::new(ServiceContext::from_config(config).context("Invalid configuration")?);

    // 上次运行遗留的过期会话：先归档并转存，再开始接收消息
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

    let mut coordinator = ShutdownCoordinator::new(shutdown.clone()).with_timeout(10);
    coordinator.register(SchedulerCleanup::new(cleanup_handle));
    coordinator.register(VectorStoreCleanup::new(ctx.long_term.clone()));

    let service = Arc::new(ChatService::new(ctx.clone(), llm));
    let app = create_router(Arc::new(WhatsappState { service, transport }));

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;
    tracing::info!("Bee WhatsApp server listening on http://{}", listen_addr);
    tracing::info!("Webhook URL: http://YOUR_HOST:{}/webhook", listener.local_addr()?.port());

    let waiter = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { waiter.wait_for_shutdown().await })
        .await;
    if let Err(e) = &served {
        tracing::error!("Server error: {}", e);
        shutdown.shutdown(ShutdownReason::FatalError(e.to_string()));
    }

    coordinator.run_cleanup().await;
    served?;
    Ok(())
}

#[cfg(not(feature = "whatsapp"))]
fn main() {
    eprintln!("请使用 --features whatsapp 编译: cargo run --bin bee-whatsapp --features whatsapp");
    std::process::exit(1);
}

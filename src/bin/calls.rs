//! Butler 电话服务
//!
//! 提供 /start_call（外呼并等待结果）与 /postcall（服务商通话结束 webhook）。
//!
//! 环境变量:
//! - ELEVENLABS_API_KEY: 语音代理服务商 API Key
//! - BUTLER__CALLS__AGENT_ID / BUTLER__CALLS__AGENT_PHONE_NUMBER_ID: 也可写在 config/default.toml
//!
//! 启动: cargo run --bin butler-calls --features server

#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::sync::Arc;

    use anyhow::Context;
    use butler::calls::{server::create_router, CallService, HttpCallPlacer};
    use butler::config::load_config;

    butler::observability::init();

    let config = load_config(None).context("Failed to load config")?;
    let placer = HttpCallPlacer::from_config(&config.calls).context("Call placer is not configured")?;
    let service = Arc::new(CallService::from_config(&config.calls, Arc::new(placer)));

    // 定期清理过期的未认领结果与结束的通话记录
    let purge = service.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tick.tick().await;
            purge.purge_expired();
        }
    });

    let app = create_router(service);
    let listener = tokio::net::TcpListener::bind(&config.calls.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.calls.bind_addr))?;
    tracing::info!("Butler calls server listening on http://{}", config.calls.bind_addr);
    tracing::info!("Post-call webhook URL: http://YOUR_HOST/postcall");
    tracing::info!("Metrics: http://{}/metrics", config.calls.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(not(feature = "server"))]
fn main() {
    eprintln!("请使用 --features server 编译: cargo run --bin butler-calls --features server");
    std::process::exit(1);
}

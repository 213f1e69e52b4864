use anyhow::Context;
use seckill_server::{Config, ServerState, setup_environment};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 设置环境 (dotenv, 日志)
    setup_environment()?;

    tracing::info!("Seckill server starting...");

    // 2. 加载配置
    let config = Config::from_env();
    tracing::info!(
        environment = %config.environment,
        redis = %config.redis_url,
        work_dir = %config.work_dir,
        "Configuration loaded"
    );

    // 3. 初始化状态
    let state = ServerState::initialize(&config)
        .await
        .context("failed to initialize server state")?;

    // 4. 启动订单消费者
    state.pipeline.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    // 5. 停止后台任务
    state.shutdown().await;
    tracing::info!("Seckill server stopped");
    Ok(())
}

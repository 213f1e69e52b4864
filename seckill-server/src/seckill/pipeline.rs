//! Pipeline lifecycle

use super::consumer::OrderConsumer;
use crate::core::BackgroundTasks;
use parking_lot::Mutex;
use shared::{AppError, AppResult, ErrorCode};
use std::sync::Arc;

/// Owns the order consumer's background task
///
/// Nothing runs until [`SeckillPipeline::start`]; [`SeckillPipeline::stop`]
/// cancels the consumer and waits for it to exit.
pub struct SeckillPipeline {
    consumer: Arc<OrderConsumer>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl SeckillPipeline {
    pub fn new(consumer: Arc<OrderConsumer>) -> Self {
        Self {
            consumer,
            tasks: Mutex::new(None),
        }
    }

    pub fn consumer(&self) -> &Arc<OrderConsumer> {
        &self.consumer
    }

    /// Spawn the consumer loop; must be called inside a tokio runtime
    pub fn start(&self) -> AppResult<()> {
        let mut guard = self.tasks.lock();
        if guard.is_some() {
            return Err(AppError::with_message(
                ErrorCode::AlreadyRunning,
                "Seckill pipeline already started",
            ));
        }

        let mut tasks = BackgroundTasks::new();
        let token = tasks.shutdown_token();
        let consumer = self.consumer.clone();
        tasks.spawn("order_consumer", async move {
            consumer.run(token).await;
        });
        *guard = Some(tasks);

        tracing::info!("Seckill pipeline started");
        Ok(())
    }

    /// Stop the consumer; no-op when not running
    pub async fn stop(&self) {
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.shutdown().await;
            tracing::info!("Seckill pipeline stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }
}

use std::sync::Arc;

use shared::{AppError, AppResult};

use crate::cache::CacheClient;
use crate::core::Config;
use crate::db::{VoucherRepository, VoucherStorage};
use crate::id::IdWorker;
use crate::kv::{KvStore, RedisStore};
use crate::seckill::{OrderConsumer, SeckillPipeline, VoucherOrderService};

/// 服务状态 - 持有所有组件的共享引用
///
/// 使用 Arc 实现浅拷贝，克隆成本极低。
///
/// # 组件
///
/// | 字段 | 类型 | 说明 |
/// |------|------|------|
/// | config | Config | 配置项 (不可变) |
/// | store | Arc<dyn KvStore> | 共享 KV |
/// | repository | Arc<dyn VoucherRepository> | 持久化存储 |
/// | cache | Arc<CacheClient> | 缓存客户端 |
/// | ids | IdWorker | 全局 ID 生成器 |
/// | orders | Arc<VoucherOrderService> | 秒杀下单入口 |
/// | pipeline | Arc<SeckillPipeline> | 订单消费者生命周期 |
#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub store: Arc<dyn KvStore>,
    pub repository: Arc<dyn VoucherRepository>,
    pub cache: Arc<CacheClient>,
    pub ids: IdWorker,
    pub orders: Arc<VoucherOrderService>,
    pub pipeline: Arc<SeckillPipeline>,
}

impl ServerState {
    /// 按配置连接 Redis、打开 redb 并组装所有组件
    pub async fn initialize(config: &Config) -> AppResult<Self> {
        std::fs::create_dir_all(&config.work_dir).map_err(|e| {
            AppError::internal(format!("Failed to create work dir {}: {}", config.work_dir, e))
        })?;

        let store = Arc::new(RedisStore::connect(&config.redis_url).await?);
        let repository = Arc::new(VoucherStorage::open(config.database_path())?);
        tracing::info!(path = %config.database_path().display(), "Durable store opened");

        Ok(Self::with_backends(config.clone(), store, repository))
    }

    /// 用给定的存储后端组装 (测试、单机演示)
    pub fn with_backends(
        config: Config,
        store: Arc<dyn KvStore>,
        repository: Arc<dyn VoucherRepository>,
    ) -> Self {
        let cache = Arc::new(CacheClient::new(store.clone(), config.cache.clone()));
        let ids = IdWorker::new(store.clone());
        let orders = Arc::new(
            VoucherOrderService::new(store.clone(), cache.clone(), repository.clone())
                .with_stream_key(config.consumer.stream_key.clone())
                .with_voucher_cache_ttl(config.voucher_cache_ttl),
        );
        let consumer = Arc::new(OrderConsumer::new(
            store.clone(),
            repository.clone(),
            config.consumer.clone(),
        ));
        let pipeline = Arc::new(SeckillPipeline::new(consumer));

        Self {
            config,
            store,
            repository,
            cache,
            ids,
            orders,
            pipeline,
        }
    }

    /// 停止消费者并等待缓存重建任务完成
    pub async fn shutdown(&self) {
        self.pipeline.stop().await;
        self.cache.shutdown().await;
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("config", &self.config)
            .field("pipeline_running", &self.pipeline.is_running())
            .finish_non_exhaustive()
    }
}

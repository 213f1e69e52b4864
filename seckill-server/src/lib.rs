//! Seckill Server - 缓存与高并发秒杀核心
//!
//! # 架构概述
//!
//! - **共享 KV** (`kv`): Redis 门面，内存实现用于测试
//! - **缓存** (`cache`): 穿透 / 互斥锁 / 逻辑过期三种查询策略
//! - **分布式锁** (`lock`): `SET NX PX` + 脚本比对解锁
//! - **ID 生成** (`id`): 时间戳 + 每日序列号
//! - **持久化** (`db`): redb 存储秒杀券和订单
//! - **秒杀** (`seckill`): 原子准入脚本、订单流消费者、pending 回放
//!
//! # 模块结构
//!
//! ```text
//! seckill-server/src/
//! ├── core/          # 配置、状态、后台任务
//! ├── kv/            # KvStore trait, RedisStore, MemoryStore, 脚本
//! ├── cache/         # CacheClient
//! ├── lock/          # DistributedLock, KvLock
//! ├── id/            # IdWorker
//! ├── db/            # VoucherRepository, VoucherStorage (redb)
//! ├── seckill/       # VoucherOrderService, OrderConsumer, SeckillPipeline
//! └── utils/         # 日志
//! ```

pub mod cache;
pub mod core;
pub mod db;
pub mod id;
pub mod kv;
pub mod lock;
pub mod seckill;
pub mod utils;

// Re-export 公共类型
pub use cache::{CacheClient, CacheConfig};
pub use core::{BackgroundTasks, Config, ServerState};
pub use db::{CreateOrderOutcome, VoucherRepository, VoucherStorage};
pub use id::IdWorker;
pub use kv::{KvStore, MemoryStore, RedisStore};
pub use lock::{DistributedLock, KvLock};
pub use seckill::{
    ConsumerConfig, OrderConsumer, RejectReason, SeckillOutcome, SeckillPipeline,
    VoucherOrderService,
};

// Re-export unified error types from shared
pub use shared::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};

/// 加载 `.env` 并初始化日志
///
/// 日志级别和目录取自 `LOG_LEVEL` / `LOG_DIR`。
pub fn setup_environment() -> AppResult<()> {
    // .env 不存在时忽略
    let _ = dotenv::dotenv();

    let log_level = std::env::var("LOG_LEVEL").ok();
    let log_dir = std::env::var("LOG_DIR").ok().filter(|d| !d.is_empty());
    if let Some(dir) = &log_dir {
        std::fs::create_dir_all(dir)
            .map_err(|e| AppError::internal(format!("Failed to create log dir {}: {}", dir, e)))?;
    }
    init_logger_with_file(log_level.as_deref(), log_dir.as_deref());
    Ok(())
}

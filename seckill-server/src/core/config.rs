use crate::cache::CacheConfig;
use crate::kv::keys::{CACHE_VOUCHER_TTL, ORDER_STREAM_KEY};
use crate::seckill::ConsumerConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// 服务配置
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/seckill | 工作目录 (redb 数据文件) |
/// | REDIS_URL | redis://127.0.0.1:6379/0 | 共享 KV 地址 |
/// | ENVIRONMENT | development | 运行环境 |
/// | LOG_LEVEL | info | 日志级别 / EnvFilter 指令 |
/// | LOG_DIR | (无) | 日志目录，设置后按天滚动写文件 |
/// | CACHE_NULL_TTL_SECS | 120 | 空值哨兵 TTL |
/// | CACHE_MUTEX_TTL_SECS | 10 | 缓存重建互斥锁租期 |
/// | CACHE_RETRY_BACKOFF_MS | 50 | 等锁重试间隔 |
/// | CACHE_MUTEX_WAIT_MS | 5000 | 等锁最长时间 |
/// | CACHE_REBUILD_WORKERS | 10 | 逻辑过期重建并发数 |
/// | VOUCHER_CACHE_TTL_SECS | 1800 | 秒杀券缓存 TTL |
/// | ORDER_STREAM_KEY | stream.orders | 订单流 |
/// | ORDER_GROUP | g1 | 消费组 |
/// | ORDER_CONSUMER | c1 | 消费者名 |
/// | ORDER_BATCH_SIZE | 10 | 每次读取条数 |
/// | ORDER_BLOCK_MS | 2000 | 阻塞读等待时间 |
/// | ORDER_RETRY_DELAY_MS | 2000 | pending 回放重试间隔 |
/// | ORDER_LOCK_TTL_SECS | 30 | 用户下单锁租期 |
///
/// # 示例
///
/// ```ignore
/// REDIS_URL=redis://10.0.0.5/0 ORDER_CONSUMER=c2 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存放 redb 数据文件
    pub work_dir: String,
    /// 共享 KV (Redis) 地址
    pub redis_url: String,
    /// 运行环境: development | staging | production
    pub environment: String,
    /// 日志级别
    pub log_level: String,
    /// 日志目录 (None = 只输出到终端)
    pub log_dir: Option<String>,
    /// 缓存客户端参数
    pub cache: CacheConfig,
    /// 秒杀券缓存 TTL
    pub voucher_cache_ttl: Duration,
    /// 订单消费者参数
    pub consumer: ConsumerConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置或无法解析，使用默认值
    pub fn from_env() -> Self {
        let cache_defaults = CacheConfig::default();
        let consumer_defaults = ConsumerConfig::default();

        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/seckill".into()),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".into()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_dir: std::env::var("LOG_DIR").ok().filter(|d| !d.is_empty()),

            cache: CacheConfig {
                null_ttl: Duration::from_secs(env_or(
                    "CACHE_NULL_TTL_SECS",
                    cache_defaults.null_ttl.as_secs(),
                )),
                mutex_ttl: Duration::from_secs(env_or(
                    "CACHE_MUTEX_TTL_SECS",
                    cache_defaults.mutex_ttl.as_secs(),
                )),
                retry_backoff: Duration::from_millis(env_or(
                    "CACHE_RETRY_BACKOFF_MS",
                    cache_defaults.retry_backoff.as_millis() as u64,
                )),
                mutex_wait: Duration::from_millis(env_or(
                    "CACHE_MUTEX_WAIT_MS",
                    cache_defaults.mutex_wait.as_millis() as u64,
                )),
                rebuild_workers: env_or("CACHE_REBUILD_WORKERS", cache_defaults.rebuild_workers),
            },
            voucher_cache_ttl: Duration::from_secs(env_or(
                "VOUCHER_CACHE_TTL_SECS",
                CACHE_VOUCHER_TTL.as_secs(),
            )),

            consumer: ConsumerConfig {
                stream_key: std::env::var("ORDER_STREAM_KEY")
                    .unwrap_or_else(|_| ORDER_STREAM_KEY.into()),
                group: std::env::var("ORDER_GROUP").unwrap_or(consumer_defaults.group),
                consumer: std::env::var("ORDER_CONSUMER").unwrap_or(consumer_defaults.consumer),
                batch_size: env_or("ORDER_BATCH_SIZE", consumer_defaults.batch_size).max(1),
                block: Duration::from_millis(env_or(
                    "ORDER_BLOCK_MS",
                    consumer_defaults.block.as_millis() as u64,
                )),
                retry_delay: Duration::from_millis(env_or(
                    "ORDER_RETRY_DELAY_MS",
                    consumer_defaults.retry_delay.as_millis() as u64,
                )),
                lock_ttl: Duration::from_secs(env_or(
                    "ORDER_LOCK_TTL_SECS",
                    consumer_defaults.lock_ttl.as_secs(),
                )),
            },
        }
    }

    /// 使用自定义值覆盖部分配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>, redis_url: impl Into<String>) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.redis_url = redis_url.into();
        config
    }

    /// redb 数据文件路径
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("seckill.redb")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

//! Admission service

use super::{RejectReason, SeckillOutcome};
use crate::cache::CacheClient;
use crate::db::VoucherRepository;
use crate::id::IdWorker;
use crate::kv::keys::{self, CACHE_VOUCHER_KEY, CACHE_VOUCHER_TTL, ORDER_ID_BUSINESS_KEY, ORDER_STREAM_KEY};
use crate::kv::{ADMITTED, DUPLICATE_ORDER, KvStore, OUT_OF_STOCK, StoreScript};
use shared::models::{SaleWindow, SeckillVoucher, UserContext};
use shared::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;

/// Voucher order entry point
pub struct VoucherOrderService {
    store: Arc<dyn KvStore>,
    cache: Arc<CacheClient>,
    ids: IdWorker,
    repository: Arc<dyn VoucherRepository>,
    stream_key: String,
    voucher_cache_ttl: Duration,
}

impl VoucherOrderService {
    pub fn new(
        store: Arc<dyn KvStore>,
        cache: Arc<CacheClient>,
        repository: Arc<dyn VoucherRepository>,
    ) -> Self {
        Self {
            ids: IdWorker::new(store.clone()),
            store,
            cache,
            repository,
            stream_key: ORDER_STREAM_KEY.to_string(),
            voucher_cache_ttl: CACHE_VOUCHER_TTL,
        }
    }

    /// Stream admitted orders are appended to
    pub fn with_stream_key(mut self, stream_key: impl Into<String>) -> Self {
        self.stream_key = stream_key.into();
        self
    }

    pub fn with_voucher_cache_ttl(mut self, ttl: Duration) -> Self {
        self.voucher_cache_ttl = ttl;
        self
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// 发布秒杀券：写库、初始化 KV 库存、清掉旧的缓存行
    pub async fn publish_voucher(&self, voucher: &SeckillVoucher) -> AppResult<()> {
        if voucher.stock < 0 {
            return Err(AppError::validation("Voucher stock must not be negative")
                .with_detail("voucher_id", voucher.voucher_id)
                .with_detail("stock", voucher.stock));
        }
        self.repository.save_voucher(voucher)?;
        self.store
            .set(&keys::stock_key(voucher.voucher_id), &voucher.stock.to_string(), None)
            .await?;
        self.cache.invalidate(CACHE_VOUCHER_KEY, voucher.voucher_id).await?;
        tracing::info!(
            voucher_id = voucher.voucher_id,
            stock = voucher.stock,
            "Seckill voucher published"
        );
        Ok(())
    }

    /// Voucher row through the cache (absence is cached too)
    pub async fn voucher(&self, voucher_id: u64) -> AppResult<Option<SeckillVoucher>> {
        let repository = self.repository.clone();
        self.cache
            .get(
                CACHE_VOUCHER_KEY,
                voucher_id,
                move |id| async move { repository.get_voucher(id) },
                self.voucher_cache_ttl,
            )
            .await
    }

    /// 秒杀下单
    ///
    /// Admission only: the order is queued on the stream and persisted later
    /// by the order consumer. Rejections are returned as values; `Err` means
    /// the store or the id worker failed.
    pub async fn seckill_voucher(&self, user: &UserContext, voucher_id: u64) -> AppResult<SeckillOutcome> {
        let Some(voucher) = self.voucher(voucher_id).await? else {
            return Ok(self.reject(user, voucher_id, RejectReason::VoucherNotFound));
        };
        match voucher.window_at(shared::util::now_millis()) {
            SaleWindow::NotStarted => return Ok(self.reject(user, voucher_id, RejectReason::NotStarted)),
            SaleWindow::Ended => return Ok(self.reject(user, voucher_id, RejectReason::Ended)),
            SaleWindow::Active => {}
        }

        let order_id = self.ids.next_id(ORDER_ID_BUSINESS_KEY).await?;
        let keys = [
            keys::stock_key(voucher_id),
            keys::order_set_key(voucher_id),
            self.stream_key.clone(),
        ];
        let args = [voucher_id.to_string(), user.user_id.to_string(), order_id.to_string()];

        match self.store.eval(StoreScript::Seckill, &keys, &args).await? {
            ADMITTED => {
                tracing::debug!(user_id = user.user_id, voucher_id, order_id, "Seckill admitted");
                Ok(SeckillOutcome::Admitted { order_id })
            }
            OUT_OF_STOCK => Ok(self.reject(user, voucher_id, RejectReason::OutOfStock)),
            DUPLICATE_ORDER => Ok(self.reject(user, voucher_id, RejectReason::DuplicateOrder)),
            other => Err(AppError::internal(format!("Unexpected seckill script reply: {}", other))
                .with_detail("voucher_id", voucher_id)),
        }
    }

    fn reject(&self, user: &UserContext, voucher_id: u64, reason: RejectReason) -> SeckillOutcome {
        tracing::debug!(user_id = user.user_id, voucher_id, reason = %reason, "Seckill rejected");
        SeckillOutcome::Rejected(reason)
    }
}

//! Order Consumer - persists admitted orders from the order stream
//!
//! 消费组读取订单流，逐条落库后 ACK。
//!
//! - 正常路径：`XREADGROUP >`，阻塞等待新消息
//! - 出错时不 ACK，消息留在 pending list；随后进入 pending 回放，
//!   `XREADGROUP 0` 重新处理，直到 pending list 清空
//! - 启动时先回放一次 pending，接手上一个进程没处理完的消息
//!
//! 落库本身是幂等的（见 [`VoucherRepository::create_voucher_order`]），
//! 同一条消息处理多次只会写入一次。

use crate::db::{CreateOrderOutcome, VoucherRepository};
use crate::id::IdWorker;
use crate::kv::keys::{ORDER_STREAM_KEY, order_lock_name};
use crate::kv::{KvStore, ReadFrom, StreamEntry};
use crate::lock::{DistributedLock, KvLock};
use shared::models::VoucherOrder;
use shared::{AppError, AppResult, ErrorCode};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Consumer settings
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub stream_key: String,
    pub group: String,
    pub consumer: String,
    /// Entries per read
    pub batch_size: usize,
    /// How long a read waits for new entries
    pub block: Duration,
    /// Pause between pending-list attempts that did not finish
    pub retry_delay: Duration,
    /// Lease of the per-user persistence lock
    pub lock_ttl: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            stream_key: ORDER_STREAM_KEY.to_string(),
            group: "g1".to_string(),
            consumer: "c1".to_string(),
            batch_size: 10,
            block: Duration::from_secs(2),
            retry_delay: Duration::from_secs(2),
            lock_ttl: Duration::from_secs(30),
        }
    }
}

/// What happened to one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handled {
    Acked,
    /// Left pending, to be replayed
    Deferred,
}

/// Batch summary
#[derive(Debug, Default)]
struct BatchReport {
    deferred: usize,
}

pub struct OrderConsumer {
    store: Arc<dyn KvStore>,
    repository: Arc<dyn VoucherRepository>,
    config: ConsumerConfig,
}

impl OrderConsumer {
    pub fn new(
        store: Arc<dyn KvStore>,
        repository: Arc<dyn VoucherRepository>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            store,
            repository,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            stream = %self.config.stream_key,
            group = %self.config.group,
            consumer = %self.config.consumer,
            "Order consumer started"
        );

        if let Err(e) = self.ensure_group().await {
            tracing::error!(error = %e, "Failed to create consumer group");
        }
        self.drain_pending(&shutdown).await;

        loop {
            let read = tokio::select! {
                _ = shutdown.cancelled() => break,
                read = self.read(ReadFrom::New, Some(self.config.block)) => read,
            };

            let needs_replay = match read {
                Ok(entries) if entries.is_empty() => false,
                Ok(entries) => match self.process_batch(&entries).await {
                    Ok(report) => report.deferred > 0,
                    Err(e) => {
                        tracing::error!(error = %e, "Order processing failed, replaying pending list");
                        true
                    }
                },
                Err(e) => {
                    tracing::error!(error = %e, "Order stream read failed, replaying pending list");
                    true
                }
            };

            if needs_replay {
                self.drain_pending(&shutdown).await;
            }
        }

        tracing::info!("Order consumer stopped");
    }

    /// Create the group (and stream) if missing
    async fn ensure_group(&self) -> AppResult<()> {
        let created = self
            .store
            .xgroup_create(&self.config.stream_key, &self.config.group)
            .await?;
        if created {
            tracing::info!(stream = %self.config.stream_key, group = %self.config.group, "Consumer group created");
        }
        Ok(())
    }

    /// Replay this consumer's pending list until it is empty
    ///
    /// Returns early on shutdown; whatever is left stays pending for the
    /// next start.
    async fn drain_pending(&self, shutdown: &CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            let settled = match self.read(ReadFrom::Pending, None).await {
                Ok(entries) if entries.is_empty() => return,
                Ok(entries) => {
                    tracing::info!(count = entries.len(), "Replaying pending orders");
                    match self.process_batch(&entries).await {
                        Ok(report) => report.deferred == 0,
                        Err(e) => {
                            tracing::error!(error = %e, "Pending order processing failed");
                            false
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Pending list read failed");
                    // the group may have been lost with the store's data
                    if let Err(e) = self.ensure_group().await {
                        tracing::debug!(error = %e, "Consumer group still unavailable");
                    }
                    false
                }
            };

            if !settled {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(self.config.retry_delay) => {}
                }
            }
        }
    }

    async fn read(&self, from: ReadFrom, block: Option<Duration>) -> AppResult<Vec<StreamEntry>> {
        let entries = self
            .store
            .xread_group(
                &self.config.stream_key,
                &self.config.group,
                &self.config.consumer,
                from,
                self.config.batch_size,
                block,
            )
            .await?;
        Ok(entries)
    }

    /// Stops at the first failure; later entries stay pending
    async fn process_batch(&self, entries: &[StreamEntry]) -> AppResult<BatchReport> {
        let mut report = BatchReport::default();
        for entry in entries {
            if self.handle_entry(entry).await? == Handled::Deferred {
                report.deferred += 1;
            }
        }
        Ok(report)
    }

    async fn handle_entry(&self, entry: &StreamEntry) -> AppResult<Handled> {
        let order = match decode_order(entry) {
            Ok(order) => order,
            Err(e) => {
                tracing::warn!(entry_id = %entry.id, error = %e, "Dropping malformed order entry");
                self.ack(entry).await?;
                return Ok(Handled::Acked);
            }
        };

        let lock = KvLock::new(self.store.clone(), order_lock_name(order.user_id));
        if !lock.try_lock(self.config.lock_ttl).await? {
            tracing::warn!(
                entry_id = %entry.id,
                user_id = order.user_id,
                "Order lock busy, leaving entry pending"
            );
            return Ok(Handled::Deferred);
        }

        let created = self.repository.create_voucher_order(&order);
        if let Err(e) = lock.unlock().await {
            tracing::warn!(key = %lock.key(), error = %e, "Failed to release order lock");
        }

        match created? {
            CreateOrderOutcome::Created => {
                tracing::debug!(order_id = order.id, user_id = order.user_id, "Order persisted");
            }
            CreateOrderOutcome::AlreadyPersisted => {
                tracing::debug!(order_id = order.id, "Order already persisted");
            }
            CreateOrderOutcome::Duplicate => {
                tracing::warn!(
                    order_id = order.id,
                    user_id = order.user_id,
                    voucher_id = order.voucher_id,
                    "User already holds an order for this voucher"
                );
            }
            CreateOrderOutcome::OutOfStock => {
                tracing::warn!(order_id = order.id, voucher_id = order.voucher_id, "Durable stock exhausted");
            }
            CreateOrderOutcome::VoucherMissing => {
                tracing::warn!(order_id = order.id, voucher_id = order.voucher_id, "Voucher row missing");
            }
        }

        self.ack(entry).await?;
        Ok(Handled::Acked)
    }

    async fn ack(&self, entry: &StreamEntry) -> AppResult<()> {
        self.store
            .xack(&self.config.stream_key, &self.config.group, std::slice::from_ref(&entry.id))
            .await?;
        Ok(())
    }
}

fn decode_order(entry: &StreamEntry) -> AppResult<VoucherOrder> {
    let field = |name: &str| -> AppResult<u64> {
        let raw = entry.field(name).ok_or_else(|| {
            AppError::with_message(ErrorCode::MalformedOrderEntry, format!("missing field {}", name))
        })?;
        raw.parse().map_err(|_| {
            AppError::with_message(ErrorCode::MalformedOrderEntry, format!("field {} is not an id: {}", name, raw))
        })
    };
    let id = field("id")?;
    Ok(VoucherOrder {
        id,
        voucher_id: field("voucherId")?,
        user_id: field("userId")?,
        created_at: IdWorker::timestamp_millis(id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::VoucherStorage;
    use crate::kv::MemoryStore;
    use shared::models::SeckillVoucher;
    use std::collections::HashMap;

    const STREAM: &str = "stream.test";

    fn config() -> ConsumerConfig {
        ConsumerConfig {
            stream_key: STREAM.to_string(),
            block: Duration::from_millis(50),
            retry_delay: Duration::from_millis(50),
            ..ConsumerConfig::default()
        }
    }

    fn fields(id: &str, voucher: &str, user: &str) -> Vec<(String, String)> {
        vec![
            ("id".to_string(), id.to_string()),
            ("voucherId".to_string(), voucher.to_string()),
            ("userId".to_string(), user.to_string()),
        ]
    }

    fn setup(stock: i32) -> (Arc<MemoryStore>, Arc<VoucherStorage>, Arc<OrderConsumer>) {
        let store = Arc::new(MemoryStore::new());
        let repository = Arc::new(VoucherStorage::open_in_memory().unwrap());
        repository
            .save_voucher(&SeckillVoucher {
                voucher_id: 1,
                title: "t".into(),
                stock,
                begin_time: 0,
                end_time: i64::MAX,
            })
            .unwrap();
        let consumer = Arc::new(OrderConsumer::new(store.clone(), repository.clone(), config()));
        (store, repository, consumer)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn spawn(consumer: &Arc<OrderConsumer>) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let token = CancellationToken::new();
        let consumer = consumer.clone();
        let run_token = token.clone();
        let handle = tokio::spawn(async move { consumer.run(run_token).await });
        (token, handle)
    }

    #[test]
    fn test_decode_order() {
        let entry = StreamEntry {
            id: "1-0".into(),
            fields: fields("8589934593", "3", "9").into_iter().collect::<HashMap<_, _>>(),
        };
        let order = decode_order(&entry).unwrap();
        assert_eq!(order.id, 8589934593);
        assert_eq!(order.voucher_id, 3);
        assert_eq!(order.user_id, 9);
        assert_eq!(order.created_at, IdWorker::timestamp_millis(8589934593));

        let bad = StreamEntry {
            id: "1-1".into(),
            fields: fields("x", "3", "9").into_iter().collect(),
        };
        assert_eq!(decode_order(&bad).unwrap_err().code, ErrorCode::MalformedOrderEntry);
    }

    #[tokio::test]
    async fn test_persists_and_acks_new_entries() {
        let (store, repository, consumer) = setup(10);
        let (token, handle) = spawn(&consumer);

        store.xadd(STREAM, &fields("100", "1", "7")).await.unwrap();
        store.xadd(STREAM, &fields("101", "1", "8")).await.unwrap();

        wait_until(|| repository.count_voucher_orders(1).unwrap() == 2).await;
        wait_until(|| store.pending_len(STREAM, "g1") == 0).await;
        assert_eq!(repository.get_voucher(1).unwrap().unwrap().stock, 8);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_replays_pending_entries() {
        let (store, repository, consumer) = setup(10);

        // delivered to c1 by a previous process that died before acking
        store.xgroup_create(STREAM, "g1").await.unwrap();
        store.xadd(STREAM, &fields("100", "1", "7")).await.unwrap();
        let delivered = store
            .xread_group(STREAM, "g1", "c1", ReadFrom::New, 10, None)
            .await
            .unwrap();
        assert_eq!(delivered.len(), 1);

        let (token, handle) = spawn(&consumer);
        wait_until(|| store.pending_len(STREAM, "g1") == 0).await;
        assert!(repository.get_order(100).unwrap().is_some());

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_redelivered_order_written_once() {
        let (store, repository, consumer) = setup(10);
        let (token, handle) = spawn(&consumer);

        store.xadd(STREAM, &fields("100", "1", "7")).await.unwrap();
        store.xadd(STREAM, &fields("100", "1", "7")).await.unwrap();

        wait_until(|| store.stream_len(STREAM) == 2 && store.pending_len(STREAM, "g1") == 0).await;
        assert_eq!(repository.count_voucher_orders(1).unwrap(), 1);
        assert_eq!(repository.get_voucher(1).unwrap().unwrap().stock, 9);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_entry_is_acked() {
        let (store, repository, consumer) = setup(10);
        let (token, handle) = spawn(&consumer);

        store
            .xadd(STREAM, &[("garbage".to_string(), "1".to_string())])
            .await
            .unwrap();
        store.xadd(STREAM, &fields("100", "1", "7")).await.unwrap();

        wait_until(|| repository.get_order(100).unwrap().is_some()).await;
        wait_until(|| store.pending_len(STREAM, "g1") == 0).await;

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_contended_user_lock_defers_entry() {
        let (store, repository, consumer) = setup(10);
        let holder = KvLock::new(store.clone(), order_lock_name(7));
        assert!(holder.try_lock(Duration::from_secs(30)).await.unwrap());

        let (token, handle) = spawn(&consumer);
        store.xadd(STREAM, &fields("100", "1", "7")).await.unwrap();

        wait_until(|| store.pending_len(STREAM, "g1") == 1).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(repository.get_order(100).unwrap().is_none());
        assert_eq!(store.pending_len(STREAM, "g1"), 1);

        holder.unlock().await.unwrap();
        wait_until(|| store.pending_len(STREAM, "g1") == 0).await;
        assert!(repository.get_order(100).unwrap().is_some());

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_promptly_when_idle() {
        let (_, _, consumer) = setup(10);
        let (token, handle) = spawn(&consumer);
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("consumer did not stop")
            .unwrap();
    }
}

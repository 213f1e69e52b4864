//! 订单恢复测试 - pending 列表回放
//!
//! 模拟消费者在 ACK 之前崩溃：
//! 1. 订单已投递给 c1 但未确认，进程重启后由 pending 回放落库
//! 2. 订单已落库但未确认，回放时不会重复写入
//! 3. 持久化层暂时故障，消费者持续重试直到成功

use seckill_server::kv::ReadFrom;
use seckill_server::{
    AppError, AppResult, Config, CreateOrderOutcome, KvStore, MemoryStore, ServerState,
    VoucherRepository, VoucherStorage,
};
use shared::models::{SeckillVoucher, UserContext, VoucherOrder};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const VOUCHER_ID: u64 = 3;

fn config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::with_overrides(dir.path().to_string_lossy(), "redis://unused");
    config.consumer.block = Duration::from_millis(50);
    config.consumer.retry_delay = Duration::from_millis(50);
    config
}

fn voucher(stock: i32) -> SeckillVoucher {
    let now = shared::util::now_millis();
    SeckillVoucher {
        voucher_id: VOUCHER_ID,
        title: "满 50 减 20".into(),
        stock,
        begin_time: now - 60_000,
        end_time: now + 3_600_000,
    }
}

/// 前 `failures` 次写订单返回数据库错误
struct FlakyRepository {
    inner: VoucherStorage,
    failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyRepository {
    fn new(inner: VoucherStorage, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }
}

impl VoucherRepository for FlakyRepository {
    fn get_voucher(&self, voucher_id: u64) -> AppResult<Option<SeckillVoucher>> {
        self.inner.get_voucher(voucher_id)
    }

    fn save_voucher(&self, voucher: &SeckillVoucher) -> AppResult<()> {
        self.inner.save_voucher(voucher)
    }

    fn decrement_stock(&self, voucher_id: u64) -> AppResult<bool> {
        self.inner.decrement_stock(voucher_id)
    }

    fn get_order(&self, order_id: u64) -> AppResult<Option<VoucherOrder>> {
        self.inner.get_order(order_id)
    }

    fn count_user_orders(&self, user_id: u64, voucher_id: u64) -> AppResult<u64> {
        self.inner.count_user_orders(user_id, voucher_id)
    }

    fn count_voucher_orders(&self, voucher_id: u64) -> AppResult<u64> {
        self.inner.count_voucher_orders(voucher_id)
    }

    fn create_voucher_order(&self, order: &VoucherOrder) -> AppResult<CreateOrderOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::database("disk unavailable"));
        }
        self.inner.create_voucher_order(order)
    }
}

async fn admit(state: &ServerState, users: impl IntoIterator<Item = u64>) -> Vec<u64> {
    let mut ids = Vec::new();
    for user_id in users {
        let outcome = state
            .orders
            .seckill_voucher(&UserContext::new(user_id), VOUCHER_ID)
            .await
            .unwrap();
        ids.push(outcome.order_id().unwrap());
    }
    ids
}

async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    done()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unacked_orders_replayed_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let store = Arc::new(MemoryStore::new());
    let stream = config.consumer.stream_key.clone();
    let group = config.consumer.group.clone();

    let order_ids = {
        let repository = Arc::new(VoucherStorage::open(config.database_path()).unwrap());
        let state = ServerState::with_backends(config.clone(), store.clone(), repository.clone());
        state.orders.publish_voucher(&voucher(10)).await.unwrap();
        let order_ids = admit(&state, 1..=5).await;

        // 第一个实例读到全部订单，只写了第一单就崩溃
        store.xgroup_create(&stream, &group).await.unwrap();
        let delivered = store
            .xread_group(&stream, &group, &config.consumer.consumer, ReadFrom::New, 10, None)
            .await
            .unwrap();
        assert_eq!(delivered.len(), 5);
        let first = VoucherOrder {
            id: order_ids[0],
            voucher_id: VOUCHER_ID,
            user_id: 1,
            created_at: 0,
        };
        assert_eq!(repository.insert_order(&first).unwrap(), CreateOrderOutcome::Created);
        assert_eq!(store.pending_len(&stream, &group), 5);
        order_ids
    };

    // 重启：重新打开 redb 文件，共享 KV 保留
    let repository = Arc::new(VoucherStorage::open(config.database_path()).unwrap());
    let state = ServerState::with_backends(config.clone(), store.clone(), repository.clone());
    state.pipeline.start().unwrap();

    let store_ref = store.clone();
    let (s, g) = (stream.clone(), group.clone());
    assert!(wait_until(move || store_ref.pending_len(&s, &g) == 0).await);
    state.shutdown().await;

    assert_eq!(repository.voucher_order_count(VOUCHER_ID).unwrap(), 5);
    for (i, order_id) in order_ids.iter().enumerate() {
        let order = repository.load_order(*order_id).unwrap().unwrap();
        assert_eq!(order.user_id, i as u64 + 1);
        assert_eq!(repository.user_order_count(order.user_id, VOUCHER_ID).unwrap(), 1);
    }
    let row = repository.load_voucher(VOUCHER_ID).unwrap().unwrap();
    assert_eq!(row.stock, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_persistence_failure_retried_until_written() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let store = Arc::new(MemoryStore::new());
    let repository = Arc::new(FlakyRepository::new(
        VoucherStorage::open(config.database_path()).unwrap(),
        3,
    ));
    let state = ServerState::with_backends(config.clone(), store.clone(), repository.clone());
    state.orders.publish_voucher(&voucher(10)).await.unwrap();
    state.pipeline.start().unwrap();

    let order_ids = admit(&state, [42, 43]).await;

    let repo = repository.clone();
    assert!(wait_until(move || repo.count_voucher_orders(VOUCHER_ID).unwrap() == 2).await);
    let store_ref = store.clone();
    let (s, g) = (config.consumer.stream_key.clone(), config.consumer.group.clone());
    assert!(wait_until(move || store_ref.pending_len(&s, &g) == 0).await);
    state.shutdown().await;

    assert!(repository.attempts.load(Ordering::SeqCst) >= 5);
    for order_id in order_ids {
        assert!(repository.get_order(order_id).unwrap().is_some());
    }
    assert_eq!(repository.get_voucher(VOUCHER_ID).unwrap().unwrap().stock, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_with_nothing_pending() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let store = Arc::new(MemoryStore::new());
    let repository = Arc::new(VoucherStorage::open(config.database_path()).unwrap());
    let state = ServerState::with_backends(config.clone(), store.clone(), repository.clone());
    state.orders.publish_voucher(&voucher(10)).await.unwrap();

    for round in 1..=3u64 {
        state.pipeline.start().unwrap();
        admit(&state, [round]).await;
        let repo = repository.clone();
        assert!(wait_until(move || repo.voucher_order_count(VOUCHER_ID).unwrap() == round).await);
        state.pipeline.stop().await;
    }

    assert_eq!(repository.voucher_order_count(VOUCHER_ID).unwrap(), 3);
    assert_eq!(
        store.pending_len(&config.consumer.stream_key, &config.consumer.group),
        0
    );
}

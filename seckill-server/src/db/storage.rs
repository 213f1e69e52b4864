//! redb-based voucher and order storage
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `vouchers` | `voucher_id` | `SeckillVoucher` | Voucher rows with durable stock |
//! | `orders` | `order_id` | `VoucherOrder` | Persisted orders |
//! | `user_orders` | `(user_id, voucher_id)` | `order_id` | One-order-per-user index |
//! | `voucher_orders` | `(voucher_id, order_id)` | `()` | Orders per voucher |
//!
//! redb serializes write transactions, so the checks in
//! [`VoucherStorage::create_voucher_order`] cannot interleave with another
//! writer.

use super::{CreateOrderOutcome, VoucherRepository};
use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use shared::models::{SeckillVoucher, VoucherOrder};
use shared::{AppError, AppResult};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// key = voucher_id, value = JSON-serialized SeckillVoucher
const VOUCHERS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("vouchers");

/// key = order_id, value = JSON-serialized VoucherOrder
const ORDERS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("orders");

/// key = (user_id, voucher_id), value = order_id
const USER_ORDERS_TABLE: TableDefinition<(u64, u64), u64> = TableDefinition::new("user_orders");

/// key = (voucher_id, order_id), value = empty (range scan per voucher)
const VOUCHER_ORDERS_TABLE: TableDefinition<(u64, u64), ()> = TableDefinition::new("voucher_orders");

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        AppError::database(e.to_string())
    }
}

/// Voucher storage backed by redb
#[derive(Clone)]
pub struct VoucherStorage {
    db: Arc<Database>,
}

impl std::fmt::Debug for VoucherStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoucherStorage").finish_non_exhaustive()
    }
}

impl VoucherStorage {
    /// Open or create the database at the given path
    ///
    /// Commits are durable once `commit()` returns (redb's default
    /// `Durability::Immediate`).
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (tests, demos)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(VOUCHERS_TABLE)?;
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(USER_ORDERS_TABLE)?;
            let _ = write_txn.open_table(VOUCHER_ORDERS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    // ========== Vouchers ==========

    pub fn load_voucher(&self, voucher_id: u64) -> StorageResult<Option<SeckillVoucher>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(VOUCHERS_TABLE)?;
        match table.get(voucher_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn store_voucher(&self, voucher: &SeckillVoucher) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        Self::put_voucher(&txn, voucher)?;
        txn.commit()?;
        Ok(())
    }

    pub fn take_stock(&self, voucher_id: u64) -> StorageResult<bool> {
        let txn = self.db.begin_write()?;
        let Some(mut voucher) = Self::voucher_txn(&txn, voucher_id)? else {
            return Ok(false);
        };
        if voucher.stock <= 0 {
            return Ok(false);
        }
        voucher.stock -= 1;
        Self::put_voucher(&txn, &voucher)?;
        txn.commit()?;
        Ok(true)
    }

    fn voucher_txn(txn: &WriteTransaction, voucher_id: u64) -> StorageResult<Option<SeckillVoucher>> {
        let table = txn.open_table(VOUCHERS_TABLE)?;
        let voucher = match table.get(voucher_id)? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(voucher)
    }

    fn put_voucher(txn: &WriteTransaction, voucher: &SeckillVoucher) -> StorageResult<()> {
        let mut table = txn.open_table(VOUCHERS_TABLE)?;
        let value = serde_json::to_vec(voucher)?;
        table.insert(voucher.voucher_id, value.as_slice())?;
        Ok(())
    }

    // ========== Orders ==========

    pub fn load_order(&self, order_id: u64) -> StorageResult<Option<VoucherOrder>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn user_order_count(&self, user_id: u64, voucher_id: u64) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USER_ORDERS_TABLE)?;
        Ok(u64::from(table.get((user_id, voucher_id))?.is_some()))
    }

    pub fn voucher_order_count(&self, voucher_id: u64) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(VOUCHER_ORDERS_TABLE)?;
        let mut count = 0;
        for entry in table.range((voucher_id, 0u64)..=(voucher_id, u64::MAX))? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Idempotent order insert, see [`VoucherRepository::create_voucher_order`]
    pub fn insert_order(&self, order: &VoucherOrder) -> StorageResult<CreateOrderOutcome> {
        let txn = self.db.begin_write()?;

        {
            let orders = txn.open_table(ORDERS_TABLE)?;
            if orders.get(order.id)?.is_some() {
                return Ok(CreateOrderOutcome::AlreadyPersisted);
            }
            let user_orders = txn.open_table(USER_ORDERS_TABLE)?;
            if user_orders.get((order.user_id, order.voucher_id))?.is_some() {
                return Ok(CreateOrderOutcome::Duplicate);
            }
        }

        let Some(mut voucher) = Self::voucher_txn(&txn, order.voucher_id)? else {
            return Ok(CreateOrderOutcome::VoucherMissing);
        };
        if voucher.stock <= 0 {
            return Ok(CreateOrderOutcome::OutOfStock);
        }
        voucher.stock -= 1;
        Self::put_voucher(&txn, &voucher)?;

        {
            let mut orders = txn.open_table(ORDERS_TABLE)?;
            let value = serde_json::to_vec(order)?;
            orders.insert(order.id, value.as_slice())?;

            let mut user_orders = txn.open_table(USER_ORDERS_TABLE)?;
            user_orders.insert((order.user_id, order.voucher_id), order.id)?;

            let mut voucher_orders = txn.open_table(VOUCHER_ORDERS_TABLE)?;
            voucher_orders.insert((order.voucher_id, order.id), ())?;
        }
        txn.commit()?;
        Ok(CreateOrderOutcome::Created)
    }

    /// Get storage statistics
    pub fn get_stats(&self) -> StorageResult<StorageStats> {
        let read_txn = self.db.begin_read()?;
        let vouchers = read_txn.open_table(VOUCHERS_TABLE)?;
        let orders = read_txn.open_table(ORDERS_TABLE)?;
        Ok(StorageStats {
            voucher_count: vouchers.len()?,
            order_count: orders.len()?,
        })
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub voucher_count: u64,
    pub order_count: u64,
}

impl VoucherRepository for VoucherStorage {
    fn get_voucher(&self, voucher_id: u64) -> AppResult<Option<SeckillVoucher>> {
        Ok(self.load_voucher(voucher_id)?)
    }

    fn save_voucher(&self, voucher: &SeckillVoucher) -> AppResult<()> {
        Ok(self.store_voucher(voucher)?)
    }

    fn decrement_stock(&self, voucher_id: u64) -> AppResult<bool> {
        Ok(self.take_stock(voucher_id)?)
    }

    fn get_order(&self, order_id: u64) -> AppResult<Option<VoucherOrder>> {
        Ok(self.load_order(order_id)?)
    }

    fn count_user_orders(&self, user_id: u64, voucher_id: u64) -> AppResult<u64> {
        Ok(self.user_order_count(user_id, voucher_id)?)
    }

    fn count_voucher_orders(&self, voucher_id: u64) -> AppResult<u64> {
        Ok(self.voucher_order_count(voucher_id)?)
    }

    fn create_voucher_order(&self, order: &VoucherOrder) -> AppResult<CreateOrderOutcome> {
        Ok(self.insert_order(order)?)
    }
}

//! In-process KV store
//!
//! All state lives behind one mutex, which is what makes scripts atomic here:
//! a script runs start to finish while the lock is held. Expiry is lazy, the
//! way Redis treats a key on access.

use super::script::{ADMITTED, DUPLICATE_ORDER, OUT_OF_STOCK, StoreScript};
use super::{KvStore, ReadFrom, StoreError, StoreResult, StreamEntry};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Stream entry id (`<millis>-<seq>`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct EntryId {
    ms: u64,
    seq: u64,
}

impl EntryId {
    fn parse(s: &str) -> Option<Self> {
        let (ms, seq) = s.split_once('-')?;
        Some(Self {
            ms: ms.parse().ok()?,
            seq: seq.parse().ok()?,
        })
    }

    fn next_after(last: EntryId, now_ms: u64) -> Self {
        if now_ms > last.ms {
            Self { ms: now_ms, seq: 0 }
        } else {
            Self {
                ms: last.ms,
                seq: last.seq + 1,
            }
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct Group {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingEntry>,
}

#[derive(Debug, Default)]
struct Stream {
    entries: BTreeMap<EntryId, HashMap<String, String>>,
    last_id: EntryId,
    groups: HashMap<String, Group>,
}

#[derive(Debug)]
enum Value {
    Str(String),
    Set(HashSet<String>),
    ZSet(HashMap<String, f64>),
    Bits(Vec<u8>),
    Stream(Stream),
}

#[derive(Debug)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn persistent(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Keyspace = HashMap<String, Slot>;

/// In-memory [`KvStore`] with Redis semantics
#[derive(Debug, Default)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    /// Woken on every stream append so blocked readers re-check
    appended: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a stream (0 when missing)
    pub fn stream_len(&self, stream: &str) -> usize {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, stream);
        match keyspace.get(stream) {
            Some(Slot {
                value: Value::Stream(s),
                ..
            }) => s.entries.len(),
            _ => 0,
        }
    }

    /// Number of delivered-but-unacknowledged entries of a group
    pub fn pending_len(&self, stream: &str, group: &str) -> usize {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, stream);
        match keyspace.get(stream) {
            Some(Slot {
                value: Value::Stream(s),
                ..
            }) => s.groups.get(group).map(|g| g.pending.len()).unwrap_or(0),
            _ => 0,
        }
    }

    fn read_group_once(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        from: ReadFrom,
        count: usize,
    ) -> StoreResult<Vec<StreamEntry>> {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, stream);
        let no_group = || StoreError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        };
        let s = match keyspace.get_mut(stream) {
            Some(slot) => as_stream(slot, stream)?,
            None => return Err(no_group()),
        };
        let Stream {
            entries, groups, ..
        } = s;
        let g = groups.get_mut(group).ok_or_else(no_group)?;

        let mut batch = Vec::new();
        match from {
            ReadFrom::New => {
                let start = std::ops::Bound::Excluded(g.last_delivered);
                for (id, fields) in entries
                    .range((start, std::ops::Bound::Unbounded))
                    .take(count)
                {
                    g.pending.insert(
                        *id,
                        PendingEntry {
                            consumer: consumer.to_string(),
                            delivery_count: 1,
                        },
                    );
                    g.last_delivered = *id;
                    batch.push(StreamEntry {
                        id: id.to_string(),
                        fields: fields.clone(),
                    });
                }
            }
            ReadFrom::Pending => {
                for (id, pending) in g
                    .pending
                    .iter_mut()
                    .filter(|(_, p)| p.consumer == consumer)
                    .take(count)
                {
                    pending.delivery_count += 1;
                    batch.push(StreamEntry {
                        id: id.to_string(),
                        fields: entries.get(id).cloned().unwrap_or_default(),
                    });
                }
            }
        }
        Ok(batch)
    }

    fn run_unlock(keyspace: &mut Keyspace, keys: &[String], args: &[String]) -> StoreResult<i64> {
        let key = &keys[0];
        purge(keyspace, key);
        let owned = match keyspace.get(key) {
            Some(Slot {
                value: Value::Str(token),
                ..
            }) => *token == args[0],
            _ => false,
        };
        if owned {
            keyspace.remove(key);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    fn run_seckill(keyspace: &mut Keyspace, keys: &[String], args: &[String]) -> StoreResult<i64> {
        let (stock_key, order_key, stream_key) = (&keys[0], &keys[1], &keys[2]);
        let (voucher_id, user_id, order_id) = (&args[0], &args[1], &args[2]);
        for key in keys {
            purge(keyspace, key);
        }

        // 1. stock > 0 ?
        let stock = match keyspace.get(stock_key) {
            Some(Slot {
                value: Value::Str(s),
                ..
            }) => s.parse::<i64>().ok(),
            Some(_) => return Err(StoreError::WrongType(stock_key.clone())),
            None => None,
        };
        let stock = match stock {
            Some(n) if n > 0 => n,
            _ => return Ok(OUT_OF_STOCK),
        };

        // 2. already admitted ?
        match keyspace.get(order_key) {
            Some(Slot {
                value: Value::Set(members),
                ..
            }) => {
                if members.contains(user_id) {
                    return Ok(DUPLICATE_ORDER);
                }
            }
            Some(_) => return Err(StoreError::WrongType(order_key.clone())),
            None => {}
        }
        if keyspace
            .get(stream_key)
            .is_some_and(|slot| !matches!(slot.value, Value::Stream(_)))
        {
            return Err(StoreError::WrongType(stream_key.clone()));
        }

        // 3. reserve + record + enqueue
        if let Some(slot) = keyspace.get_mut(stock_key) {
            slot.value = Value::Str((stock - 1).to_string());
        }
        let set = keyspace
            .entry(order_key.clone())
            .or_insert_with(|| Slot::persistent(Value::Set(HashSet::new())));
        if let Value::Set(members) = &mut set.value {
            members.insert(user_id.clone());
        }
        let fields = vec![
            ("userId".to_string(), user_id.clone()),
            ("voucherId".to_string(), voucher_id.clone()),
            ("id".to_string(), order_id.clone()),
        ];
        append(keyspace, stream_key, &fields)?;
        Ok(ADMITTED)
    }
}

fn purge(keyspace: &mut Keyspace, key: &str) {
    let now = Instant::now();
    if keyspace.get(key).is_some_and(|slot| slot.is_expired(now)) {
        keyspace.remove(key);
    }
}

fn as_stream<'a>(slot: &'a mut Slot, key: &str) -> StoreResult<&'a mut Stream> {
    match &mut slot.value {
        Value::Stream(s) => Ok(s),
        _ => Err(StoreError::WrongType(key.to_string())),
    }
}

fn append(keyspace: &mut Keyspace, stream: &str, fields: &[(String, String)]) -> StoreResult<String> {
    let slot = keyspace
        .entry(stream.to_string())
        .or_insert_with(|| Slot::persistent(Value::Stream(Stream::default())));
    let s = as_stream(slot, stream)?;
    let now_ms = shared::util::now_millis().max(0) as u64;
    let id = EntryId::next_after(s.last_id, now_ms);
    s.entries.insert(id, fields.iter().cloned().collect());
    s.last_id = id;
    Ok(id.to_string())
}

/// Redis-style rank window over `len` items
fn rank_window(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, key);
        match keyspace.get(key) {
            Some(Slot {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut keyspace = self.keyspace.lock();
        keyspace.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, key);
        if keyspace.contains_key(key) {
            return Ok(false);
        }
        keyspace.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, key);
        Ok(keyspace.remove(key).is_some())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, key);
        let slot = keyspace
            .entry(key.to_string())
            .or_insert_with(|| Slot::persistent(Value::Str("0".to_string())));
        let Value::Str(current) = &mut slot.value else {
            return Err(StoreError::WrongType(key.to_string()));
        };
        let next = current
            .parse::<i64>()
            .ok()
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| StoreError::NotInteger(key.to_string()))?;
        *current = next.to_string();
        Ok(next)
    }

    async fn eval(&self, script: StoreScript, keys: &[String], args: &[String]) -> StoreResult<i64> {
        if keys.len() != script.key_count() || args.len() != script.arg_count() {
            return Err(StoreError::Script {
                script: script.name(),
                reason: format!(
                    "expected {} keys and {} args, got {} and {}",
                    script.key_count(),
                    script.arg_count(),
                    keys.len(),
                    args.len()
                ),
            });
        }
        let reply = {
            let mut keyspace = self.keyspace.lock();
            match script {
                StoreScript::Unlock => Self::run_unlock(&mut keyspace, keys, args)?,
                StoreScript::Seckill => Self::run_seckill(&mut keyspace, keys, args)?,
            }
        };
        if script == StoreScript::Seckill && reply == ADMITTED {
            self.appended.notify_waiters();
        }
        Ok(reply)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, key);
        let slot = keyspace
            .entry(key.to_string())
            .or_insert_with(|| Slot::persistent(Value::ZSet(HashMap::new())));
        let Value::ZSet(members) = &mut slot.value else {
            return Err(StoreError::WrongType(key.to_string()));
        };
        Ok(members.insert(member.to_string(), score).is_none())
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, key);
        match keyspace.get(key) {
            Some(Slot {
                value: Value::ZSet(members),
                ..
            }) => Ok(members.get(member).copied()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, key);
        match keyspace.get_mut(key) {
            Some(Slot {
                value: Value::ZSet(members),
                ..
            }) => Ok(members.remove(member).is_some()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(false),
        }
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, key);
        let members = match keyspace.get(key) {
            Some(Slot {
                value: Value::ZSet(members),
                ..
            }) => members,
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
            None => return Ok(Vec::new()),
        };
        let mut ranked: Vec<(&String, f64)> = members.iter().map(|(m, s)| (m, *s)).collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        Ok(match rank_window(ranked.len(), start, stop) {
            Some((from, to)) => ranked[from..=to].iter().map(|(m, _)| (*m).clone()).collect(),
            None => Vec::new(),
        })
    }

    async fn setbit(&self, key: &str, offset: u64, value: bool) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, key);
        let slot = keyspace
            .entry(key.to_string())
            .or_insert_with(|| Slot::persistent(Value::Bits(Vec::new())));
        let Value::Bits(bytes) = &mut slot.value else {
            return Err(StoreError::WrongType(key.to_string()));
        };
        let byte = (offset / 8) as usize;
        let mask = 0x80u8 >> (offset % 8);
        if bytes.len() <= byte {
            bytes.resize(byte + 1, 0);
        }
        let previous = bytes[byte] & mask != 0;
        if value {
            bytes[byte] |= mask;
        } else {
            bytes[byte] &= !mask;
        }
        Ok(previous)
    }

    async fn getbit(&self, key: &str, offset: u64) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, key);
        match keyspace.get(key) {
            Some(Slot {
                value: Value::Bits(bytes),
                ..
            }) => Ok(bytes
                .get((offset / 8) as usize)
                .is_some_and(|b| b & (0x80u8 >> (offset % 8)) != 0)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(false),
        }
    }

    async fn bitcount(&self, key: &str) -> StoreResult<u64> {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, key);
        match keyspace.get(key) {
            Some(Slot {
                value: Value::Bits(bytes),
                ..
            }) => Ok(bytes.iter().map(|b| b.count_ones() as u64).sum()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(0),
        }
    }

    async fn xgroup_create(&self, stream: &str, group: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, stream);
        let slot = keyspace
            .entry(stream.to_string())
            .or_insert_with(|| Slot::persistent(Value::Stream(Stream::default())));
        let s = as_stream(slot, stream)?;
        if s.groups.contains_key(group) {
            return Ok(false);
        }
        s.groups.insert(group.to_string(), Group::default());
        Ok(true)
    }

    async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> StoreResult<String> {
        let id = {
            let mut keyspace = self.keyspace.lock();
            purge(&mut keyspace, stream);
            append(&mut keyspace, stream, fields)?
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn xread_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        from: ReadFrom,
        count: usize,
        block: Option<Duration>,
    ) -> StoreResult<Vec<StreamEntry>> {
        let deadline = block.map(|wait| Instant::now() + wait);
        loop {
            // Register interest before reading so an append between the read
            // and the wait is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.read_group_once(stream, group, consumer, from, count)?;
            if !batch.is_empty() || from == ReadFrom::Pending {
                return Ok(batch);
            }
            let Some(deadline) = deadline else {
                return Ok(batch);
            };
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn xack(&self, stream: &str, group: &str, ids: &[String]) -> StoreResult<u64> {
        let mut keyspace = self.keyspace.lock();
        purge(&mut keyspace, stream);
        let Some(slot) = keyspace.get_mut(stream) else {
            return Ok(0);
        };
        let s = as_stream(slot, stream)?;
        let Some(g) = s.groups.get_mut(group) else {
            return Ok(0);
        };
        let acked = ids
            .iter()
            .filter_map(|id| EntryId::parse(id))
            .filter(|id| g.pending.remove(id).is_some())
            .count();
        Ok(acked as u64)
    }
}

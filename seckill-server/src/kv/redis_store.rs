//! Redis backend

use super::{KvStore, ReadFrom, StoreError, StoreResult, StoreScript, StreamEntry};
use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use redis::streams::StreamReadReply;
use std::time::Duration;

/// [`KvStore`] over a Redis server
///
/// Two multiplexed connections: blocking stream reads park their connection
/// for the whole block window, so they get one of their own.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    blocking: ConnectionManager,
    unlock: Script,
    seckill: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to `redis://host:port/db`
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        let blocking = ConnectionManager::new(client).await?;
        tracing::info!("Connected to redis at {}", url);
        Ok(Self {
            conn,
            blocking,
            unlock: Script::new(StoreScript::Unlock.source()),
            seckill: Script::new(StoreScript::Seckill.source()),
        })
    }

    fn script(&self, script: StoreScript) -> &Script {
        match script {
            StoreScript::Unlock => &self.unlock,
            StoreScript::Seckill => &self.seckill,
        }
    }
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn eval(&self, script: StoreScript, keys: &[String], args: &[String]) -> StoreResult<i64> {
        if keys.len() != script.key_count() || args.len() != script.arg_count() {
            return Err(StoreError::Script {
                script: script.name(),
                reason: format!("expected {} keys and {} args", script.key_count(), script.arg_count()),
            });
        }
        let mut conn = self.conn.clone();
        let mut invocation = self.script(script).prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }
        let reply: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(reply)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let added: u64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(added > 0)
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        let mut conn = self.conn.clone();
        let score: Option<f64> = redis::cmd("ZSCORE").arg(key).arg(member).query_async(&mut conn).await?;
        Ok(score)
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("ZREM").arg(key).arg(member).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn setbit(&self, key: &str, offset: u64, value: bool) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let previous: u8 = redis::cmd("SETBIT")
            .arg(key)
            .arg(offset)
            .arg(u8::from(value))
            .query_async(&mut conn)
            .await?;
        Ok(previous == 1)
    }

    async fn getbit(&self, key: &str, offset: u64) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let bit: u8 = redis::cmd("GETBIT").arg(key).arg(offset).query_async(&mut conn).await?;
        Ok(bit == 1)
    }

    async fn bitcount(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("BITCOUNT").arg(key).query_async(&mut conn).await?;
        Ok(count)
    }

    async fn xgroup_create(&self, stream: &str, group: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> StoreResult<String> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (name, value) in fields {
            cmd.arg(name).arg(value);
        }
        let id: String = cmd.query_async(&mut conn).await?;
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
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count);
        let block = match from {
            ReadFrom::New => block,
            ReadFrom::Pending => None,
        };
        if let Some(wait) = block {
            cmd.arg("BLOCK").arg(millis(wait));
        }
        let start = match from {
            ReadFrom::New => ">",
            ReadFrom::Pending => "0",
        };
        cmd.arg("STREAMS").arg(stream).arg(start);

        let mut conn = if block.is_some() {
            self.blocking.clone()
        } else {
            self.conn.clone()
        };
        let reply: Option<StreamReadReply> = match cmd.query_async(&mut conn).await {
            Ok(reply) => reply,
            Err(e) if e.code() == Some("NOGROUP") => {
                return Err(StoreError::NoGroup {
                    stream: stream.to_string(),
                    group: group.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for id in key.ids {
                let mut fields = std::collections::HashMap::with_capacity(id.map.len());
                for (name, value) in &id.map {
                    let value: String = redis::from_redis_value(value)?;
                    fields.insert(name.clone(), value);
                }
                entries.push(StreamEntry { id: id.id, fields });
            }
        }
        Ok(entries)
    }

    async fn xack(&self, stream: &str, group: &str, ids: &[String]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group);
        for id in ids {
            cmd.arg(id);
        }
        let acked: u64 = cmd.query_async(&mut conn).await?;
        Ok(acked)
    }
}

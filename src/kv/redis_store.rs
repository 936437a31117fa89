//! Redis-backed implementation of the KV contract.
//!
//! Four `ConnectionManager`s, one per logical database, mirror the original
//! system's habit of opening a distinct client per `SELECT`ed DB index
//! rather than switching DBs on a shared connection mid-request. Each
//! manager reconnects on its own if the connection drops, so a transient
//! Redis blip degrades to `CacheError` for the in-flight request rather than
//! poisoning later ones.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{KvDb, KvStore, Ttl};
use crate::error::ProxyResult;

pub struct RedisKv {
    cache: ConnectionManager,
    whitelist: ConnectionManager,
    blacklist: ConnectionManager,
    observability: ConnectionManager,
}

impl RedisKv {
    /// `base_url` is a `redis://host:port` URL without a DB segment; each
    /// logical database is addressed by appending `/<index>`.
    pub async fn connect(base_url: &str) -> ProxyResult<Self> {
        async fn manager_for(base_url: &str, db: KvDb) -> ProxyResult<ConnectionManager> {
            let url = format!("{}/{}", base_url.trim_end_matches('/'), db as u8);
            let client = redis::Client::open(url)?;
            Ok(client.get_connection_manager().await?)
        }

        Ok(Self {
            cache: manager_for(base_url, KvDb::Cache).await?,
            whitelist: manager_for(base_url, KvDb::Whitelist).await?,
            blacklist: manager_for(base_url, KvDb::Blacklist).await?,
            observability: manager_for(base_url, KvDb::Observability).await?,
        })
    }

    fn conn(&self, db: KvDb) -> ConnectionManager {
        match db {
            KvDb::Cache => self.cache.clone(),
            KvDb::Whitelist => self.whitelist.clone(),
            KvDb::Blacklist => self.blacklist.clone(),
            KvDb::Observability => self.observability.clone(),
        }
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn set(&self, db: KvDb, key: &str, value: &str, ttl: Ttl) -> ProxyResult<()> {
        let mut conn = self.conn(db);
        match ttl.seconds() {
            -1 => conn.set::<_, _, ()>(key, value).await?,
            secs => {
                conn.set_ex::<_, _, ()>(key, value, secs as u64).await?;
            }
        }
        Ok(())
    }

    async fn get(&self, db: KvDb, key: &str) -> ProxyResult<Option<String>> {
        let mut conn = self.conn(db);
        Ok(conn.get(key).await?)
    }

    async fn del(&self, db: KvDb, key: &str) -> ProxyResult<()> {
        let mut conn = self.conn(db);
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn keys(&self, db: KvDb, pattern: &str) -> ProxyResult<Vec<String>> {
        let mut conn = self.conn(db);
        Ok(conn.keys(pattern).await?)
    }

    async fn scan(&self, db: KvDb, pattern: &str) -> ProxyResult<Vec<String>> {
        let mut conn = self.conn(db);
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            out.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(out)
    }

    async fn rename(&self, db: KvDb, old: &str, new: &str) -> ProxyResult<()> {
        let mut conn = self.conn(db);
        conn.rename::<_, _, ()>(old, new).await?;
        Ok(())
    }

    async fn flushdb(&self, db: KvDb) -> ProxyResult<()> {
        let mut conn = self.conn(db);
        redis::cmd("FLUSHDB")
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

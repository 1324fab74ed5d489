//! Set-backed cross-ledger cache.
//!
//! Two logical structures anchor the whole engine: `publishedEvents:<chainId>`
//! sets recording which ledgers are known to carry a global id, and the
//! `notifiedEvents` set recording which ids the consumer has already been
//! notified for. Everything the engine guarantees about termination of cyclic
//! event flows and at-most-once consumer delivery reduces to membership in
//! these sets.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use displaydoc::Display;
use ied_types::{CacheStats, ChainId, EngineError, GlobalId};
use parking_lot::RwLock;
use redis::{aio::ConnectionManager, AsyncCommands};

/// Key of the consumer-notification set.
pub const NOTIFIED_KEY: &str = "notifiedEvents";

/// Key of the published set for one chain.
pub fn published_key(chain: &ChainId) -> String {
    format!("publishedEvents:{chain}")
}

/// cache backend unavailable: {0}
#[derive(Debug, Display)]
pub struct CacheError(pub String);

impl std::error::Error for CacheError {}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self(err.to_string())
    }
}

impl From<CacheError> for EngineError {
    fn from(err: CacheError) -> Self {
        EngineError::CacheUnavailable(err.0)
    }
}

/// The cache contract the engine is written against.
///
/// All operations are plain set-membership primitives; no compound
/// transactions. Sibling engine instances share the same backing store and
/// race benignly on `mark_published`: the add is idempotent, so the worst
/// outcome of a lost race is one redundant publication, never an inconsistent
/// set.
#[async_trait]
pub trait EventCache: Send + Sync + 'static {
    /// Record that `chain` has accepted `id`. Idempotent set-add.
    async fn mark_published(&self, chain: &ChainId, id: &GlobalId) -> Result<(), CacheError>;

    async fn is_on_chain(&self, chain: &ChainId, id: &GlobalId) -> Result<bool, CacheError>;

    /// Record that the consumer has been notified for `id`.
    async fn mark_notified(&self, id: &GlobalId) -> Result<(), CacheError>;

    async fn is_notified(&self, id: &GlobalId) -> Result<bool, CacheError>;

    /// Per-chain cardinalities and the size of the notified set.
    async fn stats(&self, chains: &[ChainId]) -> Result<CacheStats, CacheError>;

    /// Liveness probe of the backing store.
    async fn healthy(&self) -> bool;

    /// Every chain in `chains` that has not recorded `id`.
    ///
    /// N independent membership checks. A sibling engine may add members
    /// between checks; that only shrinks the set a caller ends up acting on.
    async fn missing_chains(
        &self,
        id: &GlobalId,
        chains: &[ChainId],
    ) -> Result<Vec<ChainId>, CacheError> {
        let mut missing = Vec::new();
        for chain in chains {
            if !self.is_on_chain(chain, id).await? {
                missing.push(chain.clone());
            }
        }
        Ok(missing)
    }
}

/// Connection parameters of the production Redis backend.
#[derive(Clone, Debug)]
pub struct RedisOptions {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

/// Production cache over Redis sets.
#[derive(Clone)]
pub struct RedisEventCache {
    conn: ConnectionManager,
}

impl RedisEventCache {
    /// Connect eagerly so startup fails fast when Redis is unreachable.
    pub async fn connect(opt: &RedisOptions) -> Result<Self, CacheError> {
        let info = redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(opt.host.clone(), opt.port),
            redis: redis::RedisConnectionInfo {
                db: opt.db,
                username: None,
                password: opt.password.clone(),
                ..Default::default()
            },
        };
        let client = redis::Client::open(info)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl EventCache for RedisEventCache {
    async fn mark_published(&self, chain: &ChainId, id: &GlobalId) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.sadd(published_key(chain), id.as_str()).await?;
        Ok(())
    }

    async fn is_on_chain(&self, chain: &ChainId, id: &GlobalId) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(published_key(chain), id.as_str()).await?)
    }

    async fn mark_notified(&self, id: &GlobalId) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.sadd(NOTIFIED_KEY, id.as_str()).await?;
        Ok(())
    }

    async fn is_notified(&self, id: &GlobalId) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(NOTIFIED_KEY, id.as_str()).await?)
    }

    async fn stats(&self, chains: &[ChainId]) -> Result<CacheStats, CacheError> {
        let mut conn = self.conn.clone();
        let mut stats = CacheStats::default();
        for chain in chains {
            let size: u64 = conn.scard(published_key(chain)).await?;
            stats.published.insert(chain.clone(), size);
        }
        stats.notified = conn.scard(NOTIFIED_KEY).await?;
        Ok(stats)
    }

    async fn healthy(&self) -> bool {
        let mut conn = self.conn.clone();
        conn.scard::<_, u64>(NOTIFIED_KEY).await.is_ok()
    }
}

/// In-process cache used by tests and by development mode when Redis is
/// unreachable. Same semantics as the Redis backend, scoped to one process.
#[derive(Debug, Default)]
pub struct MemoryEventCache {
    published: RwLock<HashMap<ChainId, HashSet<GlobalId>>>,
    notified: RwLock<HashSet<GlobalId>>,
}

#[async_trait]
impl EventCache for MemoryEventCache {
    async fn mark_published(&self, chain: &ChainId, id: &GlobalId) -> Result<(), CacheError> {
        self.published
            .write()
            .entry(chain.clone())
            .or_default()
            .insert(id.clone());
        Ok(())
    }

    async fn is_on_chain(&self, chain: &ChainId, id: &GlobalId) -> Result<bool, CacheError> {
        Ok(self
            .published
            .read()
            .get(chain)
            .is_some_and(|set| set.contains(id)))
    }

    async fn mark_notified(&self, id: &GlobalId) -> Result<(), CacheError> {
        self.notified.write().insert(id.clone());
        Ok(())
    }

    async fn is_notified(&self, id: &GlobalId) -> Result<bool, CacheError> {
        Ok(self.notified.read().contains(id))
    }

    async fn stats(&self, chains: &[ChainId]) -> Result<CacheStats, CacheError> {
        let published = self.published.read();
        let mut stats = CacheStats {
            notified: self.notified.read().len() as u64,
            ..Default::default()
        };
        for chain in chains {
            let size = published.get(chain).map_or(0, |set| set.len() as u64);
            stats.published.insert(chain.clone(), size);
        }
        Ok(stats)
    }

    async fn healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod test {
    use ied_utils::test_utils::setup_test;
    use pretty_assertions::assert_eq;

    use super::*;

    fn chain(id: &str) -> ChainId {
        ChainId::from(id)
    }

    #[tokio::test]
    async fn mark_published_is_idempotent() {
        setup_test();
        let cache = MemoryEventCache::default();
        let id = GlobalId::from("0xabc");

        for _ in 0..3 {
            cache.mark_published(&chain("1"), &id).await.unwrap();
        }

        assert!(cache.is_on_chain(&chain("1"), &id).await.unwrap());
        let stats = cache.stats(&[chain("1")]).await.unwrap();
        assert_eq!(stats.published[&chain("1")], 1);
    }

    #[tokio::test]
    async fn missing_chains_reports_only_unmarked_chains() {
        setup_test();
        let cache = MemoryEventCache::default();
        let id = GlobalId::from("0xabc");
        let chains = [chain("1"), chain("2"), chain("3")];

        cache.mark_published(&chain("2"), &id).await.unwrap();

        let missing = cache.missing_chains(&id, &chains).await.unwrap();
        assert_eq!(missing, vec![chain("1"), chain("3")]);

        cache.mark_published(&chain("1"), &id).await.unwrap();
        cache.mark_published(&chain("3"), &id).await.unwrap();
        assert!(cache.missing_chains(&id, &chains).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn notified_set_is_independent_of_published_sets() {
        setup_test();
        let cache = MemoryEventCache::default();
        let id = GlobalId::from("0xabc");

        assert!(!cache.is_notified(&id).await.unwrap());
        cache.mark_notified(&id).await.unwrap();
        assert!(cache.is_notified(&id).await.unwrap());
        assert!(!cache.is_on_chain(&chain("1"), &id).await.unwrap());

        let stats = cache.stats(&[chain("1")]).await.unwrap();
        assert_eq!(stats.notified, 1);
        assert_eq!(stats.published[&chain("1")], 0);
    }
}

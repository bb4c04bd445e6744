//! TTL-keyed store abstraction (KeyedStore).
//!
//! Every correctness-critical piece of state in the gateway — OTP
//! records, block/cooldown markers, send-attempt counters, delivery
//! records, rate-limit windows, cached settings — lives behind this
//! single trait. Two implementations are provided: an in-memory
//! DashMap-backed store with a sweeper task, and a Redis-backed store
//! for multi-instance deployments. Callers never see the difference.
//!
//! `KeyedStore` itself only knows about raw string payloads so that it
//! stays object-safe (`Arc<dyn KeyedStore>`); [`KeyedStoreExt`] adds
//! the typed, JSON-serializing convenience methods every caller
//! actually uses on top of it.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

/// Default capacity for fan-out channels. A slow or absent subscriber
/// never blocks a publisher (`broadcast::Sender::send` never awaits);
/// it only risks missing older messages once this many are buffered.
const FANOUT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation failed: {0}")]
    Transient(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// TTL-keyed store with atomic counters and conditional writes.
///
/// All operations are safe under unbounded concurrent access. `incr`
/// and `set_raw_if_absent` are atomic: no caller can observe a
/// read-modify-write race on either.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()>;

    /// Sets `key` to `value` with `ttl` only if it does not already
    /// exist. Returns `true` if the write happened.
    async fn set_raw_if_absent(&self, key: &str, value: String, ttl: Duration) -> StoreResult<bool>;

    /// Atomically increments the integer counter at `key` (0 if absent)
    /// and returns the new value. Does not itself apply a TTL; callers
    /// that want a fixed window call `expire` after the first increment.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    /// Remaining time-to-live for `key`, or `None` if absent/no TTL.
    async fn pttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    async fn del(&self, key: &str) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Publishes `payload` to `channel`. Delivery-receipt fan-out (C1)
    /// is the only current user; publishing to a channel with no
    /// subscribers is a no-op, never an error.
    async fn publish(&self, channel: &str, payload: String) -> StoreResult<()>;

    /// Subscribes to `channel`, returning a receiver that observes
    /// every subsequent `publish`. Messages published before this call
    /// are not replayed.
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String>;
}

/// Typed convenience layer over [`KeyedStore`]. Blanket-implemented for
/// every store (including `dyn KeyedStore`) so callers work with
/// structs directly instead of hand-rolling JSON at every call site.
#[async_trait]
pub trait KeyedStoreExt: KeyedStore {
    async fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get_raw(key).await? {
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| StoreError::Transient(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> StoreResult<()> {
        let raw = serde_json::to_string(value).map_err(|e| StoreError::Transient(e.to_string()))?;
        self.set_raw(key, raw, ttl).await
    }

    async fn set_if_absent<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> StoreResult<bool> {
        let raw = serde_json::to_string(value).map_err(|e| StoreError::Transient(e.to_string()))?;
        self.set_raw_if_absent(key, raw, ttl).await
    }
}

impl<S: KeyedStore + ?Sized> KeyedStoreExt for S {}

struct Entry {
    payload: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory `KeyedStore` for single-instance deployments and tests.
///
/// A background sweeper evicts expired entries on an interval; the
/// read path also checks expiry defensively so a key is never
/// observable past its TTL even between sweeps.
pub struct InMemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_sweep_interval(Duration::from_secs(5))
    }

    pub fn with_sweep_interval(interval: Duration) -> Self {
        let entries: Arc<DashMap<String, Entry>> = Arc::new(DashMap::new());
        let sweep_entries = entries.clone();
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                sweep_entries.retain(|_, entry| !entry.is_expired());
            }
        });

        Self { entries, channels: Arc::new(DashMap::new()), sweeper }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InMemoryStore {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

#[async_trait]
impl KeyedStore for InMemoryStore {
    async fn get_raw(&self, key: &str) -> StoreResult<Option<String>> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.payload.clone()))
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                payload: value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_raw_if_absent(&self, key: &str, value: String, ttl: Duration) -> StoreResult<bool> {
        let mut set = false;
        self.entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.is_expired() {
                    entry.payload = value.clone();
                    entry.expires_at = Instant::now() + ttl;
                    set = true;
                }
            })
            .or_insert_with(|| {
                set = true;
                Entry {
                    payload: value,
                    expires_at: Instant::now() + ttl,
                }
            });
        Ok(set)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut new_value = 0i64;
        self.entries
            .entry(key.to_string())
            .and_modify(|entry| {
                let current: i64 = if entry.is_expired() { 0 } else { entry.payload.parse().unwrap_or(0) };
                new_value = current + 1;
                entry.payload = new_value.to_string();
                if entry.is_expired() {
                    // No TTL survives expiry; give it a generous default
                    // until the caller calls `expire` explicitly.
                    entry.expires_at = Instant::now() + Duration::from_secs(3600);
                }
            })
            .or_insert_with(|| {
                new_value = 1;
                Entry {
                    payload: "1".to_string(),
                    expires_at: Instant::now() + Duration::from_secs(3600),
                }
            });
        Ok(new_value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Instant::now() + ttl;
        }
        Ok(())
    }

    async fn pttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if entry.is_expired() {
            return Ok(None);
        }
        Ok(Some(entry.expires_at.saturating_duration_since(Instant::now())))
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.get(key).map(|entry| !entry.is_expired()).unwrap_or(false))
    }

    async fn publish(&self, channel: &str, payload: String) -> StoreResult<()> {
        if let Some(tx) = self.channels.get(channel) {
            // Err here only means zero receivers; not a delivery failure.
            let _ = tx.send(payload);
        }
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(FANOUT_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

/// Redis-backed `KeyedStore` for horizontally-scaled deployments.
/// Every SMSWorker and HTTP intake instance shares the same state
/// through this implementation.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await.map_err(|e| {
            warn!("redis connection error: {}", e);
            StoreError::Transient(e.to_string())
        })
    }
}

#[async_trait]
impl KeyedStore for RedisStore {
    async fn get_raw(&self, key: &str) -> StoreResult<Option<String>> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        conn.get(key).await.map_err(|e| StoreError::Transient(e.to_string()))
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        let _: () = conn
            .set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn set_raw_if_absent(&self, key: &str, value: String, ttl: Duration) -> StoreResult<bool> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        let opts = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::EX(ttl.as_secs().max(1) as usize));
        let result: Option<String> = conn
            .set_options(key, value, opts)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(result.is_some())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        conn.incr(key, 1).await.map_err(|e| StoreError::Transient(e.to_string()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        let _: bool = conn
            .expire(key, ttl.as_secs().max(1) as i64)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn pttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        let millis: i64 = conn.pttl(key).await.map_err(|e| StoreError::Transient(e.to_string()))?;
        if millis < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_millis(millis as u64)))
        }
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        let _: i64 = conn.del(key).await.map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        conn.exists(key).await.map_err(|e| StoreError::Transient(e.to_string()))
    }

    async fn publish(&self, channel: &str, payload: String) -> StoreResult<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        let _: i64 = conn.publish(channel, payload).await.map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    /// Bridges Redis's own pub/sub (so fan-out reaches every instance,
    /// not just the one that received the `publish`) onto a local
    /// `broadcast` channel so callers get the same receiver type as
    /// `InMemoryStore`. The bridging task exits quietly if the
    /// dedicated pub/sub connection cannot be established or dies.
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        let (tx, rx) = broadcast::channel(FANOUT_CHANNEL_CAPACITY);
        let client = self.client.clone();
        let channel = channel.to_string();
        tokio::spawn(async move {
            let conn = match client.get_async_connection().await {
                Ok(c) => c,
                Err(e) => {
                    warn!(%channel, error = %e, "failed to open redis pubsub connection");
                    return;
                }
            };
            let mut pubsub = conn.into_pubsub();
            if let Err(e) = pubsub.subscribe(&channel).await {
                warn!(%channel, error = %e, "failed to subscribe to redis channel");
                return;
            }
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(%channel, error = %e, "failed to decode redis pubsub payload"),
                }
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        n: u32,
    }

    #[tokio::test]
    async fn set_and_get_roundtrip() {
        let store = InMemoryStore::new();
        store.set("k1", &Sample { n: 7 }, Duration::from_secs(60)).await.unwrap();
        let got: Option<Sample> = store.get("k1").await.unwrap();
        assert_eq!(got, Some(Sample { n: 7 }));
    }

    #[tokio::test]
    async fn expired_entry_is_not_observable() {
        let store = InMemoryStore::new();
        store.set("k2", &Sample { n: 1 }, Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let got: Option<Sample> = store.get("k2").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn set_if_absent_is_atomic_per_key() {
        let store = InMemoryStore::new();
        let first = store.set_if_absent("k3", &Sample { n: 1 }, Duration::from_secs(60)).await.unwrap();
        let second = store.set_if_absent("k3", &Sample { n: 2 }, Duration::from_secs(60)).await.unwrap();
        assert!(first);
        assert!(!second);
        let got: Option<Sample> = store.get("k3").await.unwrap();
        assert_eq!(got, Some(Sample { n: 1 }));
    }

    #[tokio::test]
    async fn incr_accumulates() {
        let store = InMemoryStore::new();
        assert_eq!(store.incr("k4").await.unwrap(), 1);
        assert_eq!(store.incr("k4").await.unwrap(), 2);
        assert_eq!(store.incr("k4").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn del_removes_key() {
        let store = InMemoryStore::new();
        store.set("k5", &Sample { n: 1 }, Duration::from_secs(60)).await.unwrap();
        store.del("k5").await.unwrap();
        assert!(!store.exists("k5").await.unwrap());
    }

    #[tokio::test]
    async fn publish_reaches_an_existing_subscriber() {
        let store = InMemoryStore::new();
        let mut rx = store.subscribe("events");
        store.publish("events", "hello".to_string()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_not_an_error() {
        let store = InMemoryStore::new();
        store.publish("nobody-listening", "hi".to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn expire_updates_ttl() {
        let store = InMemoryStore::new();
        store.set("k6", &Sample { n: 1 }, Duration::from_millis(10)).await.unwrap();
        store.expire("k6", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.exists("k6").await.unwrap());
    }
}

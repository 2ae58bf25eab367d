use crate::store::{Counter, CounterStore};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::borrow::Cow;
use thiserror::Error;

const HITS_FIELD: &str = "hits";
const RESET_FIELD: &str = "reset";

/// The server answered, but rejected a command or returned an undecodable
/// value; the record is corrupt rather than the store unreachable.
fn is_corrupt_record(e: &redis::RedisError) -> bool {
    matches!(
        e.kind(),
        redis::ErrorKind::TypeError | redis::ErrorKind::ResponseError
    )
}

#[derive(Debug, Error)]
pub enum Error {
    /// The shared store could not be reached, or the call timed out.
    ///
    /// This is never mapped onto an allow or deny decision; the caller decides
    /// whether to fail open or closed.
    #[error("Shared counter store unavailable: {0}")]
    Unavailable(
        #[source]
        #[from]
        redis::RedisError,
    ),
    /// The stored record could not be decoded, even after discarding it and
    /// starting a fresh window.
    #[error("Counter record for the rate limit key is repeatedly corrupt")]
    Corrupt,
}

/// A [CounterStore] that keeps hit counters in a Redis hash per key, shared
/// across processes.
///
/// Each key maps to a hash with decimal integer fields `hits` and `reset`.
/// Expiry is delegated to Redis: the whole hash expires at the window
/// boundary, so stale keys never accumulate. A record whose `reset` has
/// nevertheless been overtaken by the caller's clock is discarded on read and
/// the window restarted.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl RedisStore {
    /// Create a RedisStoreBuilder.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use actix_window_limit::store::redis::RedisStore;
    /// # use redis::aio::ConnectionManager;
    /// # async fn example() {
    /// let client = redis::Client::open("redis://127.0.0.1/").unwrap();
    /// let manager = ConnectionManager::new(client).await.unwrap();
    /// let store = RedisStore::builder(manager).build();
    /// # };
    /// ```
    pub fn builder(connection: ConnectionManager) -> Builder {
        Builder {
            connection,
            key_prefix: None,
        }
    }

    fn make_key<'t>(&self, key: &'t str) -> Cow<'t, str> {
        match &self.key_prefix {
            None => Cow::Borrowed(key),
            Some(prefix) => Cow::Owned(format!("{prefix}{key}")),
        }
    }

    /// One atomic create-or-increment pass. Returns the hit count and the
    /// stored window end, which is None if the `reset` field does not decode
    /// as an integer.
    async fn try_record(
        &self,
        con: &mut ConnectionManager,
        key: &str,
        window_end: u64,
    ) -> Result<(u64, Option<u64>), redis::RedisError> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            // Establish the window boundary if this is the first hit of the window
            .cmd("HSETNX")
            .arg(key)
            .arg(RESET_FIELD)
            .arg(window_end)
            .ignore()
            // Count the hit
            .cmd("HINCRBY")
            .arg(key)
            .arg(HITS_FIELD)
            .arg(1)
            // Read back the boundary actually in effect
            .cmd("HGET")
            .arg(key)
            .arg(RESET_FIELD)
            // Let Redis expire the whole hash at the window boundary (only if
            // the key doesn't already have a deadline)
            .cmd("EXPIREAT")
            .arg(key)
            .arg(window_end)
            .arg("NX")
            .ignore();
        let (hits, reset): (u64, String) = pipe.query_async(con).await?;
        Ok((hits, reset.parse().ok()))
    }
}

pub struct Builder {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl Builder {
    /// Apply an optional prefix to all rate limit keys given to this store.
    ///
    /// This may be useful when the Redis instance is being used for other
    /// purposes; the prefix is used as a 'namespace' to avoid collision with
    /// other caches or keys inside Redis.
    pub fn key_prefix(mut self, key_prefix: Option<&str>) -> Self {
        self.key_prefix = key_prefix.map(ToOwned::to_owned);
        self
    }

    pub fn build(self) -> RedisStore {
        RedisStore {
            connection: self.connection,
            key_prefix: self.key_prefix,
        }
    }
}

impl CounterStore for RedisStore {
    type Error = Error;

    async fn record(&self, key: &str, now: u64, window_end: u64) -> Result<Counter, Error> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        for _ in 0..2 {
            let (hits, reset) = match self.try_record(&mut con, &key, window_end).await {
                Ok(result) => result,
                // A WRONGTYPE or not-an-integer response means the record is
                // corrupt, not that the store is down. Discard it and take
                // another pass with a fresh window.
                Err(e) if is_corrupt_record(&e) => {
                    let () = con.del(key.as_ref()).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            match reset {
                Some(reset) if reset > now => return Ok(Counter { hits, reset }),
                // Either the reset field is corrupt, or the native expiry has
                // not fired yet (e.g. the caller's clock ran ahead). Discard
                // the record and restart the window.
                _ => {
                    let () = con.del(key.as_ref()).await?;
                }
            }
        }
        Err(Error::Corrupt)
    }

    /// Note that the key prefix (if set) is automatically included, you do not
    /// need to prepend it yourself.
    async fn remove_key(&self, key: &str) -> Result<(), Error> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let () = con.del(key.as_ref()).await?;
        Ok(())
    }
}

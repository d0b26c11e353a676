//! Bounded pool of reference store sessions
//!
//! Lookup code never opens sessions itself. It is handed an
//! `Arc<dyn ConnectionPool>` built once at startup and borrows a
//! [`PooledConnection`] for each query. Dropping the guard parks the session
//! again, whichever way the borrower exits.
//!
//! ```rust,ignore
//! let pool = SimpleConnectionPool::new(
//!     PoolConfig::new("mysql://localhost/inventory").with_max_size(10),
//!     Arc::new(MySqlConnectionFactory),
//! ).await?;
//!
//! let row = pool.get().await?.query_one("SELECT 1", &[]).await?;
//! ```

use async_trait::async_trait;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType};
use crate::error::{Error, Result};

/// Source of borrowed sessions
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Borrow a session, waiting up to the acquire timeout
    async fn get(&self) -> Result<PooledConnection>;

    /// Take a session back; called by the [`PooledConnection`] guard
    async fn return_connection(&self, conn: Box<dyn Connection>);

    #[allow(missing_docs)]
    fn database_type(&self) -> DatabaseType;

    /// Sessions currently open, borrowed or idle
    fn size(&self) -> usize;

    #[allow(missing_docs)]
    fn stats(&self) -> PoolStats;

    /// Close idle sessions and refuse new borrows. Sessions still out are
    /// closed when they come back.
    async fn close(&self) -> Result<()>;
}

/// Borrow guard; derefs to the session
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    owner: Arc<dyn ConnectionPool>,
}

impl PooledConnection {
    /// Wrap `conn` so that it goes back to `owner` on drop
    pub fn new(conn: Box<dyn Connection>, owner: Arc<dyn ConnectionPool>) -> Self {
        Self {
            conn: Some(conn),
            owner,
        }
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        // Only Drop takes the session out.
        self.conn.as_deref().expect("session is present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let owner = Arc::clone(&self.owner);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { owner.return_connection(conn).await });
        } else {
            warn!("session released outside a tokio runtime and was discarded");
        }
    }
}

/// Sizing and timing of a [`SimpleConnectionPool`]
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How to open a session
    pub connection: ConnectionConfig,
    /// Sessions opened before the pool is returned
    pub min_size: usize,
    /// Upper bound on open sessions
    pub max_size: usize,
    /// How long `get` waits for a free slot
    pub acquire_timeout: Duration,
    /// Idle sessions older than this are closed instead of lent
    pub idle_timeout: Duration,
    /// Probe idle sessions with [`Connection::is_valid`] before lending
    pub test_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            min_size: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(10 * 60),
            test_on_borrow: true,
        }
    }
}

impl PoolConfig {
    /// Defaults around `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(url),
            ..Self::default()
        }
    }

    #[allow(missing_docs)]
    pub fn with_min_size(self, min_size: usize) -> Self {
        Self { min_size, ..self }
    }

    #[allow(missing_docs)]
    pub fn with_max_size(self, max_size: usize) -> Self {
        Self { max_size, ..self }
    }

    #[allow(missing_docs)]
    pub fn with_acquire_timeout(self, acquire_timeout: Duration) -> Self {
        Self {
            acquire_timeout,
            ..self
        }
    }

    #[allow(missing_docs)]
    pub fn with_idle_timeout(self, idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            ..self
        }
    }

    #[allow(missing_docs)]
    pub fn with_test_on_borrow(self, test_on_borrow: bool) -> Self {
        Self {
            test_on_borrow,
            ..self
        }
    }

    /// Reject an empty pool or `min_size > max_size`
    pub fn validate(&self) -> Result<()> {
        match (self.min_size, self.max_size) {
            (_, 0) => Err(Error::config("max_size must be at least 1")),
            (min, max) if min > max => Err(Error::config(format!(
                "min_size ({min}) exceeds max_size ({max})"
            ))),
            _ => Ok(()),
        }
    }
}

/// Lifetime counters of a pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Sessions opened
    pub connections_created: u64,
    /// Sessions closed or discarded
    pub connections_closed: u64,
    /// Successful borrows
    pub acquisitions: u64,
    /// Sessions handed back
    pub returns: u64,
    /// Borrows that gave up waiting
    pub exhausted_count: u64,
    /// Idle sessions that failed the borrow probe
    pub health_check_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    closed: AtomicU64,
    acquired: AtomicU64,
    returned: AtomicU64,
    exhausted: AtomicU64,
    failed_probes: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolStats {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PoolStats {
            connections_created: read(&self.created),
            connections_closed: read(&self.closed),
            acquisitions: read(&self.acquired),
            returns: read(&self.returned),
            exhausted_count: read(&self.exhausted),
            health_check_failures: read(&self.failed_probes),
        }
    }
}

struct Parked {
    conn: Box<dyn Connection>,
    since: Instant,
}

impl Parked {
    fn now(conn: Box<dyn Connection>) -> Self {
        Self {
            conn,
            since: Instant::now(),
        }
    }
}

/// Pool bounded by a semaphore of `max_size` permits.
///
/// A borrower holds one permit for as long as it holds the session. Idle
/// sessions are reused most-recently-parked first; expired ones and, with
/// `test_on_borrow`, dead ones are closed and skipped.
pub struct SimpleConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    parked: Mutex<Vec<Parked>>,
    slots: Semaphore,
    open: AtomicUsize,
    counters: Counters,
    closed: AtomicBool,
    this: OnceCell<Weak<Self>>,
}

impl SimpleConnectionPool {
    /// Validate `config` and open `min_size` sessions.
    ///
    /// An unreachable store therefore fails here, at startup, rather than on
    /// the first lookup.
    pub async fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Arc<Self>> {
        config.validate()?;

        let pool = Arc::new(Self {
            slots: Semaphore::new(config.max_size),
            parked: Mutex::new(Vec::with_capacity(config.max_size)),
            config,
            factory,
            open: AtomicUsize::new(0),
            counters: Counters::default(),
            closed: AtomicBool::new(false),
            this: OnceCell::new(),
        });
        // Freshly created, so the cell is empty.
        let _ = pool.this.set(Arc::downgrade(&pool));

        let mut warm = Vec::with_capacity(pool.config.min_size);
        for _ in 0..pool.config.min_size {
            warm.push(Parked::now(pool.open_session().await?));
        }
        pool.parked.lock().await.extend(warm);

        debug!(
            database = %pool.factory.database_type(),
            min_size = pool.config.min_size,
            max_size = pool.config.max_size,
            "connection pool opened"
        );
        Ok(pool)
    }

    #[allow(missing_docs)]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Sessions parked and ready to lend
    pub async fn idle_count(&self) -> usize {
        self.parked.lock().await.len()
    }

    async fn open_session(&self) -> Result<Box<dyn Connection>> {
        let limit = Duration::from_millis(self.config.connection.connect_timeout_ms);
        let conn = match tokio::time::timeout(limit, self.factory.connect(&self.config.connection))
            .await
        {
            Ok(opened) => opened?,
            Err(_) => {
                return Err(Error::timeout(format!(
                    "no session after {}ms",
                    limit.as_millis()
                )))
            }
        };
        self.open.fetch_add(1, Ordering::AcqRel);
        Counters::bump(&self.counters.created);
        Ok(conn)
    }

    fn forget_session(&self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
        Counters::bump(&self.counters.closed);
    }

    /// Most recently parked session that is still usable
    async fn reuse_parked(&self) -> Option<Box<dyn Connection>> {
        loop {
            let Parked { conn, since } = self.parked.lock().await.pop()?;
            if since.elapsed() > self.config.idle_timeout {
                let _ = conn.close().await;
                self.forget_session();
            } else if self.config.test_on_borrow && !conn.is_valid().await {
                self.forget_session();
                Counters::bump(&self.counters.failed_probes);
            } else {
                return Some(conn);
            }
        }
    }

    fn refused() -> Error {
        Error::pool_exhausted("pool is closed")
    }
}

#[async_trait]
impl ConnectionPool for SimpleConnectionPool {
    async fn get(&self) -> Result<PooledConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Self::refused());
        }

        let waited = tokio::time::timeout(self.config.acquire_timeout, self.slots.acquire()).await;
        let Ok(acquired) = waited else {
            Counters::bump(&self.counters.exhausted);
            return Err(Error::pool_exhausted(format!(
                "all {} sessions busy for {}ms",
                self.config.max_size,
                self.config.acquire_timeout.as_millis()
            )));
        };
        let permit = acquired.map_err(|_| Self::refused())?;

        // An error below drops `permit` and frees the slot.
        let conn = match self.reuse_parked().await {
            Some(conn) => conn,
            None => self.open_session().await?,
        };
        let owner: Arc<dyn ConnectionPool> = self
            .this
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(Self::refused)?;

        Counters::bump(&self.counters.acquired);
        // Restored by return_connection.
        permit.forget();
        Ok(PooledConnection::new(conn, owner))
    }

    async fn return_connection(&self, conn: Box<dyn Connection>) {
        Counters::bump(&self.counters.returned);
        if self.closed.load(Ordering::Acquire) {
            let _ = conn.close().await;
            self.forget_session();
        } else {
            self.parked.lock().await.push(Parked::now(conn));
        }
        self.slots.add_permits(1);
    }

    fn database_type(&self) -> DatabaseType {
        self.factory.database_type()
    }

    fn size(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let parked = std::mem::take(&mut *self.parked.lock().await);
        for Parked { conn, .. } in parked {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "closing pooled session failed");
            }
            self.forget_session();
        }

        debug!(still_borrowed = self.size(), "connection pool closed");
        Ok(())
    }
}

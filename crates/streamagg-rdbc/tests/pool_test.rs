//! Pool behaviour against an in-memory connection factory

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use streamagg_rdbc::prelude::*;

#[derive(Default)]
struct CountingFactory {
    opened: AtomicUsize,
    refuse: AtomicBool,
}

struct StubConnection {
    valid: bool,
}

#[async_trait]
impl Connection for StubConnection {
    async fn query(&self, _sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        Ok(vec![Row::new(vec!["id".into()], params.to_vec())])
    }

    async fn is_valid(&self) -> bool {
        self.valid
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ConnectionFactory for CountingFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::connection("connection refused"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubConnection { valid: true }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Unknown
    }
}

async fn wait_for_idle(pool: &SimpleConnectionPool, expected: usize) {
    for _ in 0..100 {
        if pool.idle_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("pool never reached {expected} idle connections");
}

fn config(max: usize) -> PoolConfig {
    PoolConfig::new("memory://inventory")
        .with_min_size(1)
        .with_max_size(max)
        .with_acquire_timeout(Duration::from_millis(50))
}

#[tokio::test]
async fn test_connection_is_returned_on_drop() {
    let factory = Arc::new(CountingFactory::default());
    let pool = SimpleConnectionPool::new(config(2), factory.clone())
        .await
        .unwrap();
    assert_eq!(pool.idle_count().await, 1);

    {
        let conn = pool.get().await.unwrap();
        let row = conn.query_one("SELECT ?", &[Value::Int64(7)]).await.unwrap();
        assert_eq!(row.unwrap().try_i64("id").unwrap(), 7);
        assert_eq!(pool.idle_count().await, 0);
    }

    wait_for_idle(&pool, 1).await;
    let stats = pool.stats();
    assert_eq!(stats.acquisitions, 1);
    assert_eq!(stats.returns, 1);
    // The eager connection was reused
    assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_acquire_times_out_when_exhausted() {
    let factory = Arc::new(CountingFactory::default());
    let pool = SimpleConnectionPool::new(config(1), factory).await.unwrap();

    let _held = pool.get().await.unwrap();
    let err = match pool.get().await {
        Err(e) => e,
        Ok(_) => panic!("second borrow should time out"),
    };
    assert_eq!(err.category(), ErrorCategory::PoolExhausted);
    assert!(err.is_retriable());
    assert_eq!(pool.stats().exhausted_count, 1);
}

#[tokio::test]
async fn test_grows_up_to_max_size() {
    let factory = Arc::new(CountingFactory::default());
    let pool = SimpleConnectionPool::new(config(3), factory.clone())
        .await
        .unwrap();

    let a = pool.get().await.unwrap();
    let b = pool.get().await.unwrap();
    let c = pool.get().await.unwrap();
    assert_eq!(pool.size(), 3);
    assert_eq!(factory.opened.load(Ordering::SeqCst), 3);

    drop((a, b, c));
    wait_for_idle(&pool, 3).await;
}

#[tokio::test]
async fn test_startup_fails_when_store_unreachable() {
    let factory = Arc::new(CountingFactory::default());
    factory.refuse.store(true, Ordering::SeqCst);

    let err = match SimpleConnectionPool::new(config(2), factory).await {
        Err(e) => e,
        Ok(_) => panic!("pool should not open"),
    };
    assert_eq!(err.category(), ErrorCategory::Connection);
}

#[tokio::test]
async fn test_closed_pool_refuses_borrows() {
    let factory = Arc::new(CountingFactory::default());
    let pool = SimpleConnectionPool::new(config(2), factory).await.unwrap();

    pool.close().await.unwrap();
    assert_eq!(pool.idle_count().await, 0);
    assert_eq!(pool.size(), 0);

    let err = match pool.get().await {
        Err(e) => e,
        Ok(_) => panic!("closed pool handed out a connection"),
    };
    assert_eq!(err.category(), ErrorCategory::PoolExhausted);

    // Closing twice is harmless
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_idle_connection_is_replaced() {
    struct FlakyFactory {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionFactory for FlakyFactory {
        async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
            // First connection reports itself broken
            let n = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubConnection { valid: n > 0 }))
        }

        fn database_type(&self) -> DatabaseType {
            DatabaseType::Unknown
        }
    }

    let factory = Arc::new(FlakyFactory {
        opened: AtomicUsize::new(0),
    });
    let pool = SimpleConnectionPool::new(config(2), factory.clone())
        .await
        .unwrap();

    let conn = pool.get().await.unwrap();
    assert!(conn.is_valid().await);
    assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
    assert_eq!(pool.stats().health_check_failures, 1);
}

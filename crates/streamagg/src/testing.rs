//! Testing utilities
//!
//! In-memory stand-ins for the reference store and the change stream, so
//! the pipeline can be exercised without MySQL or Kafka.
//!
//! # Example
//!
//! ```rust,ignore
//! use streamagg::testing::*;
//!
//! let store = MockReferenceStore::new();
//! store.insert_product(product(10, "Widget"));
//! let pool = store.pool().await?;
//! let gateway = LookupGateway::new(pool);
//!
//! assert_eq!(gateway.product(10).await?.map(|p| p.name), Some("Widget".into()));
//! assert_eq!(store.product_queries(), 1);
//! ```

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamagg_cdc::{ChangeEnvelope, StreamPosition};
use streamagg_rdbc::prelude::{
    Connection, ConnectionConfig, ConnectionFactory, ConnectionPool, DatabaseType, PoolConfig,
    Row, SimpleConnectionPool, Value,
};

use crate::error::Result;
use crate::lookup::ReferenceKind;
use crate::model::{ChangeKey, Customer, OrderEntity, Product};
use crate::source::RawRecord;

// ============================================================================
// Mock reference store
// ============================================================================

/// In-memory `products` and `customers` tables.
///
/// Counts the queries it answers and can be told to fail or to answer
/// slowly.
#[derive(Debug, Default)]
pub struct MockReferenceStore {
    products: RwLock<HashMap<i64, Product>>,
    customers: RwLock<HashMap<i64, Customer>>,
    product_queries: AtomicUsize,
    customer_queries: AtomicUsize,
    connections_opened: AtomicUsize,
    fail_queries: AtomicBool,
    refuse_connections: AtomicBool,
    delay_ms: AtomicU64,
}

impl MockReferenceStore {
    /// Create an empty store
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add or replace a product
    pub fn insert_product(&self, product: Product) {
        self.products.write().insert(product.id, product);
    }

    /// Add or replace a customer
    pub fn insert_customer(&self, customer: Customer) {
        self.customers.write().insert(customer.id, customer);
    }

    /// Remove a product
    pub fn remove_product(&self, id: i64) -> Option<Product> {
        self.products.write().remove(&id)
    }

    /// Queries answered against `products`
    pub fn product_queries(&self) -> usize {
        self.product_queries.load(Ordering::SeqCst)
    }

    /// Queries answered against `customers`
    pub fn customer_queries(&self) -> usize {
        self.customer_queries.load(Ordering::SeqCst)
    }

    /// Physical connections opened so far
    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::SeqCst)
    }

    /// Make every query fail as if the server had gone away
    pub fn set_failing(&self, failing: bool) {
        self.fail_queries.store(failing, Ordering::SeqCst);
    }

    /// Refuse new connections
    pub fn set_refusing(&self, refusing: bool) {
        self.refuse_connections.store(refusing, Ordering::SeqCst);
    }

    /// Delay every query
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Connection factory backed by this store
    pub fn factory(self: &Arc<Self>) -> Arc<dyn ConnectionFactory> {
        Arc::new(MockConnectionFactory {
            store: self.clone(),
        })
    }

    /// Pool of up to four connections backed by this store
    pub async fn pool(self: &Arc<Self>) -> streamagg_rdbc::Result<Arc<dyn ConnectionPool>> {
        let config = PoolConfig::new("memory://reference").with_max_size(4);
        let pool: Arc<dyn ConnectionPool> =
            SimpleConnectionPool::new(config, self.factory()).await?;
        Ok(pool)
    }

    fn answer(&self, sql: &str, params: &[Value]) -> streamagg_rdbc::Result<Vec<Row>> {
        let id = params
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| streamagg_rdbc::Error::query(format!("missing id parameter: {sql}")))?;

        if sql.contains(ReferenceKind::Product.table()) {
            self.product_queries.fetch_add(1, Ordering::SeqCst);
            let rows = self.products.read().get(&id).map(product_row);
            Ok(rows.into_iter().collect())
        } else if sql.contains(ReferenceKind::Customer.table()) {
            self.customer_queries.fetch_add(1, Ordering::SeqCst);
            let rows = self.customers.read().get(&id).map(customer_row);
            Ok(rows.into_iter().collect())
        } else {
            Err(streamagg_rdbc::Error::query(format!("unknown table: {sql}")))
        }
    }
}

fn columns(kind: ReferenceKind) -> Vec<String> {
    kind.columns().iter().map(|c| c.to_string()).collect()
}

fn product_row(p: &Product) -> Row {
    Row::new(
        columns(ReferenceKind::Product),
        vec![
            Value::Int64(p.id),
            Value::from(p.name.as_str()),
            Value::from(p.description.clone()),
            Value::from(p.weight),
        ],
    )
}

fn customer_row(c: &Customer) -> Row {
    Row::new(
        columns(ReferenceKind::Customer),
        vec![
            Value::Int64(c.id),
            Value::from(c.first_name.as_str()),
            Value::from(c.last_name.as_str()),
            Value::from(c.email.as_str()),
        ],
    )
}

struct MockConnectionFactory {
    store: Arc<MockReferenceStore>,
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(
        &self,
        _config: &ConnectionConfig,
    ) -> streamagg_rdbc::Result<Box<dyn Connection>> {
        if self.store.refuse_connections.load(Ordering::SeqCst) {
            return Err(streamagg_rdbc::Error::connection("connection refused"));
        }
        self.store.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            store: self.store.clone(),
        }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Unknown
    }
}

struct MockConnection {
    store: Arc<MockReferenceStore>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> streamagg_rdbc::Result<Vec<Row>> {
        let delay = self.store.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.store.fail_queries.load(Ordering::SeqCst) {
            return Err(streamagg_rdbc::Error::query("server has gone away"));
        }
        self.store.answer(sql, params)
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> streamagg_rdbc::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Product with the given id and name
pub fn product(id: i64, name: &str) -> Product {
    Product {
        id,
        name: name.to_string(),
        description: Some(format!("{name} description")),
        weight: Some(1.5),
    }
}

/// Customer with the given id and name
pub fn customer(id: i64, first_name: &str, last_name: &str) -> Customer {
    Customer {
        id,
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email: format!("{}@example.com", first_name.to_lowercase()),
    }
}

/// Order row image
pub fn order(
    id: i64,
    purchaser: Option<i64>,
    product_id: Option<i64>,
    quantity: i64,
    order_date: i64,
) -> OrderEntity {
    OrderEntity {
        id,
        purchaser,
        product_id,
        quantity,
        order_date,
    }
}

// ============================================================================
// Change stream
// ============================================================================

/// Builds Debezium-encoded records for one partition, numbering offsets
/// from zero.
#[derive(Debug, Default)]
pub struct ChangeStreamBuilder {
    partition: i32,
    records: Vec<RawRecord>,
    wrap_schema: bool,
}

impl ChangeStreamBuilder {
    /// Records for partition 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Records for another partition
    pub fn for_partition(partition: i32) -> Self {
        Self {
            partition,
            ..Self::default()
        }
    }

    /// Wrap keys and values as `{schema, payload}`
    pub fn with_schema_wrapper(mut self) -> Self {
        self.wrap_schema = true;
        self
    }

    fn push(mut self, id: i64, value: Option<Vec<u8>>) -> Self {
        let key = self.encode(&ChangeKey::new(id));
        let position = StreamPosition::new(self.partition, self.records.len() as i64);
        self.records.push(RawRecord::new(Some(key), value, position));
        self
    }

    fn encode<T: serde::Serialize>(&self, payload: &T) -> Vec<u8> {
        let payload = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
        let doc = if self.wrap_schema {
            let mut wrapped = serde_json::Map::new();
            wrapped.insert("schema".into(), serde_json::json!({ "type": "struct" }));
            wrapped.insert("payload".into(), payload);
            serde_json::Value::Object(wrapped)
        } else {
            payload
        };
        serde_json::to_vec(&doc).unwrap_or_default()
    }

    /// Snapshot read of an order
    pub fn read(self, order: OrderEntity) -> Self {
        let value = self.encode(&ChangeEnvelope::read(order.clone()));
        self.push(order.id, Some(value))
    }

    /// Insert of an order
    pub fn create(self, order: OrderEntity) -> Self {
        let value = self.encode(&ChangeEnvelope::create(order.clone()));
        self.push(order.id, Some(value))
    }

    /// Update of an order
    pub fn update(self, before: OrderEntity, after: OrderEntity) -> Self {
        let id = after.id;
        let before = serde_json::to_value(before).ok();
        let value = self.encode(&ChangeEnvelope::update(before, after));
        self.push(id, Some(value))
    }

    /// Delete of an order
    pub fn delete(self, before: OrderEntity) -> Self {
        let id = before.id;
        let value = self.encode(&ChangeEnvelope::<OrderEntity>::delete(
            serde_json::to_value(before).ok(),
        ));
        self.push(id, Some(value))
    }

    /// Delete whose `before` image carries only the primary key
    pub fn delete_key_only(self, id: i64) -> Self {
        let before = serde_json::to_value(ChangeKey::new(id)).ok();
        let value = self.encode(&ChangeEnvelope::<OrderEntity>::delete(before));
        self.push(id, Some(value))
    }

    /// Update whose `before` image has nulls in non-key columns
    pub fn update_sparse_before(self, after: OrderEntity) -> Self {
        let id = after.id;
        let mut before = serde_json::Map::new();
        before.insert("id".into(), id.into());
        before.insert("quantity".into(), serde_json::Value::Null);
        before.insert("order_date".into(), serde_json::Value::Null);
        let before = Some(serde_json::Value::Object(before));
        let value = self.encode(&ChangeEnvelope::update(before, after));
        self.push(id, Some(value))
    }

    /// Kafka tombstone for a key
    pub fn tombstone(self, id: i64) -> Self {
        self.push(id, None)
    }

    /// A record whose value is not JSON
    pub fn garbage(self, id: i64) -> Self {
        self.push(id, Some(b"not json".to_vec()))
    }

    /// Records built so far
    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    /// Finish as a list of records
    pub fn build(self) -> Vec<RawRecord> {
        self.records
    }

    /// Finish as a finite stream
    pub fn into_stream(self) -> BoxStream<'static, Result<RawRecord>> {
        stream::iter(self.records.into_iter().map(Ok)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamagg_cdc::{ChangeCodec, ChangeOp};

    #[tokio::test]
    async fn test_store_answers_point_queries() {
        let store = MockReferenceStore::new();
        store.insert_product(product(10, "Widget"));
        let conn = store
            .factory()
            .connect(&ConnectionConfig::default())
            .await
            .unwrap();

        let sql = ReferenceKind::Product.select_by_id(DatabaseType::Unknown);
        assert_eq!(conn.query(&sql, &[Value::Int64(10)]).await.unwrap().len(), 1);
        assert!(conn.query(&sql, &[Value::Int64(11)]).await.unwrap().is_empty());
        assert_eq!(store.product_queries(), 2);
        assert_eq!(store.customer_queries(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_modes() {
        let store = MockReferenceStore::new();
        store.set_refusing(true);
        assert!(store.pool().await.is_err());

        store.set_refusing(false);
        store.set_failing(true);
        let conn = store
            .factory()
            .connect(&ConnectionConfig::default())
            .await
            .unwrap();
        let sql = ReferenceKind::Customer.select_by_id(DatabaseType::Unknown);
        assert!(conn.query(&sql, &[Value::Int64(1)]).await.is_err());
    }

    #[test]
    fn test_builder_positions_and_decoding() {
        let records = ChangeStreamBuilder::for_partition(2)
            .create(order(1, Some(5), Some(10), 2, 19000))
            .tombstone(1)
            .build();

        assert_eq!(records[1].position, StreamPosition::new(2, 1));
        assert!(records[1].value.is_none());

        let codec: ChangeCodec<ChangeKey, OrderEntity> = ChangeCodec::default();
        let decoded = codec
            .decode(
                records[0].key.as_deref(),
                records[0].value.as_deref(),
                records[0].position,
            )
            .unwrap();
        assert_eq!(decoded.key, ChangeKey::new(1));
        let envelope = decoded.envelope.unwrap();
        assert_eq!(envelope.op, ChangeOp::Create);
        assert_eq!(envelope.after.unwrap().product_id, Some(10));
    }

    #[test]
    fn test_builder_schema_wrapper() {
        let records = ChangeStreamBuilder::new()
            .with_schema_wrapper()
            .read(order(3, None, None, 1, 0))
            .build();
        let doc: serde_json::Value =
            serde_json::from_slice(records[0].value.as_deref().unwrap()).unwrap();
        assert_eq!(doc["payload"]["op"], "r");
    }
}

//! Reference lookup gateway
//!
//! Point queries by primary key against the `products` and `customers`
//! tables. Each lookup borrows one connection from the injected pool and
//! gives it back when the borrow guard drops, including on error and on
//! timeout. Nothing is cached between calls.

use std::sync::Arc;
use std::time::Duration;
use streamagg_rdbc::prelude::{ConnectionPool, DatabaseType, Row, Value};
use tracing::debug;

use crate::error::LookupError;
use crate::metrics::PipelineMetrics;
use crate::model::{Customer, Product};

/// Reference entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// `products` table
    Product,
    /// `customers` table
    Customer,
}

impl ReferenceKind {
    /// Table holding the entity
    pub const fn table(self) -> &'static str {
        match self {
            Self::Product => "products",
            Self::Customer => "customers",
        }
    }

    /// Columns read for the entity, in output order
    pub const fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Product => &["id", "name", "description", "weight"],
            Self::Customer => &["id", "first_name", "last_name", "email"],
        }
    }

    /// Point query by primary key using the backend's placeholder style
    pub fn select_by_id(self, database: DatabaseType) -> String {
        format!(
            "SELECT {} FROM {} WHERE id = {}",
            self.columns().join(", "),
            self.table(),
            database.placeholder(1)
        )
    }
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Product => write!(f, "product"),
            Self::Customer => write!(f, "customer"),
        }
    }
}

/// A fetched reference row
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    /// Product row
    Product(Product),
    /// Customer row
    Customer(Customer),
}

impl Product {
    fn from_row(row: &Row) -> streamagg_rdbc::Result<Self> {
        Ok(Self {
            id: row.try_i64("id")?,
            name: row.try_opt_string("name")?.unwrap_or_default(),
            description: row.try_opt_string("description")?,
            weight: match row.get_by_name("weight") {
                Some(Value::Null) => None,
                _ => Some(row.try_f64("weight")? as f32),
            },
        })
    }
}

impl Customer {
    fn from_row(row: &Row) -> streamagg_rdbc::Result<Self> {
        Ok(Self {
            id: row.try_i64("id")?,
            first_name: row.try_opt_string("first_name")?.unwrap_or_default(),
            last_name: row.try_opt_string("last_name")?.unwrap_or_default(),
            email: row.try_opt_string("email")?.unwrap_or_default(),
        })
    }
}

/// Keyed point lookups against the reference store
#[derive(Clone)]
pub struct LookupGateway {
    pool: Arc<dyn ConnectionPool>,
    timeout: Duration,
    product_sql: Arc<str>,
    customer_sql: Arc<str>,
    metrics: Arc<PipelineMetrics>,
}

impl std::fmt::Debug for LookupGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupGateway")
            .field("database", &self.pool.database_type())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LookupGateway {
    /// Default per-lookup deadline
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a gateway over a pool
    pub fn new(pool: Arc<dyn ConnectionPool>) -> Self {
        let database = pool.database_type();
        Self {
            pool,
            timeout: Self::DEFAULT_TIMEOUT,
            product_sql: ReferenceKind::Product.select_by_id(database).into(),
            customer_sql: ReferenceKind::Customer.select_by_id(database).into(),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Set the per-lookup deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Share a metrics registry
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Per-lookup deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch a product by id
    pub async fn product(&self, id: i64) -> Result<Option<Product>, LookupError> {
        match self.lookup(ReferenceKind::Product, id).await? {
            Some(Reference::Product(p)) => Ok(Some(p)),
            _ => Ok(None),
        }
    }

    /// Fetch a customer by id
    pub async fn customer(&self, id: i64) -> Result<Option<Customer>, LookupError> {
        match self.lookup(ReferenceKind::Customer, id).await? {
            Some(Reference::Customer(c)) => Ok(Some(c)),
            _ => Ok(None),
        }
    }

    /// Fetch one reference row by id; `Ok(None)` when no row matches
    pub async fn lookup(
        &self,
        kind: ReferenceKind,
        id: i64,
    ) -> Result<Option<Reference>, LookupError> {
        self.metrics.record_lookup();

        let result = tokio::time::timeout(self.timeout, self.query(kind, id))
            .await
            .map_err(|_| LookupError::Timeout {
                kind,
                id,
                timeout_ms: self.timeout.as_millis() as u64,
            })
            .and_then(|r| r);

        match &result {
            Ok(None) => {
                self.metrics.record_lookup_miss();
                debug!(%kind, id, "reference not found");
            }
            Ok(Some(_)) => debug!(%kind, id, "reference found"),
            Err(_) => self.metrics.record_lookup_failure(),
        }
        result
    }

    async fn query(&self, kind: ReferenceKind, id: i64) -> Result<Option<Reference>, LookupError> {
        let sql = match kind {
            ReferenceKind::Product => &*self.product_sql,
            ReferenceKind::Customer => &*self.customer_sql,
        };

        let conn = self
            .pool
            .get()
            .await
            .map_err(|source| LookupError::Connection { kind, id, source })?;

        let row = conn
            .query_one(sql, &[Value::Int64(id)])
            .await
            .map_err(|source| LookupError::Query { kind, id, source })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let decoded = match kind {
            ReferenceKind::Product => Product::from_row(&row).map(Reference::Product),
            ReferenceKind::Customer => Customer::from_row(&row).map(Reference::Customer),
        };
        decoded
            .map(Some)
            .map_err(|source| LookupError::Decode { kind, id, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_by_id() {
        assert_eq!(
            ReferenceKind::Product.select_by_id(DatabaseType::MySQL),
            "SELECT id, name, description, weight FROM products WHERE id = ?"
        );
        assert_eq!(
            ReferenceKind::Customer.select_by_id(DatabaseType::PostgreSQL),
            "SELECT id, first_name, last_name, email FROM customers WHERE id = $1"
        );
    }

    #[test]
    fn test_product_from_row() {
        let row = Row::new(
            vec!["id".into(), "name".into(), "description".into(), "weight".into()],
            vec![
                Value::Int32(10),
                Value::from("Widget"),
                Value::from("A widget"),
                Value::Float64(2.25),
            ],
        );
        let product = Product::from_row(&row).unwrap();
        assert_eq!(product.id, 10);
        assert_eq!(product.weight, Some(2.25));
        assert_eq!(product.description.as_deref(), Some("A widget"));
    }

    #[test]
    fn test_product_null_weight() {
        let row = Row::new(
            vec!["id".into(), "name".into(), "description".into(), "weight".into()],
            vec![Value::Int64(1), Value::from("x"), Value::Null, Value::Null],
        );
        let product = Product::from_row(&row).unwrap();
        assert_eq!(product.weight, None);
        assert_eq!(product.description, None);
    }

    #[test]
    fn test_customer_from_bad_row() {
        let row = Row::new(vec!["id".into()], vec![Value::from("not a number")]);
        assert!(Customer::from_row(&row).is_err());
    }
}

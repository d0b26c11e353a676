//! Enrichment of changelog updates
//!
//! Turns one `(key, Option<OrderEntity>)` update into what should be
//! published for it: an [`EnrichedOrder`], a tombstone, or nothing.

use chrono::{DateTime, Utc};
use streamagg_cdc::DeletePolicy;
use tracing::debug;

use crate::error::{EnrichError, LookupError};
use crate::lookup::LookupGateway;
use crate::model::{ChangeKey, Customer, EnrichedOrder, OrderEntity, Product};

const SECONDS_PER_DAY: i64 = 86_400;

/// Instant of UTC midnight `days` days after 1970-01-01.
///
/// `None` when the day is outside chrono's calendar range.
pub fn epoch_day_to_utc(days: i64) -> Option<DateTime<Utc>> {
    let secs = days.checked_mul(SECONDS_PER_DAY)?;
    DateTime::from_timestamp(secs, 0)
}

/// What to publish for one changelog update
#[derive(Debug, Clone, PartialEq)]
pub enum Emit {
    /// Enriched record under the update's key
    Record(EnrichedOrder),
    /// Same key, null value
    Tombstone,
    /// Nothing
    Skip,
}

/// Builds output records from changelog updates
#[derive(Debug, Clone)]
pub struct EnrichmentMapper {
    gateway: LookupGateway,
    delete_policy: DeletePolicy,
}

impl EnrichmentMapper {
    /// Create a mapper with the default delete policy
    pub fn new(gateway: LookupGateway) -> Self {
        Self {
            gateway,
            delete_policy: DeletePolicy::default(),
        }
    }

    /// Set the delete policy
    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    /// Delete policy in use
    pub fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }

    /// Map one changelog update
    pub async fn map(
        &self,
        key: &ChangeKey,
        value: Option<&OrderEntity>,
    ) -> Result<Emit, EnrichError> {
        match value {
            Some(order) => self.enrich(order).await.map(Emit::Record),
            None if self.delete_policy.emits_tombstone() => Ok(Emit::Tombstone),
            None => {
                debug!(%key, "delete dropped");
                Ok(Emit::Skip)
            }
        }
    }

    /// Join an order with its product and customer.
    ///
    /// Unset foreign keys skip their lookup. Both lookups run concurrently;
    /// if either fails no record is produced.
    pub async fn enrich(&self, order: &OrderEntity) -> Result<EnrichedOrder, EnrichError> {
        let order_date =
            epoch_day_to_utc(order.order_date).ok_or(EnrichError::InvalidOrderDate {
                order_id: order.id,
                days: order.order_date,
            })?;

        let (product, customer) =
            tokio::try_join!(self.product(order.product_id), self.customer(order.purchaser))?;

        Ok(EnrichedOrder {
            id: order.id,
            order_date,
            customer,
            quantity: order.quantity,
            product,
        })
    }

    async fn product(&self, id: Option<i64>) -> Result<Option<Product>, LookupError> {
        match id {
            Some(id) => self.gateway.product(id).await,
            None => Ok(None),
        }
    }

    async fn customer(&self, id: Option<i64>) -> Result<Option<Customer>, LookupError> {
        match id {
            Some(id) => self.gateway.customer(id).await,
            None => Ok(None),
        }
    }
}

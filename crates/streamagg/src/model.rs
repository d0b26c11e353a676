//! Domain model
//!
//! Input rows as Debezium emits them for `inventory.orders`, reference
//! entities read from `products`/`customers`, and the enriched output
//! record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key of an order record, on both the input and the output topic.
///
/// Serialized as `{"id": n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeKey {
    /// Primary key of the order row
    pub id: i64,
}

impl ChangeKey {
    /// Create a key
    pub const fn new(id: i64) -> Self {
        Self { id }
    }
}

impl std::fmt::Display for ChangeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Row image of an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEntity {
    /// Order id
    pub id: i64,
    /// Customer id (foreign key, nullable)
    #[serde(default)]
    pub purchaser: Option<i64>,
    /// Product id (foreign key, nullable)
    #[serde(default)]
    pub product_id: Option<i64>,
    /// Ordered quantity
    pub quantity: i64,
    /// Order date as days since 1970-01-01 (Debezium `io.debezium.time.Date`)
    pub order_date: i64,
}

/// Product reference row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Product id
    pub id: i64,
    /// Product name
    pub name: String,
    /// Free-form description
    pub description: Option<String>,
    /// Shipping weight
    pub weight: Option<f32>,
}

/// Customer reference row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    /// Customer id
    pub id: i64,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Contact address
    pub email: String,
}

/// Output value: an order joined with its product and customer.
///
/// ```json
/// {"id":1,"orderDate":1641600000000,"customer":{...},"quantity":2,"product":{...}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedOrder {
    /// Order id
    pub id: i64,
    /// UTC midnight of the order day, as epoch milliseconds on the wire
    #[serde(rename = "orderDate", with = "chrono::serde::ts_milliseconds")]
    pub order_date: DateTime<Utc>,
    /// Purchasing customer, `null` when unset or not found
    pub customer: Option<Customer>,
    /// Ordered quantity
    pub quantity: i64,
    /// Ordered product, `null` when unset or not found
    pub product: Option<Product>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_order_entity_from_debezium_row() {
        let order: OrderEntity = serde_json::from_value(json!({
            "id": 10001,
            "order_date": 16816,
            "purchaser": 1001,
            "quantity": 1,
            "product_id": 102
        }))
        .unwrap();
        assert_eq!(order.purchaser, Some(1001));
        assert_eq!(order.product_id, Some(102));

        let order: OrderEntity = serde_json::from_value(json!({
            "id": 1, "quantity": 1, "order_date": 0, "purchaser": null
        }))
        .unwrap();
        assert_eq!(order.purchaser, None);
        assert_eq!(order.product_id, None);
    }

    #[test]
    fn test_enriched_order_wire_format() {
        let order = EnrichedOrder {
            id: 1,
            order_date: Utc.with_ymd_and_hms(2022, 1, 8, 0, 0, 0).unwrap(),
            customer: None,
            quantity: 2,
            product: Some(Product {
                id: 10,
                name: "Widget".into(),
                description: None,
                weight: Some(1.5),
            }),
        };

        let value = serde_json::to_value(&order).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 1,
                "orderDate": 1_641_600_000_000i64,
                "customer": null,
                "quantity": 2,
                "product": {"id": 10, "name": "Widget", "description": null, "weight": 1.5}
            })
        );

        let back: EnrichedOrder = serde_json::from_value(value).unwrap();
        assert_eq!(back, order);
    }

    #[test]
    fn test_key_wire_format() {
        assert_eq!(
            serde_json::to_string(&ChangeKey::new(1)).unwrap(),
            r#"{"id":1}"#
        );
    }
}

//! PostgreSQL sessions over `tokio-postgres`
//!
//! Statements use `$n` placeholders.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::warn;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

type Param = Box<dyn ToSql + Sync + Send>;

fn encode(value: &Value) -> Param {
    match value.clone() {
        // untyped NULL; the server infers the parameter type
        Value::Null => Box::new(None::<i64>),
        Value::Bool(b) => Box::new(b),
        Value::Int16(n) => Box::new(n),
        Value::Int32(n) => Box::new(n),
        Value::Int64(n) => Box::new(n),
        Value::Float32(n) => Box::new(n),
        Value::Float64(n) => Box::new(n),
        Value::String(s) => Box::new(s),
        Value::Bytes(b) => Box::new(b),
        Value::Date(d) => Box::new(d),
        Value::DateTime(dt) => Box::new(dt),
        Value::DateTimeTz(dt) => Box::new(dt),
        Value::Json(j) => Box::new(j),
    }
}

/// Column `idx` as `T`, with NULL and undecodable values as [`Value::Null`]
fn column<'a, T: FromSql<'a>>(
    row: &'a tokio_postgres::Row,
    idx: usize,
    wrap: impl FnOnce(T) -> Value,
) -> Value {
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(v)) => wrap(v),
        Ok(None) | Err(_) => Value::Null,
    }
}

fn decode(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Value {
    match ty {
        t if *t == Type::BOOL => column(row, idx, Value::Bool),
        t if *t == Type::INT2 => column(row, idx, Value::Int16),
        t if *t == Type::INT4 => column(row, idx, Value::Int32),
        t if *t == Type::INT8 => column(row, idx, Value::Int64),
        t if *t == Type::FLOAT4 => column(row, idx, Value::Float32),
        t if *t == Type::FLOAT8 => column(row, idx, Value::Float64),
        t if *t == Type::BYTEA => column(row, idx, Value::Bytes),
        t if *t == Type::DATE => column(row, idx, Value::Date),
        t if *t == Type::TIMESTAMP => column(row, idx, Value::DateTime),
        t if *t == Type::TIMESTAMPTZ => column(row, idx, Value::DateTimeTz),
        t if *t == Type::JSON || *t == Type::JSONB => column(row, idx, Value::Json),
        // text types, and NUMERIC or anything else readable as text
        _ => column(row, idx, Value::String),
    }
}

fn decode_row(row: &tokio_postgres::Row) -> Row {
    let (columns, values) = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| (col.name().to_owned(), decode(row, idx, col.type_())))
        .unzip();
    Row::new(columns, values)
}

/// One PostgreSQL session.
///
/// The socket is driven by a task spawned in [`PgConnectionFactory`]; this
/// side only holds the client handle.
pub struct PgConnection {
    client: Client,
    closed: AtomicBool,
}

impl PgConnection {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Relaxed) && !self.client.is_closed()
    }
}

impl From<Client> for PgConnection {
    fn from(client: Client) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        if !self.is_open() {
            return Err(Error::connection("PostgreSQL session is closed"));
        }

        let owned: Vec<Param> = params.iter().map(encode).collect();
        let borrowed: Vec<&(dyn ToSql + Sync)> = owned
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let rows = self
            .client
            .query(sql, &borrowed)
            .await
            .map_err(|e| Error::query_with_source(sql, e))?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn is_valid(&self) -> bool {
        self.is_open() && self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        // Dropping the client ends the driver task.
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Opens [`PgConnection`]s without TLS
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg = config
            .url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| Error::config(format!("invalid PostgreSQL URL: {e}")))?;
        if let Some(name) = config.application_name.as_deref() {
            pg.application_name(name);
        }

        let (client, driver) = pg
            .connect(NoTls)
            .await
            .map_err(|e| Error::connection_with_source("could not reach PostgreSQL", e))?;
        tokio::spawn(async move {
            if let Err(e) = driver.await {
                warn!(error = %e, "PostgreSQL session ended with an error");
            }
        });

        Ok(Box::new(PgConnection::from(client)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[tokio::test]
    async fn test_bad_port_is_rejected_before_connecting() {
        let Err(err) = PgConnectionFactory
            .connect(&ConnectionConfig::new("postgres://host:notaport/db"))
            .await
        else {
            panic!("a non-numeric port must not parse");
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_factory_database_type() {
        assert_eq!(PgConnectionFactory.database_type(), DatabaseType::PostgreSQL);
    }

    #[test]
    fn test_null_parameter_is_untyped() {
        let param = encode(&Value::Null);
        assert!(format!("{param:?}").contains("None"));
    }
}

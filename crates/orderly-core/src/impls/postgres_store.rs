//! PostgreSQL backend（sqlx）
//!
//! pool ではなく PgConnection を 1 本だけ持つ。再接続は DurableStore 側の
//! Supervised スロットが面倒を見る。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::types::Json;
use sqlx::{Connection, Row};

use crate::domain::{OrderDocument, OrderId, OrderRecord};
use crate::ports::{ConnectError, Connector, StoreError, StoreSession};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id VARCHAR(255) PRIMARY KEY,
    data JSONB NOT NULL,
    created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
)
"#;

pub struct PostgresConnector {
    url: String,
}

impl PostgresConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    type Connection = PgSession;

    fn target(&self) -> &str {
        "postgres"
    }

    async fn connect(&self) -> Result<PgSession, ConnectError> {
        let conn = PgConnection::connect(&self.url)
            .await
            .map_err(|err| ConnectError::new(self.target(), err))?;
        Ok(PgSession { conn })
    }
}

pub struct PgSession {
    conn: PgConnection,
}

#[async_trait]
impl StoreSession for PgSession {
    async fn ensure_schema(&mut self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA)
            .execute(&mut self.conn)
            .await
            .map_err(|err| map_sqlx_error(err, None))?;
        Ok(())
    }

    async fn insert(&mut self, id: &OrderId, document: &OrderDocument) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO orders (id, data) VALUES ($1, $2)")
            .bind(id.as_str())
            .bind(Json(document.fields()))
            .execute(&mut self.conn)
            .await
            .map_err(|err| map_sqlx_error(err, Some(id)))?;
        Ok(())
    }

    async fn get(&mut self, id: &OrderId) -> Result<Option<OrderRecord>, StoreError> {
        let maybe_row = sqlx::query(
            r#"
            SELECT id, data, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&mut self.conn)
        .await
        .map_err(|err| map_sqlx_error(err, None))?;

        maybe_row.as_ref().map(|row| row_to_record(id, row)).transpose()
    }

    async fn update(&mut self, id: &OrderId, document: &OrderDocument) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET data = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
            .bind(Json(document.fields()))
            .bind(id.as_str())
            .execute(&mut self.conn)
            .await
            .map_err(|err| map_sqlx_error(err, None))?;
        Ok(())
    }

    async fn delete(&mut self, id: &OrderId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_str())
            .execute(&mut self.conn)
            .await
            .map_err(|err| map_sqlx_error(err, None))?;
        Ok(())
    }
}

fn row_to_record(id: &OrderId, row: &PgRow) -> Result<OrderRecord, StoreError> {
    let decode = |err: sqlx::Error| StoreError::Query(err.to_string());
    let Json(fields) = row.try_get::<Json<Map<String, Value>>, _>("data").map_err(decode)?;
    Ok(OrderRecord {
        id: id.clone(),
        document: OrderDocument::new(fields),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(decode)?,
    })
}

/// How the store adapter reacts to a failed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
    DuplicateKey,
    /// The connection is gone; the caller heals.
    ConnectionLost,
    Query,
}

/// `23505` (unique_violation) is a duplicate key, but only for an insert.
fn classify_sqlstate(code: Option<&str>, inserting: bool) -> ErrorClass {
    match code {
        Some("23505") if inserting => ErrorClass::DuplicateKey,
        _ => ErrorClass::Query,
    }
}

fn classify(error: &sqlx::Error, inserting: bool) -> ErrorClass {
    match error {
        sqlx::Error::Database(db_error) => {
            classify_sqlstate(db_error.code().as_deref(), inserting)
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ErrorClass::ConnectionLost,
        _ => ErrorClass::Query,
    }
}

fn map_sqlx_error(error: sqlx::Error, inserting: Option<&OrderId>) -> StoreError {
    match (classify(&error, inserting.is_some()), inserting) {
        (ErrorClass::DuplicateKey, Some(id)) => StoreError::DuplicateKey(id.clone()),
        (ErrorClass::ConnectionLost, _) => StoreError::Connection(error.to_string()),
        _ => StoreError::Query(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io;

    #[rstest]
    #[case::duplicate_on_insert(Some("23505"), true, ErrorClass::DuplicateKey)]
    #[case::unique_violation_on_update(Some("23505"), false, ErrorClass::Query)]
    #[case::not_null_violation(Some("23502"), true, ErrorClass::Query)]
    #[case::syntax_error(Some("42601"), false, ErrorClass::Query)]
    #[case::no_code(None, true, ErrorClass::Query)]
    fn sqlstate_classification(
        #[case] code: Option<&str>,
        #[case] inserting: bool,
        #[case] expected: ErrorClass,
    ) {
        assert_eq!(classify_sqlstate(code, inserting), expected);
    }

    #[rstest]
    #[case::io(
        sqlx::Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ErrorClass::ConnectionLost
    )]
    #[case::protocol(
        sqlx::Error::Protocol("unexpected message".to_string()),
        ErrorClass::ConnectionLost
    )]
    #[case::pool_timeout(sqlx::Error::PoolTimedOut, ErrorClass::ConnectionLost)]
    #[case::worker_crashed(sqlx::Error::WorkerCrashed, ErrorClass::ConnectionLost)]
    #[case::row_not_found(sqlx::Error::RowNotFound, ErrorClass::Query)]
    #[case::missing_column(
        sqlx::Error::ColumnNotFound("data".to_string()),
        ErrorClass::Query
    )]
    fn driver_error_classification(#[case] error: sqlx::Error, #[case] expected: ErrorClass) {
        assert_eq!(classify(&error, true), expected);
    }

    #[test]
    fn lost_connection_maps_to_a_healable_error() {
        let id = OrderId::parse("A-1").unwrap();
        let error = sqlx::Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));

        assert!(matches!(map_sqlx_error(error, Some(&id)), StoreError::Connection(_)));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound, None),
            StoreError::Query(_)
        ));
    }
}

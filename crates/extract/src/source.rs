//! Capability interfaces for the upstream stores, plus their live
//! implementations on sqlx (MySQL) and the MongoDB driver.

use async_trait::async_trait;
use bson::{doc, Document};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use mongodb::Client;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo};
use tracing::{debug, info};

use panorama_core::{CellValue, MongoConnection, MysqlConnection};

use crate::error::ExtractError;

/// A relational source answering plain SQL text.
#[async_trait]
pub trait RelationalSource: Send + Sync {
    async fn query(&self, sql: &str) -> Result<Vec<Vec<CellValue>>, ExtractError>;
}

/// A document store queried by collection and filter.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>, ExtractError>;

    async fn ping(&self) -> Result<(), ExtractError>;
}

// ── MySQL ───────────────────────────────────────────────────────

pub struct MySqlSource {
    pool: MySqlPool,
}

impl MySqlSource {
    /// Open a single-connection pool; the run is strictly sequential.
    pub async fn connect(conn: &MysqlConnection) -> Result<Self, ExtractError> {
        let mut options = MySqlConnectOptions::new()
            .host(&conn.host)
            .port(conn.port)
            .username(&conn.username)
            .database(&conn.database);
        if let Some(ref password) = conn.password {
            options = options.password(password);
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        info!(host = %conn.host, port = conn.port, database = %conn.database, "Connected to MySQL");
        Ok(Self { pool })
    }
}

#[async_trait]
impl RelationalSource for MySqlSource {
    async fn query(&self, sql: &str) -> Result<Vec<Vec<CellValue>>, ExtractError> {
        debug!(sql = %sql, "mysql query");
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let cells = (0..row.len())
                .map(|i| decode_cell(row, i))
                .collect::<Result<Vec<_>, _>>()?;
            out.push(cells);
        }
        Ok(out)
    }
}

/// Decode one column by its reported MySQL type.
///
/// Anything not recognised is read as raw bytes and rendered as lossy UTF-8.
fn decode_cell(row: &MySqlRow, idx: usize) -> Result<CellValue, sqlx::Error> {
    let type_name = row.column(idx).type_info().name().to_ascii_uppercase();
    let value = match type_name.as_str() {
        "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
            .try_get_unchecked::<Option<i64>, _>(idx)?
            .map(CellValue::Integer),
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" | "YEAR" | "BIT" => row
            .try_get_unchecked::<Option<u64>, _>(idx)?
            .map(CellValue::Unsigned),
        "FLOAT" | "DOUBLE" => row
            .try_get_unchecked::<Option<f64>, _>(idx)?
            .map(CellValue::Float),
        "DATETIME" | "TIMESTAMP" => row
            .try_get_unchecked::<Option<NaiveDateTime>, _>(idx)?
            .map(CellValue::DateTime),
        "DATE" => row
            .try_get_unchecked::<Option<NaiveDate>, _>(idx)?
            .map(CellValue::Date),
        "TIME" => row
            .try_get_unchecked::<Option<NaiveTime>, _>(idx)?
            .map(CellValue::Time),
        _ => row
            .try_get_unchecked::<Option<Vec<u8>>, _>(idx)?
            .map(|bytes| CellValue::Text(String::from_utf8_lossy(&bytes).into_owned())),
    };
    Ok(value.unwrap_or(CellValue::Null))
}

// ── MongoDB ─────────────────────────────────────────────────────

pub struct MongoSource {
    client: Client,
    database: String,
}

impl MongoSource {
    pub async fn connect(conn: &MongoConnection) -> Result<Self, ExtractError> {
        let client = Client::with_uri_str(&connection_uri(conn)).await?;
        info!(host = %conn.host, port = conn.port, database = %conn.database, "MongoDB client ready");
        Ok(Self {
            client,
            database: conn.database.clone(),
        })
    }
}

/// Direct connection to one member, reading from secondaries when possible,
/// authenticating against the modulestore database.
pub fn connection_uri(conn: &MongoConnection) -> String {
    let credentials = match (&conn.username, &conn.password) {
        (Some(user), Some(password)) => format!(
            "{}:{}@",
            urlencoding::encode(user),
            urlencoding::encode(password)
        ),
        (Some(user), None) => format!("{}@", urlencoding::encode(user)),
        _ => String::new(),
    };
    format!(
        "mongodb://{}{}:{}/?authSource={}&directConnection=true&readPreference=secondaryPreferred",
        credentials,
        conn.host,
        conn.port,
        urlencoding::encode(&conn.database)
    )
}

#[async_trait]
impl DocumentSource for MongoSource {
    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>, ExtractError> {
        debug!(collection = %collection, filter = %filter, "mongodb find");
        let cursor = self
            .client
            .database(&self.database)
            .collection::<Document>(collection)
            .find(filter)
            .await?;
        let docs: Vec<Document> = cursor.try_collect().await?;
        Ok(docs)
    }

    async fn ping(&self) -> Result<(), ExtractError> {
        self.client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }
}

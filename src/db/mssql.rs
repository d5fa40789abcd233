//! SQL Server database client implementation.
//!
//! Provides the `MssqlClient` struct that implements the `DatabaseClient` trait
//! for SQL Server using tiberius over a tokio TCP stream.

use crate::config::ConnectionConfig;
use crate::db::{ColumnInfo, Connector, DatabaseClient, QueryResult, Row, Value};
use crate::error::{HarvestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use std::time::Instant;
use tiberius::numeric::Numeric;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, QueryItem, SqlBrowser};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

const APPLICATION_NAME: &str = "db-harvest";

/// SQL Server database client.
///
/// tiberius needs `&mut` access per request, so the client lives behind a mutex.
/// `close` takes it out, after which every call fails.
pub struct MssqlClient {
    client: Mutex<Option<Client<Compat<TcpStream>>>>,
    target: String,
}

impl MssqlClient {
    /// Opens a connection described by `config`.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let tds = build_tds_config(config)?;
        let target = config.display_string();
        debug!("Connecting to {target}");

        let tcp = if config.instance.is_some() {
            TcpStream::connect_named(&tds)
                .await
                .map_err(|e| map_connection_error(&target, e.to_string()))?
        } else {
            TcpStream::connect(tds.get_addr())
                .await
                .map_err(|e| map_connection_error(&target, e.to_string()))?
        };
        tcp.set_nodelay(true)
            .map_err(|e| map_connection_error(&target, e.to_string()))?;

        let client = Client::connect(tds, tcp.compat_write())
            .await
            .map_err(|e| map_connection_error(&target, e.to_string()))?;

        debug!("Connected to {target}");
        Ok(Self {
            client: Mutex::new(Some(client)),
            target,
        })
    }
}

#[async_trait]
impl DatabaseClient for MssqlClient {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| HarvestError::connection("Connection already closed"))?;

        let mut stream = client.simple_query(sql).await.map_err(query_error)?;

        let mut columns: Vec<ColumnInfo> = Vec::new();
        let mut rows: Vec<Row> = Vec::new();

        // Drain the whole stream so the connection is ready for the next batch,
        // but keep only the first result set.
        while let Some(item) = stream.try_next().await.map_err(query_error)? {
            match item {
                QueryItem::Metadata(meta) if meta.result_index() == 0 => {
                    columns = meta
                        .columns()
                        .iter()
                        .map(|c| ColumnInfo::new(c.name(), format!("{:?}", c.column_type())))
                        .collect();
                }
                QueryItem::Row(row) if row.result_index() == 0 => {
                    rows.push(row.into_iter().map(convert_value).collect::<Result<Row>>()?);
                }
                _ => {}
            }
        }

        Ok(QueryResult::with_data(columns, rows).with_execution_time(start.elapsed()))
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| HarvestError::connection("Connection already closed"))?;

        client
            .simple_query(sql)
            .await
            .map_err(query_error)?
            .into_results()
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(client) = self.client.lock().await.take() {
            client
                .close()
                .await
                .map_err(|e| HarvestError::connection(format!("Failed to close connection: {e}")))?;
            debug!("Closed connection to {}", self.target);
        }
        Ok(())
    }
}

/// Opens `MssqlClient`s against one server.
#[derive(Debug, Clone)]
pub struct MssqlConnector {
    config: ConnectionConfig,
}

impl MssqlConnector {
    /// Creates a connector; each `connect` opens a fresh connection from `config`.
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for MssqlConnector {
    async fn connect(&self, database: Option<&str>) -> Result<Box<dyn DatabaseClient>> {
        let client = MssqlClient::connect(&self.config.for_database(database)).await?;
        Ok(Box::new(client))
    }

    fn linked_server(&self) -> Option<&str> {
        self.config.linked_server.as_deref()
    }
}

/// Builds the tiberius configuration for a connection.
pub(crate) fn build_tds_config(config: &ConnectionConfig) -> Result<Config> {
    let mut tds = Config::new();
    tds.host(config.host.as_deref().unwrap_or("localhost"));
    tds.port(config.port);
    if let Some(instance) = &config.instance {
        tds.instance_name(instance);
    }
    if let Some(database) = &config.database {
        tds.database(database);
    }
    tds.application_name(APPLICATION_NAME);
    if config.trust_cert {
        tds.trust_cert();
    }
    tds.authentication(auth_method(config)?);
    Ok(tds)
}

fn auth_method(config: &ConnectionConfig) -> Result<AuthMethod> {
    if config.integrated {
        return integrated_auth();
    }
    match (&config.user, &config.password) {
        (Some(user), Some(password)) => Ok(AuthMethod::sql_server(user, password)),
        (Some(user), None) => Err(HarvestError::config(format!(
            "No password given for SQL login '{user}'"
        ))),
        (None, _) => integrated_auth(),
    }
}

#[cfg(windows)]
fn integrated_auth() -> Result<AuthMethod> {
    Ok(AuthMethod::Integrated)
}

#[cfg(not(windows))]
fn integrated_auth() -> Result<AuthMethod> {
    Err(HarvestError::config(
        "Trusted (integrated) authentication is only available on Windows; set a user and password",
    ))
}

fn map_connection_error(target: &str, message: String) -> HarvestError {
    HarvestError::connection(format!("Cannot connect to {target}: {message}"))
}

fn query_error(e: tiberius::error::Error) -> HarvestError {
    HarvestError::query(e.to_string())
}

fn conversion_error(e: tiberius::error::Error) -> HarvestError {
    HarvestError::data(format!("Cannot convert column value: {e}"))
}

/// Converts one TDS column value into a `Value`.
fn convert_value(data: ColumnData<'static>) -> Result<Value> {
    let value = match &data {
        ColumnData::U8(v) => Value::from((*v).map(i64::from)),
        ColumnData::I16(v) => Value::from((*v).map(i64::from)),
        ColumnData::I32(v) => Value::from((*v).map(i64::from)),
        ColumnData::I64(v) => Value::from(*v),
        ColumnData::F32(v) => Value::from((*v).map(f64::from)),
        ColumnData::F64(v) => Value::from(*v),
        ColumnData::Bit(v) => Value::from(*v),
        ColumnData::String(v) => Value::from(v.as_ref().map(|s| s.to_string())),
        ColumnData::Guid(v) => Value::from((*v).map(|g| g.to_string())),
        ColumnData::Binary(v) => Value::from(v.as_ref().map(|b| b.to_vec())),
        ColumnData::Numeric(v) => (*v).map(numeric_value).unwrap_or(Value::Null),
        ColumnData::Xml(v) => {
            Value::from(v.as_ref().map(|x| x.clone().into_owned().into_string()))
        }
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            Value::from(NaiveDateTime::from_sql(&data).map_err(conversion_error)?)
        }
        ColumnData::Date(_) => Value::from(NaiveDate::from_sql(&data).map_err(conversion_error)?),
        ColumnData::Time(_) => Value::from(
            NaiveTime::from_sql(&data)
                .map_err(conversion_error)?
                .map(|t| t.format("%H:%M:%S%.f").to_string()),
        ),
        ColumnData::DateTimeOffset(_) => Value::from(
            DateTime::<FixedOffset>::from_sql(&data)
                .map_err(conversion_error)?
                .map(|dt| dt.to_rfc3339()),
        ),
    };
    Ok(value)
}

/// DECIMAL/NUMERIC with no scale stays integral when it fits in an i64.
fn numeric_value(n: Numeric) -> Value {
    if n.scale() == 0 {
        if let Ok(i) = i64::try_from(n.value()) {
            return Value::Int(i);
        }
    }
    Value::Float(n.value() as f64 / 10f64.powi(i32::from(n.scale())))
}

//! Snowflake client.
//!
//! Logs in with user and password against the account's session endpoint,
//! runs statements through the query endpoint with JSON result sets, and
//! decodes rows into `Value`s using the reported column types.

use crate::config::SnowflakeConfig;
use crate::db::{ColumnInfo, DatabaseClient, QueryResult, Row, Value};
use crate::error::{HarvestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const CLIENT_APP_ID: &str = "db-harvest";

/// Request timeout for login and statements.
const REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    message: Option<String>,
    code: Option<String>,
    #[serde(default)]
    success: bool,
}

impl<T> Envelope<T> {
    fn into_data(self, what: &str) -> Result<T> {
        if !self.success {
            return Err(HarvestError::query(format!(
                "{what} failed: {} (code {})",
                self.message.unwrap_or_else(|| "unknown error".to_string()),
                self.code.unwrap_or_else(|| "-".to_string())
            )));
        }
        self.data
            .ok_or_else(|| HarvestError::query(format!("{what} returned no data")))
    }
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

/// Column description in a query response.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RowType {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub scale: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    #[serde(default)]
    rowtype: Vec<RowType>,
    #[serde(default)]
    rowset: Vec<Vec<Option<String>>>,
    #[serde(default)]
    chunks: Vec<Chunk>,
    qrmk: Option<String>,
    #[serde(default)]
    chunk_headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Chunk {
    url: String,
}

/// A logged-in Snowflake session.
pub struct SnowflakeClient {
    http: reqwest::Client,
    base_url: String,
    token: Mutex<Option<String>>,
    sequence: AtomicU64,
}

impl SnowflakeClient {
    /// Logs in and opens a session on the configured warehouse, database and schema.
    pub async fn connect(config: &SnowflakeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| HarvestError::connection(format!("HTTP client: {e}")))?;
        let base_url = config.base_url();

        let mut params = vec![
            ("warehouse", config.warehouse.as_str()),
            ("databaseName", config.database.as_str()),
            ("schemaName", config.schema.as_str()),
        ];
        if let Some(role) = &config.role {
            params.push(("roleName", role.as_str()));
        }

        let body = json!({
            "data": {
                "CLIENT_APP_ID": CLIENT_APP_ID,
                "CLIENT_APP_VERSION": env!("CARGO_PKG_VERSION"),
                "ACCOUNT_NAME": account_name(&config.account),
                "LOGIN_NAME": config.user,
                "PASSWORD": config.password,
                "SESSION_PARAMETERS": { "QUERY_RESULT_FORMAT": "JSON" },
            }
        });

        debug!("Logging in to Snowflake at {base_url} as {}", config.user);
        let envelope: Envelope<LoginData> = http
            .post(format!("{base_url}/session/v1/login-request"))
            .query(&params)
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| HarvestError::connection(format!("Snowflake login: {e}")))?
            .json()
            .await
            .map_err(|e| HarvestError::connection(format!("Snowflake login response: {e}")))?;

        let login = envelope
            .into_data("Snowflake login")
            .map_err(|e| HarvestError::connection(e.to_string()))?;

        info!(
            "Connected to Snowflake {}.{} on warehouse {}",
            config.database, config.schema, config.warehouse
        );
        Ok(Self {
            http,
            base_url,
            token: Mutex::new(Some(login.token)),
            sequence: AtomicU64::new(0),
        })
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let token = self
            .token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| HarvestError::connection("Snowflake session already closed"))?;

        let mut headers = HeaderMap::with_capacity(3);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Snowflake Token=\"{token}\""))
                .map_err(|e| HarvestError::internal(e.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/snowflake"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn run(&self, sql: &str) -> Result<QueryData> {
        let headers = self.auth_headers()?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let request_id = uuid::Uuid::new_v4().to_string();

        let envelope: Envelope<QueryData> = self
            .http
            .post(format!("{}/queries/v1/query-request", self.base_url))
            .query(&[("requestId", request_id.as_str())])
            .headers(headers)
            .json(&json!({
                "sqlText": sql,
                "asyncExec": false,
                "sequenceId": sequence,
                "isInternal": false,
            }))
            .send()
            .await
            .map_err(|e| HarvestError::query(format!("Snowflake request: {e}")))?
            .json()
            .await
            .map_err(|e| HarvestError::query(format!("Snowflake response: {e}")))?;

        envelope.into_data("Snowflake query")
    }

    /// Downloads the extra result chunks of a large result set.
    async fn fetch_chunks(&self, data: &QueryData) -> Result<Vec<Vec<Option<String>>>> {
        let mut rows = Vec::new();
        for (i, chunk) in data.chunks.iter().enumerate() {
            let mut request = self.http.get(&chunk.url);
            if !data.chunk_headers.is_empty() {
                for (name, value) in &data.chunk_headers {
                    request = request.header(name.as_str(), value.as_str());
                }
            } else if let Some(qrmk) = &data.qrmk {
                request = request
                    .header("x-amz-server-side-encryption-customer-algorithm", "AES256")
                    .header("x-amz-server-side-encryption-customer-key", qrmk.as_str());
            }

            let body = request
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| HarvestError::query(format!("Result chunk {i}: {e}")))?
                .text()
                .await
                .map_err(|e| HarvestError::query(format!("Result chunk {i}: {e}")))?;

            rows.extend(parse_chunk(&body)?);
        }
        Ok(rows)
    }
}

#[async_trait]
impl DatabaseClient for SnowflakeClient {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();
        let data = self.run(sql).await?;
        let mut raw = data.rowset.clone();
        if !data.chunks.is_empty() {
            debug!("Fetching {} result chunks", data.chunks.len());
            raw.extend(self.fetch_chunks(&data).await?);
        }
        let result = decode_rowset(&data.rowtype, raw)?;
        Ok(result.with_execution_time(start.elapsed()))
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.run(sql).await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        let headers = match self.auth_headers() {
            Ok(headers) => headers,
            Err(_) => return Ok(()),
        };
        let response = self
            .http
            .post(format!("{}/session", self.base_url))
            .query(&[("delete", "true")])
            .headers(headers)
            .send()
            .await;
        self.token.lock().unwrap_or_else(|e| e.into_inner()).take();

        match response {
            Ok(r) if r.status().is_success() => {
                debug!("Closed Snowflake session");
                Ok(())
            }
            Ok(r) => {
                warn!("Snowflake logout returned {}", r.status());
                Ok(())
            }
            Err(e) => Err(HarvestError::connection(format!("Snowflake logout: {e}"))),
        }
    }
}

/// Account locator for the login body: the part before the region suffix.
fn account_name(account: &str) -> &str {
    account.split('.').next().unwrap_or(account)
}

/// Parses a chunk body, which is a comma-separated run of row arrays.
fn parse_chunk(body: &str) -> Result<Vec<Vec<Option<String>>>> {
    serde_json::from_str(&format!("[{}]", body.trim().trim_end_matches(',')))
        .map_err(|e| HarvestError::query(format!("Malformed result chunk: {e}")))
}

/// Converts a JSON rowset into a frame using the column types.
pub fn decode_rowset(rowtype: &[RowType], rowset: Vec<Vec<Option<String>>>) -> Result<QueryResult> {
    let columns = rowtype
        .iter()
        .map(|c| ColumnInfo::new(&c.name, &c.kind))
        .collect();
    let rows = rowset
        .into_iter()
        .map(|raw| {
            raw.into_iter()
                .zip(rowtype)
                .map(|(cell, column)| decode_cell(cell, column))
                .collect::<Result<Row>>()
        })
        .collect::<Result<Vec<Row>>>()?;
    Ok(QueryResult::with_data(columns, rows))
}

fn decode_cell(cell: Option<String>, column: &RowType) -> Result<Value> {
    let Some(text) = cell else {
        return Ok(Value::Null);
    };
    let bad = || {
        HarvestError::data(format!(
            "Cannot read '{text}' as {} in column {}",
            column.kind, column.name
        ))
    };

    let value = match column.kind.as_str() {
        "fixed" if column.scale.unwrap_or(0) == 0 => match text.parse::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Float(text.parse().map_err(|_| bad())?),
        },
        "fixed" | "real" => Value::Float(text.parse().map_err(|_| bad())?),
        "boolean" => Value::Bool(matches!(text.as_str(), "1" | "true" | "TRUE")),
        "date" => {
            let days: i64 = text.parse().map_err(|_| bad())?;
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).ok_or_else(bad)?;
            Value::Date(
                epoch
                    .checked_add_signed(chrono::Duration::days(days))
                    .ok_or_else(bad)?,
            )
        }
        "timestamp_ntz" | "timestamp_ltz" | "timestamp_tz" => {
            let epoch = text.split_whitespace().next().unwrap_or_default();
            let (whole, frac) = epoch.split_once('.').unwrap_or((epoch, "0"));
            let mut secs: i64 = whole.parse().map_err(|_| bad())?;
            if !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
            let mut nanos: u32 = format!("{frac:0<9}")[..9].parse().map_err(|_| bad())?;
            // The fraction shares the sign of the whole part, e.g. -1.5 is 1.5s before the epoch.
            if whole.starts_with('-') && nanos > 0 {
                secs -= 1;
                nanos = 1_000_000_000 - nanos;
            }
            Value::DateTime(
                DateTime::from_timestamp(secs, nanos)
                    .ok_or_else(bad)?
                    .naive_utc(),
            )
        }
        "binary" => Value::Bytes(decode_hex(&text).ok_or_else(bad)?),
        _ => Value::String(text.clone()),
    };
    Ok(value)
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

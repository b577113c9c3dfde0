// src/load/snowflake.rs
use reqwest::{
    blocking::Client,
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::{env, thread, time::Duration};
use tracing::{debug, instrument};

use super::{Warehouse, WarehouseError};

const STATEMENT_TIMEOUT_SECS: u64 = 600;
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLLS: u32 = 300;

/// Connection settings, read from `SNOW_*` environment variables.
#[derive(Debug, Clone)]
pub struct SnowflakeConfig {
    pub account: String,
    pub user: String,
    pub token: String,
    /// `OAUTH` or `KEYPAIR_JWT`
    pub token_type: String,
    pub warehouse: String,
    pub role: String,
    pub database: String,
    pub schema: String,
}

impl SnowflakeConfig {
    pub fn from_env() -> Result<Self, WarehouseError> {
        Ok(Self {
            account: required("SNOW_ACCOUNT")?,
            user: required("SNOW_USER")?,
            token: required("SNOW_TOKEN")?,
            token_type: optional("SNOW_TOKEN_TYPE", "OAUTH"),
            warehouse: required("SNOW_WAREHOUSE")?,
            role: optional("SNOW_ROLE", "ETL_PIPELINE"),
            database: optional("SNOW_DATABASE", "ETL_TESTING"),
            schema: optional("SNOW_SCHEMA", "FDA"),
        })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "https://{}.snowflakecomputing.com/api/v2/statements",
            self.account
        )
    }
}

fn required(name: &str) -> Result<String, WarehouseError> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| WarehouseError::MissingEnv(name.to_string()))
}

fn optional(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    database: &'a str,
    schema: &'a str,
    warehouse: &'a str,
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    bindings: Option<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    data: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    stats: Option<DmlStats>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DmlStats {
    #[serde(default)]
    num_rows_inserted: Option<u64>,
}

/// Snowflake over the SQL REST API.
///
/// Uses a blocking client, so call it from a blocking context
/// (`spawn_blocking`), never directly on the async runtime.
pub struct SnowflakeClient {
    http: Client,
    config: SnowflakeConfig,
}

impl SnowflakeClient {
    pub fn new(config: SnowflakeConfig) -> Result<Self, WarehouseError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(STATEMENT_TIMEOUT_SECS + 30))
            .user_agent(concat!("faers-etl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self, WarehouseError> {
        Self::new(SnowflakeConfig::from_env()?)
    }

    fn submit(
        &self,
        statement: &str,
        bindings: Option<Map<String, Value>>,
    ) -> Result<StatementResponse, WarehouseError> {
        let body = StatementRequest {
            statement,
            timeout: STATEMENT_TIMEOUT_SECS,
            database: &self.config.database,
            schema: &self.config.schema,
            warehouse: &self.config.warehouse,
            role: &self.config.role,
            bindings,
        };
        let resp = self
            .http
            .post(self.config.endpoint())
            .header(AUTHORIZATION, format!("Bearer {}", self.config.token))
            .header(
                "X-Snowflake-Authorization-Token-Type",
                self.config.token_type.as_str(),
            )
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()?;
        let mut parsed = parse_response(resp.status(), &resp.text()?)?;

        // 202: still running, poll the statement handle
        let mut polls = 0;
        while parsed.0 == StatusCode::ACCEPTED {
            let handle = parsed.1.statement_handle.clone().ok_or_else(|| {
                WarehouseError::Unexpected("202 without a statement handle".into())
            })?;
            if polls >= MAX_POLLS {
                return Err(WarehouseError::Unexpected(format!(
                    "statement {} still running after {} polls",
                    handle, polls
                )));
            }
            polls += 1;
            thread::sleep(POLL_INTERVAL);
            debug!(%handle, polls, "polling statement");
            let resp = self
                .http
                .get(format!("{}/{}", self.config.endpoint(), handle))
                .header(AUTHORIZATION, format!("Bearer {}", self.config.token))
                .header(
                    "X-Snowflake-Authorization-Token-Type",
                    self.config.token_type.as_str(),
                )
                .header(ACCEPT, "application/json")
                .send()?;
            parsed = parse_response(resp.status(), &resp.text()?)?;
        }
        Ok(parsed.1)
    }
}

fn parse_response(
    status: StatusCode,
    text: &str,
) -> Result<(StatusCode, StatementResponse), WarehouseError> {
    if !status.is_success() {
        // error bodies from gateways are not always JSON
        let body: StatementResponse = serde_json::from_str(text).unwrap_or_default();
        return Err(WarehouseError::Api {
            status: status.as_u16(),
            code: body.code.unwrap_or_default(),
            message: body.message.unwrap_or_else(|| text.trim().to_string()),
        });
    }
    let body: StatementResponse = if text.trim().is_empty() {
        StatementResponse::default()
    } else {
        serde_json::from_str(text)?
    };
    Ok((status, body))
}

/// Array bindings for a multi-row insert: one `TEXT` array per column,
/// keyed by 1-based position.
pub fn column_bindings(width: usize, rows: &[Vec<String>]) -> Map<String, Value> {
    (0..width)
        .map(|i| {
            let values: Vec<Value> = rows
                .iter()
                .map(|r| match r.get(i) {
                    Some(v) if !v.is_empty() => Value::String(v.clone()),
                    _ => Value::Null,
                })
                .collect();
            ((i + 1).to_string(), json!({ "type": "TEXT", "value": values }))
        })
        .collect()
}

impl Warehouse for SnowflakeClient {
    fn database(&self) -> &str {
        &self.config.database
    }

    fn schema(&self) -> &str {
        &self.config.schema
    }

    #[instrument(level = "debug", skip(self))]
    fn execute(&self, sql: &str) -> Result<(), WarehouseError> {
        self.submit(sql, None).map(|_| ())
    }

    fn insert_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<String>],
    ) -> Result<u64, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = super::insert_sql(self.schema(), table, columns);
        let resp = self.submit(&sql, Some(column_bindings(columns.len(), rows)))?;
        Ok(resp
            .stats
            .and_then(|s| s.num_rows_inserted)
            .unwrap_or(rows.len() as u64))
    }

    fn count_rows(&self, table: &str) -> Result<u64, WarehouseError> {
        let sql = format!("SELECT COUNT(*) FROM {}.{}", self.schema(), table);
        let resp = self.submit(&sql, None)?;
        resp.data
            .as_ref()
            .and_then(|d| d.first())
            .and_then(|r| r.first())
            .and_then(|v| v.as_deref())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| WarehouseError::Unexpected(format!("no count returned for {}", table)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_are_column_major_with_nulls() {
        let rows = vec![
            vec!["1".to_string(), "".to_string()],
            vec!["2".to_string(), "X".to_string()],
        ];
        let b = column_bindings(2, &rows);
        assert_eq!(b["1"], json!({ "type": "TEXT", "value": ["1", "2"] }));
        assert_eq!(b["2"], json!({ "type": "TEXT", "value": [null, "X"] }));
    }

    #[test]
    fn api_errors_carry_code_and_message() {
        let err = parse_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"code":"002003","message":"Table 'X' does not exist"}"#,
        )
        .unwrap_err();
        match err {
            WarehouseError::Api { status, code, message } => {
                assert_eq!(status, 422);
                assert_eq!(code, "002003");
                assert!(message.contains("does not exist"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_json_error_keeps_status_and_body() {
        let err = parse_response(StatusCode::BAD_GATEWAY, "<html>502 Bad Gateway</html>\n")
            .unwrap_err();
        match err {
            WarehouseError::Api { status, code, message } => {
                assert_eq!(status, 502);
                assert!(code.is_empty());
                assert_eq!(message, "<html>502 Bad Gateway</html>");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn count_payload_parses() {
        let (status, body) = parse_response(
            StatusCode::OK,
            r#"{"code":"090001","statementHandle":"abc","data":[["42"]]}"#,
        )
        .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.statement_handle.as_deref(), Some("abc"));
        assert_eq!(body.data.unwrap()[0][0].as_deref(), Some("42"));
    }

    #[test]
    fn endpoint_uses_account() {
        let cfg = SnowflakeConfig {
            account: "xy12345.us-east-1".into(),
            user: "u".into(),
            token: "t".into(),
            token_type: "OAUTH".into(),
            warehouse: "W".into(),
            role: "ETL_PIPELINE".into(),
            database: "ETL_TESTING".into(),
            schema: "FDA".into(),
        };
        assert_eq!(
            cfg.endpoint(),
            "https://xy12345.us-east-1.snowflakecomputing.com/api/v2/statements"
        );
    }
}

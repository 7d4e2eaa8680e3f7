use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use super::DurationRecordStore;
use crate::day_key::DayWindow;
use crate::db::helpers::{format_timestamp, stored_seconds};
use crate::db::DurationRecord;

const REST_PATH: &str = "rest/v1";
const DEFAULT_TABLE: &str = "duration_records";
const RECORD_COLUMNS: &str = "id,user_id,session_id,stage,duration_seconds,created_at";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    pub base_url: String,
    pub api_key: String,
    /// Signed-in user's token. Row-level security on the hosted side scopes
    /// queries to that user; the anon key is used when absent.
    pub access_token: Option<String>,
    pub table: String,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            access_token: None,
            table: DEFAULT_TABLE.to_string(),
        }
    }

    pub fn with_access_token(mut self, access_token: Option<String>) -> Self {
        self.access_token = access_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        self
    }
}

/// Duration records served by a hosted PostgREST endpoint.
#[derive(Debug, Clone)]
pub struct RestDurationRecordStore {
    client: Client,
    table_url: Url,
    api_key: String,
    access_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct InsertRecordRequest<'a> {
    id: &'a str,
    user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<u32>,
    duration_seconds: Option<u64>,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct RecordRow {
    id: serde_json::Value,
    user_id: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    stage: Option<u32>,
    #[serde(default)]
    duration_seconds: Option<i64>,
    created_at: DateTime<Utc>,
}

impl From<RecordRow> for DurationRecord {
    fn from(row: RecordRow) -> Self {
        let id = match row.id {
            serde_json::Value::String(value) => value,
            other => other.to_string(),
        };
        Self {
            duration_seconds: stored_seconds(row.duration_seconds, &id),
            id,
            user_id: row.user_id,
            session_id: row.session_id,
            stage: row.stage,
            created_at: row.created_at,
        }
    }
}

impl RestDurationRecordStore {
    pub fn new(config: RestConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!("backend api key must not be empty");
        }
        Ok(Self {
            client: Client::new(),
            table_url: table_endpoint(&config.base_url, &config.table)?,
            api_key: config.api_key.trim().to_string(),
            access_token: config.access_token,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        request.header("apikey", &self.api_key).bearer_auth(bearer)
    }

    fn records_query_url(&self, user_id: &str, window: DayWindow) -> Url {
        let mut url = self.table_url.clone();
        url.query_pairs_mut()
            .append_pair("select", RECORD_COLUMNS)
            .append_pair("user_id", &format!("eq.{user_id}"))
            .append_pair("created_at", &format!("gte.{}", format_timestamp(window.start)))
            .append_pair("created_at", &format!("lt.{}", format_timestamp(window.end)))
            .append_pair("order", "created_at.asc");
        url
    }
}

fn table_endpoint(base_url: &str, table: &str) -> Result<Url> {
    let base = base_url.trim();
    if base.is_empty() {
        bail!("backend url must not be empty");
    }
    let table = table.trim();
    if table.is_empty() {
        bail!("backend table must not be empty");
    }

    let mut url = Url::parse(base).with_context(|| format!("invalid backend url '{base}'"))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| anyhow!("backend url '{base}' cannot be a base"))?;
        segments.pop_if_empty();
        for segment in REST_PATH.split('/') {
            segments.push(segment);
        }
        segments.push(table);
    }
    Ok(url)
}

fn http_error(action: &str, status: StatusCode, body: &str) -> anyhow::Error {
    if body.trim().is_empty() {
        anyhow!("{action} failed: http {}", status.as_u16())
    } else {
        anyhow!("{action} failed: http {}; body={body}", status.as_u16())
    }
}

#[async_trait]
impl DurationRecordStore for RestDurationRecordStore {
    async fn list_duration_records(
        &self,
        user_id: &str,
        window: DayWindow,
    ) -> Result<Vec<DurationRecord>> {
        if user_id.trim().is_empty() {
            bail!("user id must not be empty");
        }

        let url = self.records_query_url(user_id.trim(), window);
        debug!("Listing duration records from {}", url.path());

        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .context("network error while listing duration records")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed reading duration records response")?;

        if !status.is_success() {
            return Err(http_error("listing duration records", status, &body));
        }

        let rows: Vec<RecordRow> = serde_json::from_str(&body)
            .with_context(|| format!("invalid duration records payload; body={body}"))?;
        Ok(rows.into_iter().map(DurationRecord::from).collect())
    }

    async fn insert_duration_record(&self, record: &DurationRecord) -> Result<()> {
        let request = InsertRecordRequest {
            id: &record.id,
            user_id: &record.user_id,
            session_id: record.session_id.as_deref(),
            stage: record.stage,
            duration_seconds: record.duration_seconds,
            created_at: format_timestamp(record.created_at),
        };

        let response = self
            .authorized(self.client.post(self.table_url.clone()))
            .header("Prefer", "return=minimal")
            .json(&request)
            .send()
            .await
            .context("network error while inserting duration record")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_error("inserting duration record", status, &body));
        }
        Ok(())
    }
}

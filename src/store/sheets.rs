//! Google Sheets binding of [`RecordStore`] over the v4 REST API.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::google_auth::{ServiceAccountAuth, ServiceAccountKey, SheetsAuth};
use super::RecordStore;
use crate::config::SheetsConfig;

/// Row count of newly created worksheets.
const NEW_SHEET_ROWS: usize = 2000;

/// Environment variable holding a ready-made access token. Consulted when no
/// token file is configured, ahead of any service-account key.
pub const TOKEN_ENV_VAR: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct BatchUpdateResponse {
    #[serde(default)]
    replies: Vec<Value>,
}

/// Spreadsheet client authorized with an OAuth bearer token.
pub struct SheetsStore {
    client: Client,
    api_base: String,
    spreadsheet_id: String,
    auth: SheetsAuth,
    sheet_ids: Mutex<HashMap<String, i64>>,
}

impl SheetsStore {
    /// Client with a fixed access token.
    pub fn new(
        spreadsheet_id: impl Into<String>,
        token: SecretString,
        api_base: impl Into<String>,
    ) -> Result<Self> {
        Self::with_auth(spreadsheet_id, SheetsAuth::Token(token), api_base)
    }

    pub fn with_auth(
        spreadsheet_id: impl Into<String>,
        auth: SheetsAuth,
        api_base: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("offerbook/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            auth,
            sheet_ids: Mutex::new(HashMap::new()),
        })
    }

    /// Build from `[sheets]` settings and the process environment.
    pub fn from_config(config: &SheetsConfig) -> Result<Self> {
        Self::from_config_with_env(config, |key| std::env::var(key).ok())
    }

    /// Build from `[sheets]` settings. Credentials are taken from the first
    /// of: `token_path`, `GOOGLE_OAUTH_ACCESS_TOKEN`, `service_account_path`.
    pub fn from_config_with_env<F>(config: &SheetsConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let spreadsheet_id = config
            .spreadsheet_id
            .clone()
            .context("[sheets] spreadsheet_id is not set")?;

        let auth = if let Some(path) = &config.token_path {
            let token = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read token file: {}", path.display()))?
                .trim()
                .to_string();
            if token.is_empty() {
                anyhow::bail!("Sheets access token is empty");
            }
            SheetsAuth::Token(SecretString::from(token))
        } else if let Some(token) = lookup(TOKEN_ENV_VAR).filter(|t| !t.trim().is_empty()) {
            SheetsAuth::Token(SecretString::from(token.trim().to_string()))
        } else if let Some(path) = &config.service_account_path {
            let auth = ServiceAccountAuth::new(ServiceAccountKey::from_file(path)?);
            info!(account = %auth.client_email(), "Using service-account credentials");
            SheetsAuth::ServiceAccount(auth)
        } else {
            anyhow::bail!(
                "No Sheets credentials: set [sheets] service_account_path (or GOOGLE_SA_PATH), \
                 token_path, or {TOKEN_ENV_VAR}"
            );
        };

        Self::with_auth(spreadsheet_id, auth, config.api_base.clone())
    }

    fn spreadsheet_url(&self) -> String {
        format!("{}/v4/spreadsheets/{}", self.api_base, self.spreadsheet_id)
    }

    /// `values` endpoint for an A1 range on `title`, e.g. `'Card Offers'!1:1`.
    fn values_url(&self, title: &str, range: &str, suffix: &str) -> String {
        let a1 = format!("'{}'{range}", title.replace('\'', "''"));
        format!(
            "{}/values/{}{suffix}",
            self.spreadsheet_url(),
            urlencoding::encode(&a1)
        )
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let token = self.auth.bearer(&self.client).await?;
        let response = req
            .bearer_auth(token)
            .header("accept", "application/json")
            .send()
            .await
            .context("HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Sheets API request failed ({status}): {body}");
        }

        let body = response.text().await.context("Failed to read response")?;
        serde_json::from_str(&body).context("Failed to parse JSON response")
    }

    async fn batch_update(&self, requests: Vec<Value>) -> Result<BatchUpdateResponse> {
        let url = format!("{}:batchUpdate", self.spreadsheet_url());
        self.send(self.client.post(&url).json(&json!({ "requests": requests })))
            .await
    }

    async fn write_header(&self, title: &str, headers: &[&str]) -> Result<()> {
        let url = self.values_url(title, "!A1", "?valueInputOption=RAW");
        let _: Value = self
            .send(self.client.put(&url).json(&json!({ "values": [headers] })))
            .await
            .with_context(|| format!("Failed to write header row of '{title}'"))?;
        Ok(())
    }

    async fn refresh_sheet_ids(&self) -> Result<HashMap<String, i64>> {
        let url = format!(
            "{}?fields={}",
            self.spreadsheet_url(),
            urlencoding::encode("sheets.properties(sheetId,title)")
        );
        let meta: SpreadsheetMeta = self
            .send(self.client.get(&url))
            .await
            .context("Failed to read spreadsheet metadata")?;
        let ids: HashMap<String, i64> = meta
            .sheets
            .into_iter()
            .map(|s| (s.properties.title, s.properties.sheet_id))
            .collect();
        self.cache_ids(&ids);
        Ok(ids)
    }

    fn cache_ids(&self, ids: &HashMap<String, i64>) {
        let mut cache = self
            .sheet_ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.extend(ids.iter().map(|(k, v)| (k.clone(), *v)));
    }

    fn cached_id(&self, title: &str) -> Option<i64> {
        self.sheet_ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(title)
            .copied()
    }

    async fn sheet_id(&self, title: &str) -> Result<i64> {
        if let Some(id) = self.cached_id(title) {
            return Ok(id);
        }
        self.refresh_sheet_ids()
            .await?
            .get(title)
            .copied()
            .with_context(|| format!("No worksheet named '{title}'"))
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl RecordStore for SheetsStore {
    async fn open_or_create_worksheet(&self, title: &str, headers: &[&str]) -> Result<()> {
        let ids = self.refresh_sheet_ids().await?;
        if !ids.contains_key(title) {
            let response = self
                .batch_update(vec![json!({
                    "addSheet": { "properties": {
                        "title": title,
                        "gridProperties": {
                            "rowCount": NEW_SHEET_ROWS,
                            "columnCount": headers.len().max(1),
                        },
                    }}
                })])
                .await
                .with_context(|| format!("Failed to create worksheet '{title}'"))?;
            if let Some(id) = response
                .replies
                .first()
                .and_then(|reply| reply.pointer("/addSheet/properties/sheetId"))
                .and_then(Value::as_i64)
            {
                self.cache_ids(&HashMap::from([(title.to_string(), id)]));
            }
            self.write_header(title, headers).await?;
            info!(title, "Created worksheet");
            return Ok(());
        }

        let url = self.values_url(title, "!1:1", "");
        let first: ValueRange = self.send(self.client.get(&url)).await?;
        let current: Vec<String> = first
            .values
            .first()
            .map(|row| row.iter().map(cell_text).collect())
            .unwrap_or_default();
        if current != headers {
            debug!(title, ?current, "Header row mismatch; rewriting");
            self.write_header(title, headers).await?;
        }
        Ok(())
    }

    async fn read_all_rows(&self, title: &str) -> Result<Vec<Vec<String>>> {
        let url = self.values_url(title, "", "");
        let range: ValueRange = self
            .send(self.client.get(&url))
            .await
            .with_context(|| format!("Failed to read '{title}'"))?;
        Ok(range
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect())
    }

    async fn append_rows(&self, title: &str, rows: &[Vec<String>]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let url = self.values_url(
            title,
            "!A1",
            ":append?valueInputOption=RAW&insertDataOption=INSERT_ROWS",
        );
        let _: Value = self
            .send(self.client.post(&url).json(&json!({ "values": rows })))
            .await
            .with_context(|| format!("Failed to append {} row(s) to '{title}'", rows.len()))?;
        Ok(())
    }

    async fn batch_delete_rows(&self, title: &str, row_indices: &[usize]) -> Result<()> {
        if row_indices.is_empty() {
            return Ok(());
        }
        let sheet_id = self.sheet_id(title).await?;
        let requests = row_indices
            .iter()
            .map(|&index| {
                json!({
                    "deleteDimension": { "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": index,
                        "endIndex": index + 1,
                    }}
                })
            })
            .collect();
        self.batch_update(requests)
            .await
            .with_context(|| format!("Failed to delete rows from '{title}'"))?;
        Ok(())
    }

    async fn set_filter_range(
        &self,
        title: &str,
        rows: Range<usize>,
        columns: Range<usize>,
    ) -> Result<()> {
        let sheet_id = self.sheet_id(title).await?;
        self.batch_update(vec![
            json!({ "clearBasicFilter": { "sheetId": sheet_id } }),
            json!({ "setBasicFilter": { "filter": { "range": {
                "sheetId": sheet_id,
                "startRowIndex": rows.start,
                "endRowIndex": rows.end,
                "startColumnIndex": columns.start,
                "endColumnIndex": columns.end,
            }}}}),
        ])
        .await
        .with_context(|| format!("Failed to reset filter on '{title}'"))?;
        Ok(())
    }

    async fn set_row_height(&self, title: &str, pixels: u32) -> Result<()> {
        let sheet_id = self.sheet_id(title).await?;
        self.batch_update(vec![json!({
            "updateDimensionProperties": {
                "range": { "sheetId": sheet_id, "dimension": "ROWS", "startIndex": 0 },
                "properties": { "pixelSize": pixels },
                "fields": "pixelSize",
            }
        })])
        .await
        .with_context(|| format!("Failed to set row height on '{title}'"))?;
        Ok(())
    }
}

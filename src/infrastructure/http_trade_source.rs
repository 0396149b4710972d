//! Upstream trade service over HTTP
//!
//! Each environment has its own base URL and bearer token. Datasets are
//! returned as CSV bodies and parsed into `TradeRecord`s.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::domain::entities::environment::Environment;
use crate::domain::entities::fetch_task::{DateRange, FetchTask};
use crate::domain::entities::trade_record::{ExceptionRecord, TradeRecord};
use crate::domain::repositories::trade_source::{FetchError, FetchResult, TradeSource};
use crate::persistence::trade_files::parse_trades;

/// Connection settings for one environment
#[derive(Debug, Clone)]
pub struct EnvironmentEndpoint {
    pub base_url: Url,
    pub token: Option<String>,
}

impl EnvironmentEndpoint {
    pub fn new(base_url: Url, token: Option<String>) -> Self {
        Self { base_url, token }
    }
}

pub struct HttpTradeSource {
    client: Client,
    uat: EnvironmentEndpoint,
    prod: EnvironmentEndpoint,
    timeout: Duration,
}

impl HttpTradeSource {
    pub fn new(
        uat: EnvironmentEndpoint,
        prod: EnvironmentEndpoint,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            uat = %uat.base_url,
            prod = %prod.base_url,
            "HTTP trade source configured"
        );
        Ok(Self {
            client,
            uat,
            prod,
            timeout,
        })
    }

    /// Exceptions are served by the production endpoint
    fn endpoint(&self, environment: Environment) -> &EnvironmentEndpoint {
        match environment {
            Environment::Uat => &self.uat,
            Environment::Prod | Environment::Exceptions => &self.prod,
        }
    }

    async fn get_csv(
        &self,
        environment: Environment,
        path: &str,
        params: &[(&str, String)],
    ) -> FetchResult<String> {
        let endpoint = self.endpoint(environment);
        let url = build_url(&endpoint.base_url, path, params)?;
        debug!(environment = %environment, url = %url, "Requesting dataset");

        let mut request = self.client.get(url).header("Accept", "text/csv");
        if let Some(token) = &endpoint.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        response.text().await.map_err(|e| self.classify(e))
    }

    fn classify(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout.as_millis() as u64)
        } else if let Some(status) = error.status() {
            FetchError::HttpStatus {
                status: status.as_u16(),
                body: error.to_string(),
            }
        } else {
            FetchError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl TradeSource for HttpTradeSource {
    async fn fetch_trades(&self, task: &FetchTask) -> FetchResult<Vec<TradeRecord>> {
        if !task.environment.is_trade_environment() {
            return Err(FetchError::Unsupported(format!(
                "{} is not a trade environment",
                task.environment
            )));
        }
        let params = [
            ("product_type", task.product_type.clone()),
            ("legal_entity", task.legal_entity.clone()),
            ("source_system", task.source_system.clone()),
            ("start_date", task.date_range.start_str()),
            ("end_date", task.date_range.end_str()),
        ];
        let body = self.get_csv(task.environment, "trades", &params).await?;
        parse_trades(body.as_bytes()).map_err(|e| FetchError::Parse(e.to_string()))
    }

    async fn fetch_exceptions(&self, date_range: &DateRange) -> FetchResult<Vec<ExceptionRecord>> {
        let params = [
            ("start_date", date_range.start_str()),
            ("end_date", date_range.end_str()),
        ];
        let body = self
            .get_csv(Environment::Exceptions, "exceptions", &params)
            .await?;
        let mut reader = csv::Reader::from_reader(body.as_bytes());
        reader
            .deserialize()
            .collect::<Result<Vec<ExceptionRecord>, _>>()
            .map_err(|e| FetchError::Parse(e.to_string()))
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Append `path` as a segment of `base` and attach the query parameters
fn build_url(base: &Url, path: &str, params: &[(&str, String)]) -> FetchResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| FetchError::Unsupported(format!("{} cannot be used as a base URL", base)))?
        .pop_if_empty()
        .push(path);
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    Ok(url)
}

use super::{Endpoint, Fetch, Params};
use crate::config::ApiConfig;
use crate::error::NetworkError;
use crate::store::{KeyValueStore, StoreError};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_COUNT_KEY_PREFIX: &str = "api_request_count";

/// Daily request budget shared by every fetch, persisted across restarts
#[derive(Debug, Clone)]
pub struct RequestQuota {
    store: KeyValueStore,
    daily_limit: u32,
}

impl RequestQuota {
    pub fn new(store: KeyValueStore, daily_limit: u32) -> Self {
        Self { store, daily_limit }
    }

    /// Counts one request against today's budget (KST calendar day)
    pub async fn acquire(&self) -> Result<(), NetworkError> {
        let count = self
            .store
            .increment(&Self::key_for_today())
            .await
            .map_err(|e| NetworkError::Unknown(e.to_string()))?;

        if count > i64::from(self.daily_limit) {
            warn!(count, limit = self.daily_limit, "Daily API request quota exceeded");
            return Err(NetworkError::TrafficExceed);
        }
        Ok(())
    }

    /// Requests counted so far today
    pub async fn used_today(&self) -> Result<u32, StoreError> {
        let stored = self.store.get(&Self::key_for_today()).await?;
        match stored {
            Some(value) => value.parse().map_err(|_| StoreError::CorruptValue(Self::key_for_today())),
            None => Ok(0),
        }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    fn key_for_today() -> String {
        // Quota resets at midnight KST (UTC+9)
        let today = (Utc::now() + chrono::Duration::hours(9)).format("%Y-%m-%d");
        format!("{REQUEST_COUNT_KEY_PREFIX}:{today}")
    }
}

/// `reqwest`-backed fetch capability
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
    access_key: Option<String>,
    quota: RequestQuota,
}

impl HttpFetcher {
    pub fn new(config: &ApiConfig, quota: RequestQuota) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| NetworkError::Unknown(format!("Failed to build HTTP client: {}", e)))?;

        let access_key = std::env::var(&config.access_key_env).ok().filter(|k| !k.is_empty());
        if access_key.is_none() {
            warn!(env = %config.access_key_env, "No API access key configured");
        }

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_key,
            quota,
        })
    }

    /// Keys are issued already percent-encoded, so they are appended verbatim
    fn build_url(&self, endpoint: Endpoint, params: &Params, access_key: &str) -> Result<String, NetworkError> {
        let query: Vec<String> = params
            .iter()
            .map(|(name, value)| format!("{}={}", name, urlencoding::encode(value)))
            .collect();

        let url = format!(
            "{}/{}?{}&resultType=json&serviceKey={}",
            self.base_url,
            endpoint.path(),
            query.join("&"),
            access_key
        );

        reqwest::Url::parse(&url).map_err(|e| NetworkError::Url(e.to_string()))?;
        Ok(url)
    }

    async fn get(&self, endpoint: Endpoint, params: Params) -> Result<String, NetworkError> {
        self.quota.acquire().await?;

        let access_key = self.access_key.as_deref().ok_or(NetworkError::AccessKey)?;
        let url = self.build_url(endpoint, &params, access_key)?;

        debug!(endpoint = endpoint.path(), ?params, "Fetching");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(NetworkError::Response(response.status().to_string()));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(NetworkError::NoResponse);
        }
        Ok(body)
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, endpoint: Endpoint, params: Params) -> BoxFuture<'_, Result<String, NetworkError>> {
        self.get(endpoint, params).boxed()
    }
}

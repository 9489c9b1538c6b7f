use super::QueryParams;
use crate::config::CacheConfig;
use crate::core::{CacheError, Result};
use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use tracing::{Instrument, info_span};

/// REST transport used by resources and collections.
///
/// Paths are server-relative (`/api/specify/agent/3/`). Implementations run on
/// the single-threaded client loop, hence `?Send`.
#[async_trait(?Send)]
pub trait Transport {
    async fn get(&self, path: &str, params: &QueryParams) -> Result<Value>;

    async fn post(&self, path: &str, body: &Value) -> Result<Value>;

    async fn put(&self, path: &str, body: &Value) -> Result<Value>;

    async fn delete(&self, path: &str) -> Result<()>;
}

/// HTTP transport backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    config: CacheConfig,
}

impl HttpTransport {
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        self.config.absolute(path)
    }

    async fn send(
        &self,
        method: &'static str,
        path: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CacheError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CacheError::Transport(format!(
                "{} {} failed with status {}: {}",
                method,
                path,
                status.as_u16(),
                body
            )));
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        Ok(response.json::<Value>().await?)
    }
}

#[async_trait(?Send)]
impl Transport for HttpTransport {
    async fn get(&self, path: &str, params: &QueryParams) -> Result<Value> {
        debug!("GET {}?{}", path, params.to_query_string());
        let request = self.client.get(self.url(path)).query(&params.to_pairs());
        self.send("GET", path, request)
            .instrument(info_span!("relcache.http", method = "GET", path = path))
            .await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        debug!("POST {}", path);
        let request = self.client.post(self.url(path)).json(body);
        self.send("POST", path, request)
            .instrument(info_span!("relcache.http", method = "POST", path = path))
            .await
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value> {
        debug!("PUT {}", path);
        let request = self.client.put(self.url(path)).json(body);
        self.send("PUT", path, request)
            .instrument(info_span!("relcache.http", method = "PUT", path = path))
            .await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        debug!("DELETE {}", path);
        let request = self.client.delete(self.url(path));
        self.send("DELETE", path, request)
            .instrument(info_span!("relcache.http", method = "DELETE", path = path))
            .await
            .map(|_| ())
    }
}

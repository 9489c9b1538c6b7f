use crate::core::{CacheError, Result};
use reqwest::Url;
use std::time::Duration;

/// Resource cache configuration
///
/// Describes where the REST API lives and how collections page through it.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Scheme, host and port of the server (no trailing slash)
    pub base_url: String,

    /// Path prefix of every resource endpoint, e.g. `/api/specify`
    pub api_root: String,

    /// Number of rows requested per page by lazy collections
    pub page_size: usize,

    /// Timeout applied to every HTTP request
    pub request_timeout: Duration,

    /// Accept list responses without a `meta` block (logged as a warning)
    pub legacy_list_responses: bool,

    /// Default `domainfilter` flag for collections that do not set one
    pub domain_filter: bool,
}

impl CacheConfig {
    /// Create a configuration for the given server
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_root: "/api/specify".to_string(),
            page_size: 20,
            request_timeout: Duration::from_secs(30),
            legacy_list_responses: true,
            domain_filter: false,
        }
    }

    /// Set the API root path
    pub fn api_root(mut self, api_root: &str) -> Self {
        self.api_root = normalize_root(api_root);
        self
    }

    /// Set the page size used by lazy collections
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Accept or reject meta-less list responses
    pub fn legacy_list_responses(mut self, enabled: bool) -> Self {
        self.legacy_list_responses = enabled;
        self
    }

    /// Set the default domain filter flag
    pub fn domain_filter(mut self, enabled: bool) -> Self {
        self.domain_filter = enabled;
        self
    }

    /// Parse from an API URL
    ///
    /// Format: "scheme://host[:port]/api/root"
    ///
    /// # Examples
    ///
    /// ```
    /// # use relcache::CacheConfig;
    /// let config = CacheConfig::from_url("https://collections.example.org/api/specify").unwrap();
    /// assert_eq!(config.base_url, "https://collections.example.org");
    /// assert_eq!(config.api_root, "/api/specify");
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| CacheError::InvalidConfig(e.to_string()))?;

        let host = parsed
            .host_str()
            .ok_or_else(|| CacheError::InvalidConfig(format!("URL '{}' has no host", url)))?;

        let base_url = match parsed.port() {
            Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
            None => format!("{}://{}", parsed.scheme(), host),
        };

        let config = Self::new(&base_url).api_root(parsed.path());
        config.validate()?;
        Ok(config)
    }

    /// Absolute URL for a path below the server root
    pub fn absolute(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_root.is_empty() || self.api_root == "/" {
            return Err(CacheError::InvalidConfig("api_root cannot be empty".to_string()));
        }

        if self.page_size == 0 {
            return Err(CacheError::InvalidConfig("page_size must be > 0".to_string()));
        }

        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new("http://localhost:8000")
    }
}

fn normalize_root(root: &str) -> String {
    let trimmed = root.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.api_root, "/api/specify");
        assert_eq!(config.page_size, 20);
        assert!(config.legacy_list_responses);
    }

    #[test]
    fn test_builder_pattern() {
        let config = CacheConfig::new("https://example.com/")
            .api_root("api/v2/")
            .page_size(50)
            .legacy_list_responses(false);

        assert_eq!(config.base_url, "https://example.com");
        assert_eq!(config.api_root, "/api/v2");
        assert_eq!(config.page_size, 50);
        assert!(!config.legacy_list_responses);
    }

    #[test]
    fn test_from_url_with_port() {
        let config = CacheConfig::from_url("http://localhost:8080/api/specify/").unwrap();
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.api_root, "/api/specify");
        assert_eq!(
            config.absolute("/api/specify/agent/1/"),
            "http://localhost:8080/api/specify/agent/1/"
        );
    }

    #[test]
    fn test_invalid_url() {
        assert!(CacheConfig::from_url("not a url").is_err());
        assert!(CacheConfig::from_url("http://localhost:8000/").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(CacheConfig::default().validate().is_ok());
        assert!(CacheConfig::default().page_size(0).validate().is_err());
        assert!(CacheConfig::default().api_root("/").validate().is_err());
    }
}

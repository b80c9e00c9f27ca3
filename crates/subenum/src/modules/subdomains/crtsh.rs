use super::SubdomainModule;
use crate::hostname::{dedupe, is_likely_hostname};
use crate::modules::{http_request, with_retry, Module, RetryPolicy};
use crate::{Error, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde_json::Value;
use std::num::NonZeroU32;
use tracing::{debug, instrument, trace, warn};

pub const CRTSH_URL: &str = "https://crt.sh";
pub const DEFAULT_CALLS_PER_MINUTE: u32 = 60;

// region:        --- Module info

pub struct CrtSh {
    base_url: String,
    limiter: DefaultDirectRateLimiter,
    retry: RetryPolicy,
}

impl CrtSh {
    pub fn new() -> Self {
        Self {
            base_url: CRTSH_URL.to_string(),
            limiter: per_minute_limiter(DEFAULT_CALLS_PER_MINUTE),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_calls_per_minute(mut self, calls_per_minute: u32) -> Self {
        self.limiter = per_minute_limiter(calls_per_minute);
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Module for CrtSh {
    fn name(&self) -> String {
        "subdomains/crtsh".to_string()
    }

    fn description(&self) -> String {
        "Use crt.sh/ to find subdomains".to_string()
    }
}

// endregion:     --- Module info

fn per_minute_limiter(calls_per_minute: u32) -> DefaultDirectRateLimiter {
    let calls = NonZeroU32::new(calls_per_minute).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_minute(calls))
}

impl CrtSh {
    /// One rate limited request. Non-JSON bodies and error statuses are errors so they
    /// get retried, a JSON body that is not an array is treated as empty.
    async fn fetch_entries(&self, http_client: &Client, url: &str) -> Result<Vec<Value>> {
        self.limiter.until_ready().await;
        let res = http_request(http_client, url).await?;

        if !res.status().is_success() {
            return Err(Error::InvalidHttpResponse(format!(
                "{} returned {}",
                self.name(),
                res.status()
            )));
        }

        let body = res.text().await?;
        match serde_json::from_str::<Value>(&body) {
            Ok(Value::Array(entries)) => Ok(entries),
            Ok(other) => {
                warn!("Unexpected response format from crt.sh: {}", other);
                Ok(Vec::new())
            }
            Err(err) => Err(Error::InvalidHttpResponse(format!(
                "{} body is not JSON: {}",
                self.name(),
                err
            ))),
        }
    }
}

/// Hostnames under `domain` found in the `name_value` fields of crt.sh entries.
pub fn extract_hostnames(entries: &[Value], domain: &str) -> Vec<String> {
    let candidates = entries
        .iter()
        .filter_map(|entry| entry.get("name_value").and_then(Value::as_str))
        .flat_map(|name_value| name_value.lines())
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains('@'))
        .map(|line| {
            line.trim_start_matches(|c: char| c == '*' || c == '.')
                .trim_end_matches('.')
                .to_lowercase()
        })
        .filter(|candidate| candidate.ends_with(domain) && is_likely_hostname(candidate))
        .inspect(|candidate| trace!("Collecting: {:?}", candidate));

    dedupe(candidates).collect()
}

#[async_trait]
impl SubdomainModule for CrtSh {
    #[instrument(name = "enumerate", level = "debug", fields(module = %self.name()), skip_all)]
    async fn enumerate(&self, http_client: &Client, domain: &str) -> Result<Vec<String>> {
        let url = format!("{}/?q=%25.{}&output=json", self.base_url, domain);
        let entries = with_retry(&self.name(), self.retry, || {
            self.fetch_entries(http_client, &url)
        })
        .await?;

        let subdomains = extract_hostnames(&entries, domain);
        debug!("{} collected", subdomains.len());
        Ok(subdomains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::subdomains::collect_passive;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_crtsh(server: &MockServer) -> CrtSh {
        CrtSh::new().with_base_url(&server.uri()).with_retry(RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(5),
            multiplier: 1.5,
        })
    }

    #[test]
    fn extract_wildcard_and_multiline_names() {
        let entries = vec![json!({"name_value": "*.example.com\nwww.example.com"})];
        let names = extract_hostnames(&entries, "example.com");
        assert_eq!(names, vec!["example.com", "www.example.com"]);
    }

    #[test]
    fn extract_drops_foreign_and_malformed_names() {
        let entries = vec![
            json!({"name_value": "admin@example.com\nAPI.Example.com.\n  \nother.org"}),
            json!({"name_value": "bad name.example.com\nwww.example.com"}),
            json!({"name_value": 42}),
            json!({"issuer": "no name_value"}),
        ];
        let names = extract_hostnames(&entries, "example.com");
        assert_eq!(names, vec!["api.example.com", "www.example.com"]);
    }

    #[tokio::test]
    async fn enumerate_queries_crtsh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(query_param("q", "%.example.com"))
            .and(query_param("output", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name_value": "*.example.com\nwww.example.com"},
                {"name_value": "mail.example.com"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let names = fast_crtsh(&server)
            .enumerate(&Client::new(), "example.com")
            .await
            .unwrap();
        assert_eq!(names, vec!["example.com", "www.example.com", "mail.example.com"]);
    }

    #[tokio::test]
    async fn enumerate_retries_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"name_value": "dev.example.com"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let names = fast_crtsh(&server)
            .enumerate(&Client::new(), "example.com")
            .await
            .unwrap();
        assert_eq!(names, vec!["dev.example.com"]);
    }

    #[tokio::test]
    async fn collector_degrades_to_empty_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
            .expect(3)
            .mount(&server)
            .await;

        let modules: Vec<Box<dyn SubdomainModule>> = vec![Box::new(fast_crtsh(&server))];
        let names = collect_passive(&Client::new(), &modules, "example.com").await;
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn non_array_body_is_empty_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "nope"})))
            .expect(1)
            .mount(&server)
            .await;

        let names = fast_crtsh(&server)
            .enumerate(&Client::new(), "example.com")
            .await
            .unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn quota_allows_n_calls_per_minute() {
        let limiter = per_minute_limiter(2);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());

        // a zero quota still lets one call through
        let limiter = per_minute_limiter(0);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }

    #[tokio::test]
    async fn enumerate_waits_for_the_quota() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let crtsh = fast_crtsh(&server).with_calls_per_minute(1);
        let client = Client::new();
        assert!(crtsh.enumerate(&client, "example.com").await.is_ok());

        let second = tokio::time::timeout(
            Duration::from_millis(200),
            crtsh.enumerate(&client, "example.com"),
        )
        .await;
        assert!(second.is_err());
    }
}

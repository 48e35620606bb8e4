use crate::config::ImageConfig;
use crate::error::{CoverFailure, FetchError};
use crate::services::schema;
use async_trait::async_trait;
use reqwest::Url;
use reqwest::redirect::Policy;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const MAX_REDIRECTS: usize = 5;

/// Renders a cover with an image model and returns where it is hosted.
#[async_trait]
pub trait CoverImageGenerator: Send + Sync {
    async fn generate_cover(&self, prompt: &str) -> Result<String, CoverFailure>;
}

/// "Fetch an image by URL".
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Hosts cover images may be downloaded from. An entry matches the host
/// itself and any of its subdomains; only http(s) URLs are considered.
#[derive(Debug, Clone, Default)]
pub struct HostAllowList {
    hosts: Vec<String>,
}

impl HostAllowList {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = HostAllowList::default();
        for host in hosts {
            list.push(host.as_ref());
        }
        list
    }

    fn push(&mut self, host: &str) {
        let host = host.trim().trim_start_matches('.').to_ascii_lowercase();
        if !host.is_empty() && !self.hosts.contains(&host) {
            self.hosts.push(host);
        }
    }

    /// Adds the host of `url`. Unparseable URLs are ignored.
    pub fn allow_url_host(mut self, url: &str) -> Self {
        if let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) {
            self.push(&host);
        }
        self
    }

    pub fn permits(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.hosts.iter().any(|allowed| {
            host == *allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

/// Refuses URLs outside the allow-list before they reach the inner fetcher.
pub struct AllowListedFetcher {
    inner: Arc<dyn ImageFetcher>,
    allowed: HostAllowList,
}

impl AllowListedFetcher {
    pub fn new(inner: Arc<dyn ImageFetcher>, allowed: HostAllowList) -> Self {
        AllowListedFetcher { inner, allowed }
    }
}

#[async_trait]
impl ImageFetcher for AllowListedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if !self.allowed.permits(url) {
            warn!(url = %url, "refusing to fetch image from a host outside the allow-list");
            return Err(FetchError::Disallowed(url.to_string()));
        }
        self.inner.fetch(url).await
    }
}

/// HTTP implementation of both image seams.
pub struct HttpImageClient {
    client: reqwest::Client,
    config: ImageConfig,
    fetch_timeout: Duration,
}

impl HttpImageClient {
    /// Redirects are only followed while they stay on `allowed` hosts.
    pub fn new(
        config: &ImageConfig,
        fetch_timeout: Duration,
        allowed: HostAllowList,
    ) -> Result<Self, reqwest::Error> {
        let policy = Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if allowed.permits(attempt.url().as_str()) {
                attempt.follow()
            } else {
                attempt.stop()
            }
        });
        Ok(HttpImageClient {
            client: reqwest::Client::builder().redirect(policy).build()?,
            config: config.clone(),
            fetch_timeout,
        })
    }
}

#[async_trait]
impl CoverImageGenerator for HttpImageClient {
    async fn generate_cover(&self, prompt: &str) -> Result<String, CoverFailure> {
        let mut request_builder = self.client.post(&self.config.api_url).json(&json!({
            "model": self.config.model,
            "prompt": prompt,
            "n": 1,
            "size": "1024x1792",
        }));
        if self.config.api_key != "dummy_key" {
            request_builder =
                request_builder.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = request_builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoverFailure::Status(status.as_u16()));
        }
        let body = response.text().await?;
        Ok(schema::validate_cover(&body)?)
    }
}

#[async_trait]
impl ImageFetcher for HttpImageClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let request = async {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }
            Ok::<_, FetchError>(response.bytes().await?.to_vec())
        };
        match tokio::time::timeout(self.fetch_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.fetch_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageFetcher for Recording {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.urls.lock().unwrap().push(url.to_string());
            Ok(vec![1, 2, 3])
        }
    }

    fn allow_list() -> HostAllowList {
        HostAllowList::new(["picsum.photos", " Images.Example "])
            .allow_url_host("https://api.openai.com/v1/images/generations")
    }

    #[test]
    fn matches_hosts_and_subdomains_only() {
        let list = allow_list();
        assert!(list.permits("https://picsum.photos/seed/x/600/900"));
        assert!(list.permits("https://fastly.picsum.photos/id/1/600/900.jpg"));
        assert!(list.permits("http://images.example/a.png"));
        assert!(list.permits("https://api.openai.com/file.png"));

        assert!(!list.permits("https://evilpicsum.photos/x.png"));
        assert!(!list.permits("https://picsum.photos.evil.test/x.png"));
        assert!(!list.permits("http://169.254.169.254/latest/meta-data/iam"));
        assert!(!list.permits("file:///etc/passwd"));
        assert!(!list.permits("not a url"));
    }

    #[tokio::test]
    async fn disallowed_url_never_reaches_inner_fetcher() {
        let inner = Arc::new(Recording::default());
        let fetcher = AllowListedFetcher::new(inner.clone(), allow_list());

        let err = fetcher
            .fetch("http://169.254.169.254/latest/meta-data/iam")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Disallowed(_)));
        assert!(inner.urls.lock().unwrap().is_empty());

        assert_eq!(fetcher.fetch("https://picsum.photos/seed/x/1/1").await.unwrap(), vec![1, 2, 3]);
        assert_eq!(inner.urls.lock().unwrap().len(), 1);
    }
}

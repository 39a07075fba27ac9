use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::future::{self, Either, LocalBoxFuture};
use futures_util::FutureExt;

use crate::error::EngineError;

/// Source of raw asset bytes. Futures are local: the engine lives on one
/// event-loop thread, and browser fetches are not `Send`.
pub trait Fetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> LocalBoxFuture<'a, Result<Vec<u8>, EngineError>>;
}

/// Plain HTTP GET of static files. Relative urls are resolved against `base`.
pub struct HttpFetcher {
    client: reqwest::Client,
    base: Option<reqwest::Url>,
}

impl HttpFetcher {
    pub fn new(base: Option<&str>) -> Result<Self, EngineError> {
        let base = base
            .map(|b| reqwest::Url::parse(b).map_err(|e| EngineError::Config(format!("Invalid base url {}: {}", b, e))))
            .transpose()?;
        Ok(HttpFetcher { client: reqwest::Client::new(), base })
    }

    fn resolve(&self, url: &str) -> Result<reqwest::Url, EngineError> {
        match &self.base {
            Some(base) => base.join(url),
            None => reqwest::Url::parse(url),
        }
        .map_err(|e| EngineError::network(url, e))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> LocalBoxFuture<'a, Result<Vec<u8>, EngineError>> {
        async move {
            let target = self.resolve(url)?;
            let response = self.client.get(target).send().await
                .map_err(|e| EngineError::network(url, e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(EngineError::network(url, format!("HTTP {}", status)));
            }

            let bytes = response.bytes().await.map_err(|e| EngineError::network(url, e))?;
            Ok(bytes.to_vec())
        }
        .boxed_local()
    }
}

/// Serves assets from a directory, mapping `/assets/a.mp3` to `<root>/assets/a.mp3`.
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsFetcher { root: root.into() }
    }
}

impl Fetcher for FsFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> LocalBoxFuture<'a, Result<Vec<u8>, EngineError>> {
        let path = self.root.join(url.trim_start_matches('/'));
        async move { std::fs::read(&path).map_err(|e| EngineError::network(url, e)) }.boxed_local()
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[cfg(target_arch = "wasm32")]
pub(crate) async fn sleep(duration: Duration) {
    gloo_timers::future::sleep(duration).await;
}

/// Race `fut` against a timer. Expiry is a network failure for `url`.
pub(crate) async fn with_timeout<T, F>(url: &str, duration: Duration, fut: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    let fut = std::pin::pin!(fut);
    let timer = std::pin::pin!(sleep(duration));
    match future::select(fut, timer).await {
        Either::Left((result, _)) => result,
        Either::Right(_) => Err(EngineError::network(url, format!("timed out after {} ms", duration.as_millis()))),
    }
}

/// Fetch `url`, retrying network failures up to `retries` times with a
/// jittered backoff.
pub(crate) async fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    url: &str,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
) -> Result<Vec<u8>, EngineError> {
    let mut attempt = 0;
    loop {
        match with_timeout(url, timeout, fetcher.fetch(url)).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                let jitter = backoff.mul_f64(fastrand::f64() * 0.5);
                log::warn!("Fetch of {} failed ({}), retry {}/{}", url, e, attempt, retries);
                sleep(backoff * attempt + jitter).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Flaky {
        failures_left: Cell<u32>,
        calls: Cell<u32>,
    }

    impl Fetcher for Flaky {
        fn fetch<'a>(&'a self, url: &'a str) -> LocalBoxFuture<'a, Result<Vec<u8>, EngineError>> {
            self.calls.set(self.calls.get() + 1);
            let fail = self.failures_left.get() > 0;
            if fail {
                self.failures_left.set(self.failures_left.get() - 1);
            }
            async move {
                if fail { Err(EngineError::network(url, "HTTP 503")) } else { Ok(vec![1, 2, 3]) }
            }
            .boxed_local()
        }
    }

    struct Hanging;

    impl Fetcher for Hanging {
        fn fetch<'a>(&'a self, _url: &'a str) -> LocalBoxFuture<'a, Result<Vec<u8>, EngineError>> {
            future::pending().boxed_local()
        }
    }

    #[tokio::test]
    async fn retries_network_failures() {
        let fetcher = Flaky { failures_left: Cell::new(2), calls: Cell::new(0) };
        let bytes = fetch_with_retry(&fetcher, "/n1.mp3", Duration::from_secs(1), 2, Duration::from_millis(1)).await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(fetcher.calls.get(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let fetcher = Flaky { failures_left: Cell::new(5), calls: Cell::new(0) };
        let err = fetch_with_retry(&fetcher, "/n1.mp3", Duration::from_secs(1), 1, Duration::from_millis(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::Network { .. }));
        assert_eq!(fetcher.calls.get(), 2);
    }

    #[tokio::test]
    async fn hanging_fetch_times_out() {
        let err = fetch_with_retry(&Hanging, "/slow.mp3", Duration::from_millis(20), 0, Duration::from_millis(1)).await.unwrap_err();
        match err {
            EngineError::Network { url, reason } => {
                assert_eq!(url, "/slow.mp3");
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn fs_fetcher_maps_absolute_urls_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("assets/n1.mp3"), b"abc").unwrap();

        let fetcher = FsFetcher::new(dir.path());
        assert_eq!(fetcher.fetch("/assets/n1.mp3").await.unwrap(), b"abc".to_vec());
        assert!(matches!(fetcher.fetch("/assets/missing.mp3").await, Err(EngineError::Network { .. })));
    }

    #[test]
    fn http_fetcher_resolves_relative_urls() {
        let fetcher = HttpFetcher::new(Some("https://example.com/game/")).unwrap();
        assert_eq!(
            fetcher.resolve("/assets/audio/n1.mp3").unwrap().as_str(),
            "https://example.com/assets/audio/n1.mp3"
        );
        assert!(HttpFetcher::new(Some("not a url")).is_err());
    }
}

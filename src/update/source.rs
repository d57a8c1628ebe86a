use crate::error::FetchFailure;
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const USER_AGENT: &str = concat!("revenant-updater/", env!("CARGO_PKG_VERSION"));
/// Upper bound on bytes read by a head-only version probe.
const HEAD_BYTE_LIMIT: usize = 64 * 1024;

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, FetchFailure>> + Send + 'a>>;

/// Where candidate artifacts come from.
pub trait ArtifactSource: Send + Sync {
    /// Human-readable location, for logs and status output.
    fn describe(&self) -> String;

    /// Full candidate bytes. Nothing partial is ever returned.
    fn fetch(&self) -> FetchFuture<'_>;

    /// At least the first `max_lines` lines of the candidate (or all of it
    /// when shorter). Implementations may fall back to a full fetch.
    fn fetch_head(&self, max_lines: usize) -> FetchFuture<'_> {
        let _ = max_lines;
        self.fetch()
    }
}

/// Fetches the candidate over HTTP(S) with a bounded timeout.
pub struct HttpSource {
    client: Client,
    url: String,
}

impl HttpSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchFailure> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchFailure::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn send(&self) -> Result<reqwest::Response, FetchFailure> {
        let response = self.client.get(&self.url).send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }
        Ok(response)
    }
}

fn classify(error: reqwest::Error) -> FetchFailure {
    if error.is_timeout() {
        FetchFailure::Timeout
    } else {
        FetchFailure::Transport(error.to_string())
    }
}

impl ArtifactSource for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn fetch(&self) -> FetchFuture<'_> {
        Box::pin(async move {
            let response = self.send().await?;
            let body = response.bytes().await.map_err(classify)?;
            Ok(body.to_vec())
        })
    }

    fn fetch_head(&self, max_lines: usize) -> FetchFuture<'_> {
        Box::pin(async move {
            let mut response = self.send().await?;
            let mut head = Vec::new();
            while let Some(chunk) = response.chunk().await.map_err(classify)? {
                head.extend_from_slice(&chunk);
                let lines = head.iter().filter(|b| **b == b'\n').count();
                if lines >= max_lines || head.len() >= HEAD_BYTE_LIMIT {
                    break;
                }
            }
            Ok(head)
        })
    }
}

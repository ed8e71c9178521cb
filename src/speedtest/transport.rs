use crate::error::{Result, SpeedTestError};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use reqwest::Url;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Slice size used when streaming an upload body.
pub const UPLOAD_SLICE_SIZE: usize = 64 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Network boundary of the engine. Dropping a stream returned by `fetch`
/// terminates that transfer.
pub trait Transport: Send + Sync {
    /// One lightweight round trip. Resolves once the response head arrives.
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>>;

    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ByteStream>>;

    /// Write `payload` and wait for the sink to acknowledge it. `progress`
    /// counts bytes handed to the connection so far.
    fn send<'a>(
        &'a self,
        url: &'a str,
        payload: Bytes,
        progress: Arc<AtomicU64>,
    ) -> BoxFuture<'a, Result<()>>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            // The body is never read; dropping the response closes it.
            self.client
                .get(url)
                .timeout(PROBE_TIMEOUT)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
    }

    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ByteStream>> {
        Box::pin(async move {
            let response = self.client.get(url).send().await?.error_for_status()?;
            let stream = response.bytes_stream().map_err(SpeedTestError::from);
            Ok(stream.boxed())
        })
    }

    fn send<'a>(
        &'a self,
        url: &'a str,
        payload: Bytes,
        progress: Arc<AtomicU64>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let len = payload.len();
            let slices = (0..len).step_by(UPLOAD_SLICE_SIZE).map(move |start| {
                let end = (start + UPLOAD_SLICE_SIZE).min(len);
                payload.slice(start..end)
            });
            let body = stream::iter(slices).map(move |slice| {
                progress.fetch_add(slice.len() as u64, Ordering::Relaxed);
                Ok::<_, std::io::Error>(slice)
            });

            self.client
                .post(url)
                .header(reqwest::header::CONTENT_LENGTH, len)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(reqwest::Body::wrap_stream(body))
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
    }
}

/// Substitute the `{bytes}` placeholder of a byte-source template.
pub fn resolve_url(template: &str, bytes: u64) -> String {
    template.replace("{bytes}", &bytes.to_string())
}

/// Append a unique `cb` query parameter so no intermediary serves a cached copy.
pub fn cache_bust(url: &str) -> Result<String> {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);

    let mut parsed =
        Url::parse(url).map_err(|e| SpeedTestError::InvalidConfig(format!("{url}: {e}")))?;
    let token = format!(
        "{:x}{:04x}",
        rand::random::<u64>(),
        SEQUENCE.fetch_add(1, Ordering::Relaxed) & 0xffff
    );
    parsed.query_pairs_mut().append_pair("cb", &token);
    Ok(parsed.into())
}

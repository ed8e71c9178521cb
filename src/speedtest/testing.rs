//! In-memory transport with scripted timing for deterministic tests.

use super::transport::{ByteStream, Transport};
use crate::error::{Result, SpeedTestError};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Step {
    Chunk(usize),
    Wait(Duration),
    Fail,
    Hang,
}

/// Byte delivery plan for one fetched stream.
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<Step>,
    repeat: Option<usize>,
    refuse: bool,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Yields `chunk`-sized pieces forever.
    pub fn endless(chunk: usize) -> Self {
        Self {
            repeat: Some(chunk),
            ..Self::default()
        }
    }

    /// The fetch itself fails before any byte arrives.
    pub fn refuse() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn chunk(mut self, len: usize) -> Self {
        self.steps.push(Step::Chunk(len));
        self
    }

    pub fn wait_ms(mut self, ms: u64) -> Self {
        self.steps.push(Step::Wait(Duration::from_millis(ms)));
        self
    }

    /// `count` rounds of waiting `ms` then delivering `len` bytes.
    pub fn paced(mut self, count: usize, ms: u64, len: usize) -> Self {
        for _ in 0..count {
            self = self.wait_ms(ms).chunk(len);
        }
        self
    }

    pub fn fail(mut self) -> Self {
        self.steps.push(Step::Fail);
        self
    }

    pub fn hang(mut self) -> Self {
        self.steps.push(Step::Hang);
        self
    }

    fn into_stream(self) -> ByteStream {
        let steps: VecDeque<Step> = self.steps.into();
        stream::unfold((steps, self.repeat), |(mut steps, repeat)| async move {
            loop {
                match steps.pop_front() {
                    Some(Step::Chunk(len)) => {
                        return Some((Ok(Bytes::from(vec![0u8; len])), (steps, repeat)));
                    }
                    Some(Step::Wait(delay)) => tokio::time::sleep(delay).await,
                    Some(Step::Fail) => {
                        let err = SpeedTestError::Transport("connection reset".into());
                        return Some((Err(err), (steps, repeat)));
                    }
                    Some(Step::Hang) => futures::future::pending::<()>().await,
                    None => {
                        let len = repeat?;
                        tokio::task::yield_now().await;
                        return Some((Ok(Bytes::from(vec![0u8; len])), (steps, repeat)));
                    }
                }
            }
        })
        .boxed()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum UploadOutcome {
    Ack,
    Status(u16),
    Hang,
}

pub struct ScriptedTransport {
    downloads: Mutex<VecDeque<Script>>,
    probes: Mutex<VecDeque<Option<Duration>>>,
    upload_delay: Duration,
    upload_outcome: UploadOutcome,
    uploaded: Mutex<Vec<usize>>,
    requested: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            downloads: Mutex::new(VecDeque::new()),
            probes: Mutex::new(VecDeque::new()),
            upload_delay: Duration::ZERO,
            upload_outcome: UploadOutcome::Ack,
            uploaded: Mutex::new(Vec::new()),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn with_download(self, script: Script) -> Self {
        self.downloads.lock().unwrap().push_back(script);
        self
    }

    pub fn with_downloads(self, count: usize, script: Script) -> Self {
        for _ in 0..count {
            self.downloads.lock().unwrap().push_back(script.clone());
        }
        self
    }

    /// Round-trip times in milliseconds; `None` is a failed attempt.
    pub fn with_probes(self, rtts: &[Option<u64>]) -> Self {
        self.probes
            .lock()
            .unwrap()
            .extend(rtts.iter().map(|rtt| rtt.map(Duration::from_millis)));
        self
    }

    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    pub fn with_upload_outcome(mut self, outcome: UploadOutcome) -> Self {
        self.upload_outcome = outcome;
        self
    }

    pub fn uploaded_lengths(&self) -> Vec<usize> {
        self.uploaded.lock().unwrap().clone()
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    fn record(&self, url: &str) {
        self.requested.lock().unwrap().push(url.to_string());
    }
}

impl Transport for ScriptedTransport {
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>> {
        self.record(url);
        let next = self.probes.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(Some(rtt)) => {
                    tokio::time::sleep(rtt).await;
                    Ok(())
                }
                _ => Err(SpeedTestError::Transport("probe timed out".into())),
            }
        })
    }

    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ByteStream>> {
        self.record(url);
        let next = self.downloads.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(script) if !script.refuse => Ok(script.into_stream()),
                _ => Err(SpeedTestError::Transport("connection refused".into())),
            }
        })
    }

    fn send<'a>(
        &'a self,
        url: &'a str,
        payload: Bytes,
        progress: Arc<AtomicU64>,
    ) -> BoxFuture<'a, Result<()>> {
        self.record(url);
        Box::pin(async move {
            self.uploaded.lock().unwrap().push(payload.len());
            progress.fetch_add(payload.len() as u64, Ordering::Relaxed);
            tokio::time::sleep(self.upload_delay).await;
            match self.upload_outcome {
                UploadOutcome::Ack => Ok(()),
                UploadOutcome::Status(status) => Err(SpeedTestError::Protocol { status }),
                UploadOutcome::Hang => futures::future::pending().await,
            }
        })
    }
}

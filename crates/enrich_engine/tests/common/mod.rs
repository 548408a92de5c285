#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::task::{Context, Poll};
use std::time::Duration;

use enrich_core::{Item, ProgressEvent};
use enrich_engine::{
    AssetStore, GenerationProvider, GroupConfig, PersistError, ProviderError, StreamDecoder,
};
use tokio::io::AsyncWrite;
use tokio::sync::Semaphore;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(enrich_logging::initialize_for_tests);
}

/// Provider double: explains `t` as `"explained t"`, synthesizes the bytes of
/// its input, and can be told to fail, stall or report missing credentials.
#[derive(Default)]
pub struct StubProvider {
    failing: HashSet<String>,
    not_ready: bool,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<String>>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    pub fn not_ready(mut self) -> Self {
        self.not_ready = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every `explain` waits for one permit of `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl GenerationProvider for StubProvider {
    fn check_ready(&self) -> Result<(), ProviderError> {
        if self.not_ready {
            return Err(ProviderError::NotConfigured("missing api key".into()));
        }
        Ok(())
    }

    async fn explain(&self, text: &str, config: &GroupConfig) -> Result<String, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("explain:{}:{}", config.key, text));
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(text) {
            return Err(ProviderError::Rejected(format!("cannot explain {text}")));
        }
        Ok(format!("explained {text}"))
    }

    async fn synthesize(&self, text: &str, _config: &GroupConfig) -> Result<Vec<u8>, ProviderError> {
        self.calls.lock().unwrap().push(format!("synthesize:{text}"));
        Ok(text.as_bytes().to_vec())
    }
}

/// Keeps audio in memory and hands out `/assets/{group}/{text}.mp3` paths.
#[derive(Default)]
pub struct MemoryAssets {
    pub stored: Mutex<Vec<(String, Vec<u8>)>>,
}

impl AssetStore for MemoryAssets {
    fn store(&self, text: &str, config: &GroupConfig, audio: &[u8]) -> Result<String, PersistError> {
        let path = format!("/assets/{}/{}.mp3", config.key, text);
        self.stored.lock().unwrap().push((path.clone(), audio.to_vec()));
        Ok(path)
    }
}

/// Writer that records bytes, counts shutdowns and can start failing after
/// a number of writes.
#[derive(Clone, Default)]
pub struct RecordingWriter {
    pub bytes: Arc<Mutex<Vec<u8>>>,
    pub shutdowns: Arc<AtomicUsize>,
    writes: usize,
    fail_after: Option<usize>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(writes: usize) -> Self {
        Self {
            fail_after: Some(writes),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        let bytes = self.bytes.lock().unwrap().clone();
        StreamDecoder::new().push(&bytes)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl AsyncWrite for RecordingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.fail_after.is_some_and(|limit| this.writes >= limit) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")));
        }
        this.writes += 1;
        this.bytes.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

pub fn items(entries: &[(&str, &str, &str)]) -> Vec<Item> {
    entries
        .iter()
        .map(|(id, text, group)| Item::new(*id, *text, *group))
        .collect()
}

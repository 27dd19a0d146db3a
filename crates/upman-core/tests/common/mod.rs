//! Shared helpers: a one-shot HTTP/1.1 server and recording listeners

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use upman_core::{
    UploadEngine, UploadError, UploadEvent, UploadListener, UploadSettings, UploadStatus,
};

/// What the server saw of one request
#[derive(Debug, Default)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Header names are lowercased
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Size of every HTTP chunk received
    pub chunk_sizes: Vec<usize>,
    /// The terminating chunk arrived
    pub complete: bool,
}

impl RecordedRequest {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub struct TestServer {
    pub url: String,
    request: oneshot::Receiver<RecordedRequest>,
}

impl TestServer {
    /// Serve a single request, answering `status` with `body` once the
    /// request body has been fully received
    pub async fn spawn(status: u16, body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let mut reader = BufReader::new(stream);
            let recorded = read_request(&mut reader).await;

            if recorded.complete {
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason(status),
                    body.len(),
                    body
                );
                let stream = reader.get_mut();
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.flush().await;
            }
            let _ = tx.send(recorded);
        });

        Self {
            url: format!("http://{}/upload", addr),
            request: rx,
        }
    }

    /// Answer `status` right after the request head, without reading the
    /// body, then close the connection
    pub async fn spawn_early_reject(status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let mut reader = BufReader::new(stream);
            let mut recorded = RecordedRequest::default();
            read_head(&mut reader, &mut recorded).await;

            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status,
                reason(status)
            );
            let mut stream = reader.into_inner();
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.flush().await;
            let _ = stream.shutdown().await;
            drop(stream);
            let _ = tx.send(recorded);
        });

        Self {
            url: format!("http://{}/upload", addr),
            request: rx,
        }
    }

    /// The request as recorded; fails if nothing arrives in time
    pub async fn recorded(self) -> RecordedRequest {
        tokio::time::timeout(Duration::from_secs(10), self.request)
            .await
            .expect("server saw no request in time")
            .expect("server task dropped")
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        404 => "Not Found",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

async fn read_request<R>(reader: &mut R) -> RecordedRequest
where
    R: AsyncBufRead + Unpin,
{
    let mut recorded = RecordedRequest::default();
    if !read_head(reader, &mut recorded).await {
        return recorded;
    }
    let mut line = String::new();

    let chunked = recorded
        .headers
        .get("transfer-encoding")
        .map(|v| v.eq_ignore_ascii_case("chunked"))
        .unwrap_or(false);

    if chunked {
        loop {
            line.clear();
            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                return recorded;
            }
            let size_field = line.trim_end().split(';').next().unwrap_or("").trim();
            let Ok(size) = usize::from_str_radix(size_field, 16) else {
                return recorded;
            };
            if size == 0 {
                line.clear();
                let _ = reader.read_line(&mut line).await;
                recorded.complete = true;
                return recorded;
            }

            let mut data = vec![0u8; size];
            if reader.read_exact(&mut data).await.is_err() {
                return recorded;
            }
            recorded.chunk_sizes.push(size);
            recorded.body.extend_from_slice(&data);

            let mut crlf = [0u8; 2];
            if reader.read_exact(&mut crlf).await.is_err() {
                return recorded;
            }
        }
    }

    let length = recorded
        .headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut data = vec![0u8; length];
    if reader.read_exact(&mut data).await.is_ok() {
        recorded.body = data;
        recorded.complete = true;
    }
    recorded
}

/// Request line and headers; false if the connection ended first
async fn read_head<R>(reader: &mut R, recorded: &mut RecordedRequest) -> bool
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
        return false;
    }
    let mut parts = line.split_whitespace();
    recorded.method = parts.next().unwrap_or_default().to_string();
    recorded.path = parts.next().unwrap_or_default().to_string();

    loop {
        line.clear();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            return false;
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            return true;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            recorded
                .headers
                .insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }
}

/// Address nothing listens on
pub fn refused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/upload", addr)
}

pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Settings that keep tests away from any proxy in the environment
pub fn test_settings() -> UploadSettings {
    let mut settings = UploadSettings::default();
    settings.proxy.mode = "none".to_string();
    settings
}

/// Wait for the transfer to end and collect what the listener saw
pub async fn finish(
    engine: &UploadEngine,
    rx: &mut mpsc::UnboundedReceiver<UploadEvent>,
) -> Vec<UploadEvent> {
    tokio::time::timeout(Duration::from_secs(10), engine.wait())
        .await
        .expect("upload did not finish in time");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn progress_values(events: &[UploadEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            UploadEvent::Progress { sent } => Some(*sent),
            _ => None,
        })
        .collect()
}

pub fn terminal_count(events: &[UploadEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

/// When [`CancellingListener`] pulls the brake
#[derive(Debug, Clone, Copy)]
pub enum CancelPoint {
    /// From another OS thread as the file part begins
    StartFromOtherThread,
    /// Inline on the first progress notification
    FirstProgress,
}

/// Records events and cancels its own engine at a chosen point
pub struct CancellingListener {
    events: mpsc::UnboundedSender<UploadEvent>,
    engine: OnceLock<Weak<UploadEngine>>,
    point: CancelPoint,
}

impl CancellingListener {
    pub fn new(events: mpsc::UnboundedSender<UploadEvent>, point: CancelPoint) -> Arc<Self> {
        Arc::new(Self {
            events,
            engine: OnceLock::new(),
            point,
        })
    }

    pub fn attach(&self, engine: &Arc<UploadEngine>) {
        let _ = self.engine.set(Arc::downgrade(engine));
    }

    fn engine(&self) -> Option<Arc<UploadEngine>> {
        self.engine.get().and_then(Weak::upgrade)
    }
}

impl UploadListener for CancellingListener {
    fn on_pre(&self) {
        self.events.on_pre();
    }

    fn on_post_pre(&self, total: u64) {
        self.events.on_post_pre(total);
    }

    fn on_start(&self) {
        self.events.on_start();
        if let (CancelPoint::StartFromOtherThread, Some(engine)) = (self.point, self.engine()) {
            std::thread::spawn(move || engine.cancel()).join().unwrap();
        }
    }

    fn on_progress(&self, sent: u64) {
        self.events.on_progress(sent);
        if let (CancelPoint::FirstProgress, Some(engine)) = (self.point, self.engine()) {
            engine.cancel();
        }
    }

    fn on_cancel(&self) {
        self.events.on_cancel();
    }

    fn on_complete(&self, response: &str) {
        self.events.on_complete(response);
    }

    fn on_fail(&self, error: &UploadError) {
        self.events.on_fail(error);
    }
}

/// What the engine reported about itself inside one callback
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub callback: &'static str,
    pub running: bool,
    pub state: UploadStatus,
}

/// Samples `is_running()` and `state()` of its own engine in every callback
pub struct StateRecorder {
    engine: OnceLock<Weak<UploadEngine>>,
    seen: parking_lot::Mutex<Vec<Observation>>,
}

impl StateRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            engine: OnceLock::new(),
            seen: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub fn attach(&self, engine: &Arc<UploadEngine>) {
        let _ = self.engine.set(Arc::downgrade(engine));
    }

    pub fn observations(&self) -> Vec<Observation> {
        self.seen.lock().clone()
    }

    fn sample(&self, callback: &'static str) {
        if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
            self.seen.lock().push(Observation {
                callback,
                running: engine.is_running(),
                state: engine.state(),
            });
        }
    }
}

impl UploadListener for StateRecorder {
    fn on_post_pre(&self, _total: u64) {
        self.sample("post_pre");
    }

    fn on_start(&self) {
        self.sample("start");
    }

    fn on_progress(&self, _sent: u64) {
        self.sample("progress");
    }

    fn on_cancel(&self) {
        self.sample("cancel");
    }

    fn on_complete(&self, _response: &str) {
        self.sample("complete");
    }

    fn on_fail(&self, _error: &UploadError) {
        self.sample("fail");
    }
}

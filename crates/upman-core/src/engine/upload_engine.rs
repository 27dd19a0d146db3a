//! Upload engine - public handle for one upload
//!
//! Construction validates the task without touching the network or the
//! filesystem. `start` spawns the transfer and returns at once; the outcome
//! arrives only through the listener.

use crate::engine::listener::UploadListener;
use crate::engine::transfer::{validate_proxy, Transfer, TransferControl};
use crate::error::UploadError;
use crate::multipart::MultipartEncoder;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use upman_types::{UploadSettings, UploadStatus, UploadTask};

/// Streams one file plus form fields to an HTTP endpoint
pub struct UploadEngine {
    task: Arc<UploadTask>,
    settings: UploadSettings,
    headers: HeaderMap,
    encoder: MultipartEncoder,
    listener: Arc<dyn UploadListener>,
    control: Arc<TransferControl>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl UploadEngine {
    /// Create an engine with default settings
    pub fn new(task: UploadTask, listener: Arc<dyn UploadListener>) -> Result<Self, UploadError> {
        Self::with_settings(task, listener, UploadSettings::default())
    }

    /// Create an engine with explicit settings
    pub fn with_settings(
        task: UploadTask,
        listener: Arc<dyn UploadListener>,
        settings: UploadSettings,
    ) -> Result<Self, UploadError> {
        validate_settings(&settings)?;
        validate_task(&task)?;

        let encoder = MultipartEncoder::new(task.charset.clone());
        let headers = request_headers(&task, &settings, &encoder)?;
        debug!("Upload {} prepared with boundary {}", task.id, encoder.boundary());

        Ok(Self {
            task: Arc::new(task),
            settings,
            headers,
            encoder,
            listener,
            control: Arc::new(TransferControl::default()),
            handle: Mutex::new(None),
        })
    }

    /// Spawn the transfer on the current Tokio runtime.
    ///
    /// An engine runs once: a second call fails with
    /// [`UploadError::AlreadyRunning`] while the transfer is in flight and
    /// with [`UploadError::AlreadyFinished`] afterwards. Outside a Tokio
    /// runtime it fails with [`UploadError::NoRuntime`] and stays idle.
    pub fn start(&self) -> Result<(), UploadError> {
        let mut handle = self.handle.lock();
        match self.control.state() {
            UploadStatus::Idle => {}
            status if status.is_terminal() => return Err(UploadError::AlreadyFinished),
            _ => return Err(UploadError::AlreadyRunning),
        }
        let runtime = Handle::try_current().map_err(|_| UploadError::NoRuntime)?;

        self.control.reset_cancel();
        self.control.set_state(UploadStatus::Connecting);

        let transfer = Transfer {
            task: Arc::clone(&self.task),
            settings: self.settings.clone(),
            headers: self.headers.clone(),
            encoder: self.encoder.clone(),
            listener: Arc::clone(&self.listener),
            control: Arc::clone(&self.control),
        };
        *handle = Some(runtime.spawn(transfer.run()));

        Ok(())
    }

    /// Ask the transfer to stop before its next chunk.
    ///
    /// Safe from any thread. A no-op before `start` and once the transfer
    /// has reached a terminal state.
    pub fn cancel(&self) {
        let status = self.control.state();
        if status == UploadStatus::Idle || status.is_terminal() {
            debug!("Upload {}: cancel ignored in state {:?}", self.task.id, status);
            return;
        }
        self.control.request_cancel();
        info!("Upload {} cancel requested", self.task.id);
    }

    /// Wait for the spawned transfer to finish
    pub async fn wait(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Upload {} task ended abnormally: {}", self.task.id, e);
            }
        }
    }

    /// True only while file chunks are actively being written
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn state(&self) -> UploadStatus {
        self.control.state()
    }

    /// File bytes written so far
    pub fn bytes_sent(&self) -> u64 {
        self.control.bytes_sent()
    }

    pub fn boundary(&self) -> &str {
        self.encoder.boundary()
    }

    pub fn task(&self) -> &UploadTask {
        &self.task
    }
}

fn validate_settings(settings: &UploadSettings) -> Result<(), UploadError> {
    if settings.read_buffer_size == 0 {
        return Err(UploadError::InvalidDescriptor(
            "read buffer size must be greater than zero".to_string(),
        ));
    }
    if settings.stream_chunk_size == 0 {
        return Err(UploadError::InvalidDescriptor(
            "stream chunk size must be greater than zero".to_string(),
        ));
    }
    validate_proxy(&settings.proxy)
}

fn validate_task(task: &UploadTask) -> Result<(), UploadError> {
    if task.url.trim().is_empty() {
        return Err(UploadError::InvalidDescriptor("upload URL is missing".to_string()));
    }
    let parsed = url::Url::parse(&task.url)
        .map_err(|e| UploadError::InvalidDescriptor(format!("invalid URL {}: {}", task.url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(UploadError::InvalidDescriptor(format!(
            "unsupported URL scheme: {}",
            parsed.scheme()
        )));
    }

    if task.file_path.as_os_str().is_empty() {
        return Err(UploadError::InvalidDescriptor("file path is missing".to_string()));
    }
    if task.attachment.is_empty() {
        return Err(UploadError::InvalidDescriptor(
            "attachment field name is missing".to_string(),
        ));
    }
    if task.content_type.is_empty() {
        return Err(UploadError::InvalidDescriptor("content type is missing".to_string()));
    }
    Ok(())
}

/// Engine headers first, then caller headers, which replace same-named ones
fn request_headers(
    task: &UploadTask,
    settings: &UploadSettings,
    encoder: &MultipartEncoder,
) -> Result<HeaderMap, UploadError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        header_value(&encoder.content_type_header(&task.content_type))?,
    );
    let user_agent = task
        .user_agent
        .as_deref()
        .unwrap_or(&settings.default_user_agent);
    headers.insert(USER_AGENT, header_value(user_agent)?);

    for (name, value) in &task.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| UploadError::InvalidDescriptor(format!("invalid header name: {}", name)))?;
        headers.insert(name, header_value(value)?);
    }
    Ok(headers)
}

fn header_value(value: &str) -> Result<HeaderValue, UploadError> {
    HeaderValue::from_str(value)
        .map_err(|_| UploadError::InvalidDescriptor(format!("invalid header value: {:?}", value)))
}

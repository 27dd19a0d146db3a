//! Transfer - the sequential body of one upload
//!
//! Runs on a single spawned task from the file check to the response drain.
//! The only state shared with the outside is [`TransferControl`].

use crate::engine::body_writer::{body_channel, BodyWriter};
use crate::engine::listener::UploadListener;
use crate::error::UploadError;
use crate::multipart::MultipartEncoder;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use upman_types::{ProxySettings, UploadSettings, UploadStatus, UploadTask};

type RequestHandle = JoinHandle<Result<Response, reqwest::Error>>;

/// Atomics shared between the transfer task and its callers
#[derive(Debug, Default)]
pub(crate) struct TransferControl {
    state: AtomicU8,
    cancelled: AtomicBool,
    running: AtomicBool,
    bytes_sent: AtomicU64,
}

impl TransferControl {
    pub(crate) fn state(&self) -> UploadStatus {
        status_from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, status: UploadStatus) {
        self.state.store(status as u8, Ordering::Release);
    }

    pub(crate) fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Acquire)
    }

    fn add_sent(&self, n: u64) -> u64 {
        self.bytes_sent.fetch_add(n, Ordering::AcqRel) + n
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }
}

fn status_from_u8(value: u8) -> UploadStatus {
    match value {
        1 => UploadStatus::Connecting,
        2 => UploadStatus::SendingFields,
        3 => UploadStatus::StreamingBody,
        4 => UploadStatus::Finishing,
        5 => UploadStatus::Completed,
        6 => UploadStatus::Cancelled,
        7 => UploadStatus::Failed,
        _ => UploadStatus::Idle,
    }
}

/// Everything one spawned transfer needs, owned by the task
pub(crate) struct Transfer {
    pub(crate) task: Arc<UploadTask>,
    pub(crate) settings: UploadSettings,
    pub(crate) headers: HeaderMap,
    pub(crate) encoder: MultipartEncoder,
    pub(crate) listener: Arc<dyn UploadListener>,
    pub(crate) control: Arc<TransferControl>,
}

impl Transfer {
    /// Run to a terminal state and deliver exactly one terminal callback
    pub(crate) async fn run(self) {
        let id = self.task.id;
        info!("Starting upload {}: {} -> {}", id, self.task.file_path.display(), self.task.url);

        let outcome = self.transfer().await;
        self.control.set_running(false);

        match outcome {
            Ok(response) => {
                self.control.set_state(UploadStatus::Completed);
                info!(
                    "Upload {} completed ({} bytes sent)",
                    id,
                    self.control.bytes_sent()
                );
                self.listener.on_complete(&response);
            }
            Err(UploadError::Cancelled) => {
                self.control.set_state(UploadStatus::Cancelled);
                info!(
                    "Upload {} cancelled after {} bytes",
                    id,
                    self.control.bytes_sent()
                );
                self.listener.on_cancel();
            }
            Err(e) => {
                self.control.set_state(UploadStatus::Failed);
                error!("Upload {} failed: {}", id, e);
                self.listener.on_fail(&e);
            }
        }
    }

    async fn transfer(&self) -> Result<String, UploadError> {
        let path = &self.task.file_path;
        let total = match fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata.len(),
            _ => {
                warn!("Upload {}: file {} does not exist", self.task.id, path.display());
                return Err(UploadError::FileNotFound(path.clone()));
            }
        };

        self.listener.on_pre();

        let client = build_client(&self.settings)?;
        let (writer, body) = body_channel(self.settings.stream_chunk_size);
        let request = client
            .post(&self.task.url)
            .headers(self.headers.clone())
            .body(body);

        debug!("Upload {}: connecting to {}", self.task.id, self.task.url);
        let request: RequestHandle = tokio::spawn(request.send());

        self.listener.on_post_pre(total);

        match self.stream_body(writer).await {
            Ok(()) => self.finish(request).await,
            Err(e) => Err(resolve_body_failure(request, e).await),
        }
    }

    /// Write all parts; on error the body is aborted before returning
    async fn stream_body(&self, mut writer: BodyWriter) -> Result<(), UploadError> {
        match self.write_parts(&mut writer).await {
            Ok(()) => {
                debug!(
                    "Upload {}: request body complete ({} bytes on the wire)",
                    self.task.id,
                    writer.written()
                );
                writer.finish();
                Ok(())
            }
            Err(e) => {
                writer.abort();
                Err(e)
            }
        }
    }

    async fn write_parts(&self, writer: &mut BodyWriter) -> Result<(), UploadError> {
        self.control.set_state(UploadStatus::SendingFields);
        for (name, value) in &self.task.form_fields {
            debug!("Upload {}: writing field {}", self.task.id, name);
            writer.write(self.encoder.field_part(name, value)).await?;
        }

        self.listener.on_start();

        let file_name = self.task.file_name();
        writer
            .write(self.encoder.file_part_header(&self.task.attachment, &file_name))
            .await?;

        self.control.set_state(UploadStatus::StreamingBody);
        let mut file = match File::open(&self.task.file_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(UploadError::FileNotFound(self.task.file_path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut buffer = vec![0u8; self.settings.read_buffer_size];
        let streamed = self.stream_file(&mut file, &mut buffer, writer).await;
        self.control.set_running(false);
        drop(file);
        streamed?;

        if self.control.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        self.control.set_state(UploadStatus::Finishing);
        writer.write(self.encoder.file_part_trailer()).await?;
        writer.write(self.encoder.closing()).await?;
        Ok(())
    }

    /// Copy the file chunk by chunk, honouring cancellation between chunks
    async fn stream_file(
        &self,
        file: &mut File,
        buffer: &mut [u8],
        writer: &mut BodyWriter,
    ) -> Result<(), UploadError> {
        loop {
            if self.control.is_cancelled() {
                break;
            }

            let n = read_chunk(file, buffer).await?;
            if n == 0 {
                break;
            }

            writer.write(Bytes::copy_from_slice(&buffer[..n])).await?;
            let sent = self.control.add_sent(n as u64);
            self.control.set_running(true);
            self.listener.on_progress(sent);
        }
        Ok(())
    }

    /// Read the response once the body has been fully handed over
    async fn finish(&self, request: RequestHandle) -> Result<String, UploadError> {
        let response = join_request(request).await?;
        let status = response.status();
        if !status.is_success() {
            warn!("Upload {}: server answered {}", self.task.id, status.as_u16());
            return Err(UploadError::ServerRejection {
                status: status.as_u16(),
            });
        }

        let text = response.text().await?;
        Ok(text.lines().collect())
    }
}

/// Turn a failed body write into the error that best explains it
async fn resolve_body_failure(request: RequestHandle, err: UploadError) -> UploadError {
    match err {
        // The transport dropped the body; the request's own result says why.
        // A server that answers early and closes usually surfaces here as a
        // transport error without a status. The status is only known when
        // the response head was read before the connection went away.
        UploadError::Io(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            match join_request(request).await {
                Err(transport) => transport,
                Ok(response) if !response.status().is_success() => {
                    UploadError::ServerRejection {
                        status: response.status().as_u16(),
                    }
                }
                Ok(_) => UploadError::Io(e),
            }
        }
        other => {
            request.abort();
            let _ = request.await;
            other
        }
    }
}

async fn join_request(request: RequestHandle) -> Result<Response, UploadError> {
    match request.await {
        Ok(result) => Ok(result?),
        Err(e) => Err(UploadError::Io(io::Error::other(e))),
    }
}

/// Fill `buffer` unless the file ends first
async fn read_chunk(file: &mut File, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = file.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Reject manual proxy URLs the client builder would refuse
pub(crate) fn validate_proxy(proxy: &ProxySettings) -> Result<(), UploadError> {
    if proxy.mode != "manual" {
        return Ok(());
    }
    if let Some(url) = &proxy.http_proxy {
        reqwest::Proxy::http(url).map_err(|e| {
            UploadError::InvalidDescriptor(format!("invalid HTTP proxy {}: {}", url, e))
        })?;
    }
    if let Some(url) = &proxy.https_proxy {
        reqwest::Proxy::https(url).map_err(|e| {
            UploadError::InvalidDescriptor(format!("invalid HTTPS proxy {}: {}", url, e))
        })?;
    }
    Ok(())
}

/// One client per transfer; idle connections are never kept for reuse
fn build_client(settings: &UploadSettings) -> Result<Client, UploadError> {
    let mut builder = Client::builder().pool_max_idle_per_host(0);
    if let Some(secs) = settings.connect_timeout_secs {
        builder = builder.connect_timeout(Duration::from_secs(secs));
    }

    let proxy = &settings.proxy;
    match proxy.mode.as_str() {
        "none" => builder = builder.no_proxy(),
        "manual" => {
            if let Some(url) = &proxy.http_proxy {
                builder = builder.proxy(manual_proxy(reqwest::Proxy::http(url)?, proxy));
            }
            if let Some(url) = &proxy.https_proxy {
                builder = builder.proxy(manual_proxy(reqwest::Proxy::https(url)?, proxy));
            }
        }
        _ => {}
    }

    Ok(builder.build()?)
}

fn manual_proxy(mut target: reqwest::Proxy, settings: &ProxySettings) -> reqwest::Proxy {
    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        target = target.basic_auth(username, password);
    }
    target.no_proxy(
        settings
            .no_proxy
            .as_deref()
            .and_then(reqwest::NoProxy::from_string),
    )
}

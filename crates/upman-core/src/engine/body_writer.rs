//! Request body writer - the engine's output stream
//!
//! The HTTP request body is a stream fed through a small bounded channel.
//! Every write is split into frames of at most `chunk_size` bytes, and each
//! frame goes out as one HTTP chunk. A write returns once the transport has
//! room for all of its frames, so memory use stays bounded no matter how
//! large the file is.

use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

/// Frames queued between the writer and the transport
const FRAME_QUEUE_DEPTH: usize = 4;

type BodyFrame = Result<Bytes, io::Error>;

/// Create a writer and the request body it feeds
pub fn body_channel(chunk_size: usize) -> (BodyWriter, reqwest::Body) {
    let (writer, frames) = frame_channel(chunk_size);
    (writer, reqwest::Body::wrap_stream(frames))
}

fn frame_channel(
    chunk_size: usize,
) -> (BodyWriter, impl Stream<Item = BodyFrame> + Send + 'static) {
    let (tx, rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
    let aborted = Arc::new(AtomicBool::new(false));

    // Once aborted, the next poll yields an error even if queued frames
    // remain or the sender is gone, so the body can never end cleanly.
    let flag = Arc::clone(&aborted);
    let frames = ReceiverStream::new(rx)
        .map(Some)
        .chain(tokio_stream::once(None))
        .filter_map(move |frame| {
            if flag.load(Ordering::Acquire) {
                return Some(Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "request body aborted",
                )));
            }
            frame
        });

    let writer = BodyWriter {
        tx: Some(tx),
        aborted,
        chunk_size: chunk_size.max(1),
        written: 0,
    };
    (writer, frames)
}

/// Writes framed bytes into a streaming request body
#[derive(Debug)]
pub struct BodyWriter {
    tx: Option<mpsc::Sender<BodyFrame>>,
    aborted: Arc<AtomicBool>,
    chunk_size: usize,
    written: u64,
}

impl BodyWriter {
    /// Total bytes accepted so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Write `data`, waiting for the transport to accept every frame.
    ///
    /// Fails with `BrokenPipe` once the transport has dropped the body,
    /// which happens when the request itself failed or the server closed
    /// the connection early. The request's own result explains why.
    pub async fn write(&mut self, data: impl Into<Bytes>) -> io::Result<()> {
        let data: Bytes = data.into();
        let tx = self.tx.as_ref().ok_or_else(closed)?;

        // Empty frames are never sent: an empty chunk ends a chunked body.
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.chunk_size).min(data.len());
            tx.send(Ok(data.slice(offset..end)))
                .await
                .map_err(|_| closed())?;
            offset = end;
        }

        self.written += data.len() as u64;
        Ok(())
    }

    /// End the body normally; the transport sends the terminating chunk
    pub fn finish(mut self) {
        self.tx.take();
    }

    /// Fail the body so the transport drops the connection instead of
    /// completing the request
    pub fn abort(mut self) {
        self.aborted.store(true, Ordering::Release);
        self.tx.take();
    }
}

fn closed() -> io::Error {
    io::Error::new(
        io::ErrorKind::BrokenPipe,
        "connection closed while sending request body",
    )
}

//! Transfer notifications
//!
//! Every callback runs synchronously on the transfer task, in this order:
//! `on_pre`, `on_post_pre`, `on_start`, any number of `on_progress`, then
//! exactly one of `on_cancel`, `on_complete` or `on_fail`. Early failures
//! skip straight to `on_fail`. Keep implementations short; a slow callback
//! stalls the upload.

use crate::error::UploadError;
use tokio::sync::{broadcast, mpsc};
use upman_types::UploadEvent;

/// Observer of a single upload
pub trait UploadListener: Send + Sync {
    /// The file exists and the connection is about to be opened
    fn on_pre(&self) {}

    /// The request body is open; `total` is the file size in bytes
    fn on_post_pre(&self, _total: u64) {}

    /// Form fields are written and the file part begins
    fn on_start(&self) {}

    /// `sent` file bytes have been written so far
    fn on_progress(&self, _sent: u64) {}

    fn on_cancel(&self) {}

    /// The server accepted the upload; `response` is its body with line
    /// breaks removed. Any 2xx status counts, so a 201 or a bodiless 204
    /// lands here too.
    fn on_complete(&self, _response: &str) {}

    fn on_fail(&self, _error: &UploadError) {}
}

/// Channel form of a failure notification
pub fn fail_event(error: &UploadError) -> UploadEvent {
    UploadEvent::Fail {
        message: error.to_string(),
        status_code: error.status_code(),
    }
}

impl UploadListener for mpsc::UnboundedSender<UploadEvent> {
    fn on_pre(&self) {
        let _ = self.send(UploadEvent::Pre);
    }

    fn on_post_pre(&self, total: u64) {
        let _ = self.send(UploadEvent::PostPre { total });
    }

    fn on_start(&self) {
        let _ = self.send(UploadEvent::Start);
    }

    fn on_progress(&self, sent: u64) {
        let _ = self.send(UploadEvent::Progress { sent });
    }

    fn on_cancel(&self) {
        let _ = self.send(UploadEvent::Cancel);
    }

    fn on_complete(&self, response: &str) {
        let _ = self.send(UploadEvent::Complete {
            response: response.to_string(),
        });
    }

    fn on_fail(&self, error: &UploadError) {
        let _ = self.send(fail_event(error));
    }
}

impl UploadListener for broadcast::Sender<UploadEvent> {
    fn on_pre(&self) {
        let _ = self.send(UploadEvent::Pre);
    }

    fn on_post_pre(&self, total: u64) {
        let _ = self.send(UploadEvent::PostPre { total });
    }

    fn on_start(&self) {
        let _ = self.send(UploadEvent::Start);
    }

    fn on_progress(&self, sent: u64) {
        let _ = self.send(UploadEvent::Progress { sent });
    }

    fn on_cancel(&self) {
        let _ = self.send(UploadEvent::Cancel);
    }

    fn on_complete(&self, response: &str) {
        let _ = self.send(UploadEvent::Complete {
            response: response.to_string(),
        });
    }

    fn on_fail(&self, error: &UploadError) {
        let _ = self.send(fail_event(error));
    }
}

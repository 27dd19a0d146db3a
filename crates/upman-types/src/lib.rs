//! Shared types for UpMan
//!
//! This crate contains the plain data structures exchanged between the
//! upload engine and whatever drives it (task builders, schedulers, UIs).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

// ============================================================================
// Upload Task Types
// ============================================================================

/// Default multipart content type for the request
pub const DEFAULT_CONTENT_TYPE: &str = "multipart/form-data";

/// Default charset announced on text form fields
pub const DEFAULT_CHARSET: &str = "utf-8";

/// Default form field name carrying the file
pub const DEFAULT_ATTACHMENT: &str = "file";

/// Describes a single file upload: where to send it and what to send with it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTask {
    pub id: Uuid,
    pub url: String,
    pub file_path: PathBuf,
    /// Form field name of the file part
    #[serde(default = "default_attachment")]
    pub attachment: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default = "default_charset")]
    pub charset: String,
    /// Overrides the engine's default user agent when set
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Text fields sent ahead of the file, in key order
    #[serde(default)]
    pub form_fields: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

fn default_attachment() -> String {
    DEFAULT_ATTACHMENT.to_string()
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

fn default_charset() -> String {
    DEFAULT_CHARSET.to_string()
}

impl UploadTask {
    pub fn new(url: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            file_path: file_path.into(),
            attachment: default_attachment(),
            content_type: default_content_type(),
            charset: default_charset(),
            user_agent: None,
            headers: BTreeMap::new(),
            form_fields: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_attachment(mut self, attachment: impl Into<String>) -> Self {
        self.attachment = attachment.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form_fields.insert(name.into(), value.into());
        self
    }

    /// File name sent in the file part's `Content-Disposition`
    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string())
    }
}

/// State of a single transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    #[default]
    Idle,
    Connecting,
    SendingFields,
    StreamingBody,
    Finishing,
    Completed,
    Cancelled,
    Failed,
}

impl UploadStatus {
    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Cancelled | UploadStatus::Failed
        )
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSettings {
    /// Bytes read from the file per progress step
    pub read_buffer_size: usize,
    /// Maximum size of a single HTTP chunk on the wire
    pub stream_chunk_size: usize,
    /// User agent used when the task does not carry one
    pub default_user_agent: String,
    /// Connection timeout; none by default, callers wrap the engine if they need one
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    /// Proxy configuration
    #[serde(default)]
    pub proxy: ProxySettings,
}

/// Proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Proxy mode: "none", "system", or "manual"
    #[serde(default = "default_proxy_mode")]
    pub mode: String,
    /// HTTP proxy URL (for manual mode)
    pub http_proxy: Option<String>,
    /// HTTPS proxy URL (for manual mode)
    pub https_proxy: Option<String>,
    /// Bypass proxy for these hosts (comma-separated)
    pub no_proxy: Option<String>,
    /// Proxy authentication username
    pub username: Option<String>,
    /// Proxy authentication password
    pub password: Option<String>,
}

fn default_proxy_mode() -> String {
    "system".to_string()
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            mode: default_proxy_mode(),
            http_proxy: None,
            https_proxy: None,
            no_proxy: None,
            username: None,
            password: None,
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            read_buffer_size: 4096,
            stream_chunk_size: 1024,
            default_user_agent: format!("UpMan/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout_secs: None,
            proxy: ProxySettings::default(),
        }
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Transfer notifications in channel form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum UploadEvent {
    Pre,
    PostPre {
        total: u64,
    },
    Start,
    Progress {
        sent: u64,
    },
    Cancel,
    Complete {
        response: String,
    },
    Fail {
        message: String,
        /// Set when the server answered with a non-success status
        status_code: Option<u16>,
    },
}

impl UploadEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadEvent::Cancel | UploadEvent::Complete { .. } | UploadEvent::Fail { .. }
        )
    }
}

//! multipart/form-data framing
//!
//! Renders the parts of an upload body. The engine writes them in order:
//! one [`MultipartEncoder::field_part`] per form field, the file part header,
//! the raw file bytes, the file part trailer and finally the closing marker.

use uuid::Uuid;

const PREFIX: &str = "--";
const CRLF: &str = "\r\n";

/// Fallback when the file extension says nothing useful
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Encodes parts delimited by a boundary generated once per encoder
#[derive(Debug, Clone)]
pub struct MultipartEncoder {
    boundary: String,
    charset: String,
}

impl MultipartEncoder {
    /// Create an encoder with a fresh random boundary
    pub fn new(charset: impl Into<String>) -> Self {
        Self::with_boundary(Uuid::new_v4().to_string(), charset)
    }

    /// Create an encoder with a caller-chosen boundary
    pub fn with_boundary(boundary: impl Into<String>, charset: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            charset: charset.into(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value of the request's `Content-Type` header
    pub fn content_type_header(&self, content_type: &str) -> String {
        format!("{}; boundary={}", content_type, self.boundary)
    }

    /// A complete text part for one form field
    pub fn field_part(&self, name: &str, value: &str) -> Vec<u8> {
        let mut part = String::with_capacity(128 + name.len() + value.len());
        self.push_delimiter(&mut part);
        part.push_str("Content-Disposition: form-data; name=\"");
        part.push_str(&escape_quoted(name));
        part.push('"');
        part.push_str(CRLF);
        part.push_str("Content-Type: text/plain; charset=");
        part.push_str(&self.charset);
        part.push_str(CRLF);
        part.push_str(CRLF);
        part.push_str(value);
        part.push_str(CRLF);
        part.into_bytes()
    }

    /// Everything of the file part that precedes the raw file bytes
    pub fn file_part_header(&self, attachment: &str, file_name: &str) -> Vec<u8> {
        let mut part = String::with_capacity(192 + attachment.len() + file_name.len());
        self.push_delimiter(&mut part);
        part.push_str("Content-Disposition: form-data; name=\"");
        part.push_str(&escape_quoted(attachment));
        part.push_str("\"; filename=\"");
        part.push_str(&escape_quoted(file_name));
        part.push('"');
        part.push_str(CRLF);
        part.push_str("Content-Type: ");
        part.push_str(&guess_mime(file_name));
        part.push_str(CRLF);
        part.push_str("Content-Transfer-Encoding: binary");
        part.push_str(CRLF);
        part.push_str(CRLF);
        part.into_bytes()
    }

    /// Terminates the raw file bytes
    pub fn file_part_trailer(&self) -> &'static [u8] {
        CRLF.as_bytes()
    }

    /// The `--<boundary>--` marker ending the body
    pub fn closing(&self) -> Vec<u8> {
        format!("{PREFIX}{}{PREFIX}{CRLF}", self.boundary).into_bytes()
    }

    fn push_delimiter(&self, out: &mut String) {
        out.push_str(PREFIX);
        out.push_str(&self.boundary);
        out.push_str(CRLF);
    }
}

/// Best-effort MIME type from a file name's extension
pub fn guess_mime(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or(OCTET_STREAM)
        .to_string()
}

/// Percent-encode the characters that would end a quoted header parameter
fn escape_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => escaped.push_str("%22"),
            '\r' => escaped.push_str("%0D"),
            '\n' => escaped.push_str("%0A"),
            _ => escaped.push(c),
        }
    }
    escaped
}

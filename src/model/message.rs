//! Loaded messages and the MIME parts borrowed from them.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::parser::header::{decode_encoded_words, HeaderMap};

/// Subject fragment used to identify test messages, e.g. `[3] zip-in-base64`.
static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[0-9]\] \S+").expect("valid label regex"));

/// A single message file, read to completion.
///
/// Immutable once parsed; the body is kept raw and walked on demand.
#[derive(Debug, Clone)]
pub struct Message {
    /// File the message was read from.
    pub path: PathBuf,

    /// Top-level header fields.
    pub headers: HeaderMap,

    /// Everything after the blank line that ends the header block.
    pub body: Vec<u8>,
}

impl Message {
    /// Decoded `Subject` header (RFC 2047 encoded-words resolved).
    pub fn subject(&self) -> Option<String> {
        self.headers.get("subject").map(decode_encoded_words)
    }

    /// Top-level `Content-Type` header value, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// Human-readable identifier for reports.
    ///
    /// The `[N] token` fragment of the subject when present, otherwise the
    /// whole subject, otherwise the file name.
    pub fn label(&self) -> String {
        let subject = self.subject().unwrap_or_default();
        if let Some(m) = LABEL_RE.find(&subject) {
            return m.as_str().to_string();
        }
        let subject = subject.trim();
        if !subject.is_empty() {
            return subject.to_string();
        }
        file_label(&self.path)
    }
}

/// Last path component, or the whole path when there is none.
pub(crate) fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// One section of a multipart body.
///
/// `body` borrows from the enclosing body, between this part's header block
/// and the next delimiter, so a part can never be read past its own end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part<'a> {
    pub headers: HeaderMap,
    pub body: &'a [u8],
    /// The stream ended before this part's closing delimiter.
    pub truncated: bool,
}

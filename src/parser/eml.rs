//! Loader for individual message files (RFC 5322 messages, `.eml`).

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Anomaly, Diagnosed, LoadError};
use crate::model::attachment::Attachment;
use crate::model::message::Message;
use crate::parser::content_type::resolve_boundary;
use crate::parser::header::{split_header_block, HeaderMap};
use crate::parser::multipart::Walker;

/// Default maximum message size in bytes (256 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 256 * 1024 * 1024;

/// Read and parse a message file with the default size limit.
pub fn load(path: impl AsRef<Path>) -> Result<Message, LoadError> {
    load_with_limit(path, DEFAULT_MAX_MESSAGE_SIZE)
}

/// Read and parse a message file, refusing files larger than `max_size`.
///
/// Directories and other non-regular files are [`LoadError::NotReadable`].
pub fn load_with_limit(path: impl AsRef<Path>, max_size: u64) -> Result<Message, LoadError> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path).map_err(|e| LoadError::io(path, e))?;
    if !metadata.is_file() {
        return Err(LoadError::NotReadable {
            path: path.to_path_buf(),
            reason: "not a regular file".into(),
        });
    }
    if metadata.len() > max_size {
        return Err(LoadError::TooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit: max_size,
        });
    }

    let data = std::fs::read(path).map_err(|e| LoadError::io(path, e))?;
    parse_message(path, &data)
}

/// Parse raw message bytes.
///
/// A leading BOM and mbox `From ` line are skipped. Fails only when not a
/// single header field can be found.
pub fn parse_message(path: impl Into<PathBuf>, raw: &[u8]) -> Result<Message, LoadError> {
    let path = path.into();
    let data = skip_from_line(raw);

    let (header_bytes, body, terminated) = split_header_block(data);
    let headers = HeaderMap::parse(header_bytes);
    if headers.is_empty() {
        return Err(LoadError::MalformedHeaders(path));
    }
    if !terminated {
        debug!(path = %path.display(), "Header block runs to end of file, body is empty");
    }

    Ok(Message {
        path,
        headers,
        body: body.to_vec(),
    })
}

/// Resolve the top-level boundary and walk the body.
///
/// A message that is not multipart has no attachments; that is not an
/// anomaly. An unparsable top-level `Content-Type` is.
pub fn attachments(message: &Message, walker: &Walker) -> Diagnosed<Vec<Attachment>> {
    let label = message.label();
    let Some(content_type) = message.content_type() else {
        info!(message = %label, "No Content-Type, not multipart");
        return Diagnosed::clean(Vec::new());
    };

    match resolve_boundary(content_type) {
        Ok(Some(boundary)) => {
            debug!(message = %label, boundary = %boundary, "Walking multipart body");
            walker.walk(&message.body, &boundary)
        }
        Ok(None) => {
            info!(message = %label, content_type, "Not multipart");
            Diagnosed::clean(Vec::new())
        }
        Err(anomaly) => {
            warn!(message = %label, %anomaly, "Not multipart");
            Diagnosed::partial(Vec::new(), anomaly)
        }
    }
}

/// Skip a UTF-8 BOM and the `From ` separator line of mbox-style files.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);

    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}

/// `true` when an empty [`attachments`] result comes from broken input
/// rather than from a message that simply has no attachments.
pub fn is_broken(result: &Diagnosed<Vec<Attachment>>) -> bool {
    result.value.is_empty()
        && result
            .anomalies
            .iter()
            .any(|a| matches!(a, Anomaly::Framing(_) | Anomaly::ContentType { .. }))
}

//! Decoded attachments.

/// A named, decoded payload extracted from a MIME part.
///
/// Only parts that carry a filename and are not multipart containers become
/// attachments. The payload is fully materialized and owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Filename from `Content-Disposition` (`filename`) or `Content-Type` (`name`).
    pub name: String,

    /// Payload after Content-Transfer-Encoding decoding.
    pub data: Vec<u8>,

    /// Lowercased `type/subtype` of the part, when it declared a valid one.
    pub content_type: Option<String>,

    /// Multipart nesting level the part was found at (1 = top-level multipart).
    pub depth: usize,
}

impl Attachment {
    /// Decoded size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// `true` if the name ends in `.{ext}`, ignoring ASCII case.
    pub fn has_extension(&self, ext: &str) -> bool {
        let name = self.name.as_bytes();
        let ext = ext.as_bytes();
        name.len() > ext.len()
            && name[name.len() - ext.len() - 1] == b'.'
            && name[name.len() - ext.len()..].eq_ignore_ascii_case(ext)
    }
}

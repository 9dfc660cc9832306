//! Multipart body traversal.
//!
//! [`MultipartReader`] splits one multipart body into [`Part`]s that borrow
//! from it. [`Walker`] drives the reader recursively, descending into nested
//! multipart parts and decoding every named part into an [`Attachment`].

use humansize::{format_size, BINARY};
use memchr::memmem;
use tracing::{debug, info, trace, warn};

use crate::error::{Anomaly, Diagnosed};
use crate::model::attachment::Attachment;
use crate::model::message::Part;
use crate::parser::content_type::{filename, MediaType};
use crate::parser::header::{split_header_block, HeaderMap};
use crate::parser::transfer;

/// Default maximum nesting depth for recursive multipart parsing
/// (to prevent stack overflow on adversarial input).
pub const DEFAULT_MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    Parts,
    Done,
}

/// Iterator over the parts of one multipart body.
///
/// Delimiter lines are `--boundary` at the start of a line, optionally
/// followed by spaces or tabs, then CRLF, LF or the end of the stream.
/// `--boundary--`, with the same line rule, ends the body; the epilogue
/// after it is ignored. The line break before a delimiter belongs to the
/// delimiter, not to the part.
///
/// Yields `Err` once if no opening delimiter exists. If the stream ends
/// before the closing delimiter, the last part is yielded with
/// `truncated = true`.
pub struct MultipartReader<'a> {
    body: &'a [u8],
    finder: memmem::Finder<'static>,
    boundary_len: usize,
    ascii_boundary: bool,
    pos: usize,
    state: State,
}

impl<'a> MultipartReader<'a> {
    pub fn new(body: &'a [u8], boundary: &str) -> Self {
        let dash_boundary = format!("--{boundary}");
        Self {
            body,
            boundary_len: dash_boundary.len(),
            ascii_boundary: boundary.is_ascii(),
            finder: memmem::Finder::new(dash_boundary.as_bytes()).into_owned(),
            pos: 0,
            state: State::Preamble,
        }
    }

    /// If a delimiter line starts at `at`, return where the next part starts
    /// and whether it was the closing delimiter.
    fn delimiter_at(&self, at: usize) -> Option<(usize, bool)> {
        if at > 0 && self.body[at - 1] != b'\n' {
            return None;
        }
        let rest = &self.body[at + self.boundary_len..];
        let (rest, terminal) = match rest.strip_prefix(b"--") {
            Some(after) => (after, true),
            None => (rest, false),
        };

        let lwsp = rest
            .iter()
            .take_while(|&&b| b == b' ' || b == b'\t')
            .count();
        let rest = &rest[lwsp..];
        let eol = if rest.is_empty() {
            0
        } else if rest.starts_with(b"\r\n") {
            2
        } else if rest.starts_with(b"\n") {
            1
        } else {
            // "--boundaryXYZ" and "--boundary--XYZ" are ordinary content
            return None;
        };
        if terminal {
            return Some((self.body.len(), true));
        }
        Some((at + self.boundary_len + lwsp + eol, false))
    }

    /// Find the first delimiter line at or after `from`.
    fn next_delimiter(&self, from: usize) -> Option<(usize, usize, bool)> {
        let mut search = from;
        while let Some(offset) = self.finder.find(&self.body[search..]) {
            let at = search + offset;
            if let Some((next, terminal)) = self.delimiter_at(at) {
                return Some((at, next, terminal));
            }
            search = at + 1;
        }
        None
    }

    fn make_part(&self, raw: &'a [u8], truncated: bool) -> Part<'a> {
        let (headers, body, _) = split_header_block(raw);
        Part {
            headers: HeaderMap::parse(headers),
            body,
            truncated,
        }
    }
}

impl<'a> Iterator for MultipartReader<'a> {
    type Item = Result<Part<'a>, Anomaly>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == State::Preamble {
            match self.next_delimiter(0) {
                Some((_, _, true)) => {
                    self.state = State::Done;
                    return None;
                }
                Some((_, next, false)) => {
                    self.pos = next;
                    self.state = State::Parts;
                }
                None => {
                    self.state = State::Done;
                    // Non-ASCII header bytes were re-encoded while decoding the
                    // header block, so such a boundary cannot match the raw body
                    let reason = if self.ascii_boundary {
                        "no opening delimiter found"
                    } else {
                        "no opening delimiter found (boundary is not ASCII)"
                    };
                    return Some(Err(Anomaly::Framing(reason.into())));
                }
            }
        }
        if self.state == State::Done {
            return None;
        }

        let start = self.pos;
        let body = self.body;
        match self.next_delimiter(start) {
            Some((at, next, terminal)) => {
                // Strip the line break that introduces the delimiter
                let mut end = at;
                if end > start && body[end - 1] == b'\n' {
                    end -= 1;
                    if end > start && body[end - 1] == b'\r' {
                        end -= 1;
                    }
                }
                self.pos = next;
                if terminal {
                    self.state = State::Done;
                }
                Some(Ok(self.make_part(&body[start..end], false)))
            }
            None => {
                self.state = State::Done;
                Some(Ok(self.make_part(&body[start..], true)))
            }
        }
    }
}

/// Recursive multipart traversal with a nesting guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Walker {
    max_depth: usize,
}

impl Default for Walker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl Walker {
    /// `max_depth` counts multipart levels; the top-level body is level 1.
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Collect every attachment of a multipart body, nested ones included,
    /// in document order.
    pub fn walk(&self, body: &[u8], boundary: &str) -> Diagnosed<Vec<Attachment>> {
        let mut out = Diagnosed::clean(Vec::new());
        self.walk_level(body, boundary, 1, &mut out);
        out
    }

    fn walk_level(
        &self,
        body: &[u8],
        boundary: &str,
        depth: usize,
        out: &mut Diagnosed<Vec<Attachment>>,
    ) {
        for (index, part) in MultipartReader::new(body, boundary).enumerate() {
            let part = match part {
                Ok(part) => part,
                Err(anomaly) => {
                    warn!(depth, boundary, %anomaly, "Malformed multipart body");
                    out.anomalies.push(anomaly);
                    continue;
                }
            };

            if part.truncated {
                let anomaly = Anomaly::Framing(format!(
                    "part {} at depth {depth} has no closing delimiter '--{boundary}--'",
                    index + 1
                ));
                warn!(%anomaly, "Truncated multipart body");
                out.anomalies.push(anomaly);
            }

            let media = match part.headers.get("content-type").map(|v| (v, MediaType::parse(v))) {
                Some((_, Ok(media))) => Some(media),
                Some((value, Err(reason))) => {
                    let anomaly = Anomaly::ContentType {
                        value: value.to_string(),
                        reason,
                    };
                    warn!(%anomaly, "Treating part as not multipart");
                    out.anomalies.push(anomaly);
                    None
                }
                None => None,
            };

            if let Some(inner) = media.as_ref().and_then(MediaType::boundary) {
                if depth >= self.max_depth {
                    let anomaly = Anomaly::DepthExceeded(self.max_depth);
                    warn!(%anomaly, boundary = inner, "Skipping nested multipart");
                    out.anomalies.push(anomaly);
                    continue;
                }
                debug!(depth, boundary = inner, "Descending into nested multipart");
                self.walk_level(part.body, inner, depth + 1, out);
                continue;
            }

            let name = filename(part.headers.get("content-disposition"), media.as_ref());
            for anomaly in &name.anomalies {
                warn!(%anomaly, "Ignoring Content-Disposition");
            }
            let Some(name) = name.drain_into(&mut out.anomalies) else {
                trace!(depth, part = index + 1, "Skipping part without filename");
                continue;
            };

            let data = transfer::decode(part.headers.get("content-transfer-encoding"), part.body)
                .drain_into(&mut out.anomalies);
            info!(
                name = %name,
                size = %format_size(data.len(), BINARY),
                depth,
                "Found attachment"
            );
            out.value.push(Attachment {
                name,
                data,
                content_type: media.map(|m| m.essence().to_string()),
                depth,
            });
        }
    }
}

/// Walk with the default nesting limit.
pub fn walk(body: &[u8], boundary: &str) -> Diagnosed<Vec<Attachment>> {
    Walker::default().walk(body, boundary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts<'a>(body: &'a [u8], boundary: &str) -> Vec<Result<Part<'a>, Anomaly>> {
        MultipartReader::new(body, boundary).collect()
    }

    #[test]
    fn test_reader_splits_parts_crlf() {
        let body = b"preamble\r\n--X\r\nA: 1\r\n\r\none\r\n--X\r\n\r\ntwo\r\n--X--\r\nepilogue";
        let parts = parts(body, "X");
        assert_eq!(parts.len(), 2);
        let first = parts[0].as_ref().unwrap();
        assert_eq!(first.headers.get("a"), Some("1"));
        assert_eq!(first.body, b"one");
        assert!(!first.truncated);
        let second = parts[1].as_ref().unwrap();
        assert!(second.headers.is_empty());
        assert_eq!(second.body, b"two");
    }

    #[test]
    fn test_reader_lf_and_trailing_whitespace() {
        let body = b"--X \t\nA: 1\n\nline1\nline2\n--X--\n";
        let parts = parts(body, "X");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].as_ref().unwrap().body, b"line1\nline2");
    }

    #[test]
    fn test_reader_ignores_boundary_prefix_lines() {
        let body = b"--X\r\n\r\nkeep\r\n--Xtra\r\nstill\r\n--X--";
        let parts = parts(body, "X");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].as_ref().unwrap().body, b"keep\r\n--Xtra\r\nstill");
    }

    #[test]
    fn test_reader_ignores_closing_delimiter_with_suffix() {
        let body = b"--X\r\n\r\none\r\n--X--notend\r\nmore\r\n--X\r\n\
Content-Disposition: attachment; filename=a.txt\r\n\r\nhi\r\n--X--\r\n";
        let parts = parts(body, "X");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].as_ref().unwrap().body, b"one\r\n--X--notend\r\nmore");

        let out = walk(body, "X");
        assert!(out.is_clean());
        assert_eq!(out.value.len(), 1);
        assert_eq!(out.value[0].name, "a.txt");
        assert_eq!(out.value[0].data, b"hi");
    }

    #[test]
    fn test_non_ascii_boundary_is_noted() {
        // Latin-1 0xE9 in the header decodes to U+00E9, two bytes in UTF-8
        let body = b"--caf\xe9\r\nContent-Disposition: attachment; filename=a.zip\r\n\r\nPK\r\n--caf\xe9--";
        let out = walk(body, "caf\u{e9}");
        assert!(out.value.is_empty());
        assert_eq!(
            out.anomalies,
            vec![Anomaly::Framing(
                "no opening delimiter found (boundary is not ASCII)".into()
            )]
        );
    }

    #[test]
    fn test_closing_delimiter_allows_trailing_whitespace() {
        let body = b"--X\r\n\r\none\r\n--X-- \t\r\nepilogue";
        let parts = parts(body, "X");
        assert_eq!(parts.len(), 1);
        assert!(!parts[0].as_ref().unwrap().truncated);
    }

    #[test]
    fn test_reader_ignores_mid_line_boundary() {
        let body = b"--X\n\nsee --X here\n--X--\n";
        let parts = parts(body, "X");
        assert_eq!(parts[0].as_ref().unwrap().body, b"see --X here");
    }

    #[test]
    fn test_reader_missing_opening_delimiter() {
        let parts = parts(b"just text\r\n", "X");
        assert_eq!(parts.len(), 1);
        assert!(matches!(parts[0], Err(Anomaly::Framing(_))));
    }

    #[test]
    fn test_reader_truncated_last_part() {
        let body = b"--X\r\n\r\nfirst\r\n--X\r\nA: 1\r\n\r\nunfinished";
        let parts = parts(body, "X");
        assert_eq!(parts.len(), 2);
        let last = parts[1].as_ref().unwrap();
        assert!(last.truncated);
        assert_eq!(last.body, b"unfinished");
    }

    #[test]
    fn test_reader_empty_multipart() {
        assert!(parts(b"--X--\r\n", "X").is_empty());
    }

    fn attachment_part(boundary: &str, name: &str, body: &str) -> String {
        format!(
            "--{boundary}\r\nContent-Type: application/octet-stream\r\n\
             Content-Disposition: attachment; filename=\"{name}\"\r\n\r\n{body}\r\n"
        )
    }

    #[test]
    fn test_walk_counts_named_parts_in_order() {
        let mut body = String::from("--B\r\nContent-Type: text/plain\r\n\r\nhello\r\n");
        body.push_str(&attachment_part("B", "one.bin", "1"));
        body.push_str("--B\r\nContent-Type: text/html\r\n\r\n<p>hi</p>\r\n");
        body.push_str(&attachment_part("B", "two.bin", "2"));
        body.push_str("--B--\r\n");

        let out = walk(body.as_bytes(), "B");
        assert!(out.is_clean(), "{:?}", out.anomalies);
        let names: Vec<&str> = out.value.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["one.bin", "two.bin"]);
        assert_eq!(out.value[0].data, b"1");
        assert_eq!(out.value[1].data, b"2");
        assert_eq!(
            out.value[0].content_type.as_deref(),
            Some("application/octet-stream")
        );
    }

    #[test]
    fn test_walk_flattens_nested_multipart() {
        let mut inner = String::new();
        inner.push_str(&attachment_part("inner", "a.txt", "A"));
        inner.push_str(&attachment_part("inner", "b.txt", "B"));
        inner.push_str("--inner--\r\n");

        let body = format!(
            "--outer\r\nContent-Type: multipart/mixed; boundary=\"inner\"\r\n\r\n{inner}\r\n--outer--\r\n"
        );
        let out = walk(body.as_bytes(), "outer");
        assert!(out.is_clean(), "{:?}", out.anomalies);
        assert_eq!(out.value.len(), 2);
        assert_eq!(out.value[0].name, "a.txt");
        assert_eq!(out.value[1].data, b"B");
        assert!(out.value.iter().all(|a| a.depth == 2));
    }

    #[test]
    fn test_walk_nested_part_is_not_an_attachment() {
        // A multipart container with a filename still only recurses
        let body = "--o\r\nContent-Type: multipart/mixed; boundary=i\r\n\
                    Content-Disposition: attachment; filename=container.zip\r\n\r\n\
                    --i\r\nContent-Type: text/plain\r\n\r\nno name\r\n--i--\r\n--o--\r\n";
        let out = walk(body.as_bytes(), "o");
        assert!(out.value.is_empty());
        assert!(out.is_clean());
    }

    #[test]
    fn test_walk_decodes_base64() {
        let body = "--B\r\nContent-Disposition: attachment; filename=x.txt\r\n\
                    Content-Transfer-Encoding: base64\r\n\r\naGVsbG8=\r\n--B--\r\n";
        let out = walk(body.as_bytes(), "B");
        assert_eq!(out.value[0].data, b"hello");
        assert_eq!(out.value[0].content_type, None);
    }

    #[test]
    fn test_walk_unknown_encoding_is_not_fatal() {
        let body = "--B\r\nContent-Disposition: attachment; filename=x.txt\r\n\
                    Content-Transfer-Encoding: x-custom\r\n\r\nraw\r\n--B--\r\n";
        let out = walk(body.as_bytes(), "B");
        assert_eq!(out.value[0].data, b"raw");
        assert_eq!(out.anomalies, vec![Anomaly::UnknownEncoding("x-custom".into())]);
    }

    #[test]
    fn test_walk_truncated_keeps_collected() {
        let mut body = attachment_part("B", "first.txt", "1");
        body.push_str(&attachment_part("B", "second.txt", "partial"));
        let out = walk(body.as_bytes(), "B");
        assert_eq!(out.value.len(), 2);
        assert_eq!(out.value[0].data, b"1");
        assert!(out
            .anomalies
            .iter()
            .any(|a| matches!(a, Anomaly::Framing(_))));
    }

    #[test]
    fn test_walk_no_delimiter_is_partial_not_error() {
        let out = walk(b"nothing here", "B");
        assert!(out.value.is_empty());
        assert!(!out.is_clean());
    }

    #[test]
    fn test_walk_bad_part_content_type_recorded() {
        let body = "--B\r\nContent-Type: ;;\r\nContent-Disposition: attachment; filename=x.txt\r\n\r\nx\r\n--B--\r\n";
        let out = walk(body.as_bytes(), "B");
        assert_eq!(out.value.len(), 1);
        assert!(matches!(out.anomalies[0], Anomaly::ContentType { .. }));
    }

    #[test]
    fn test_walk_depth_guard() {
        fn nest(level: usize) -> String {
            if level == 0 {
                return attachment_part("leaf", "deep.txt", "x") + "--leaf--\r\n";
            }
            let b = format!("b{level}");
            let inner_boundary = if level == 1 { "leaf".to_string() } else { format!("b{}", level - 1) };
            format!(
                "--{b}\r\nContent-Type: multipart/mixed; boundary={inner_boundary}\r\n\r\n{}\r\n--{b}--\r\n",
                nest(level - 1)
            )
        }
        // Top-level boundary b3 -> b2 -> b1 -> leaf: four multipart levels
        let body = nest(3);

        let out = Walker::new(4).walk(body.as_bytes(), "b3");
        assert_eq!(out.value.len(), 1);
        assert_eq!(out.value[0].depth, 4);

        let out = Walker::new(3).walk(body.as_bytes(), "b3");
        assert!(out.value.is_empty());
        assert_eq!(out.anomalies, vec![Anomaly::DepthExceeded(3)]);
    }
}

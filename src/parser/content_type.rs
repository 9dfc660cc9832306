//! Media type parsing for `Content-Type` and `Content-Disposition` values,
//! and boundary resolution for multipart bodies.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{Anomaly, Diagnosed};
use crate::parser::header::{decode_charset, decode_encoded_words};

/// A parsed `type/subtype; key=value` header value.
///
/// `Content-Disposition` values share the grammar without the subtype
/// (`attachment; filename=a.txt`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    essence: String,
    params: BTreeMap<String, String>,
}

impl MediaType {
    /// Parse a header value. Type and parameter names are lowercased.
    ///
    /// Unquoted parameter values are taken up to the next `;` or whitespace,
    /// which accepts common real-world boundaries such as `----=_Part_0`.
    pub fn parse(value: &str) -> Result<Self, String> {
        let (head, rest) = match value.find(';') {
            Some(pos) => (&value[..pos], &value[pos..]),
            None => (value, ""),
        };

        let essence = head.trim().to_lowercase();
        if essence.is_empty() {
            return Err("no media type".into());
        }
        match essence.split_once('/') {
            Some((main, sub)) => {
                if !is_token(main) {
                    return Err(format!("invalid media type '{main}'"));
                }
                if !is_token(sub) {
                    return Err("expected token after slash".into());
                }
            }
            None if !is_token(&essence) => {
                return Err(format!("invalid media type '{essence}'"));
            }
            None => {}
        }

        let raw = parse_params(rest)?;
        Ok(Self {
            essence,
            params: merge_extended_params(raw),
        })
    }

    /// `type/subtype` (or the bare disposition type), lowercased.
    pub fn essence(&self) -> &str {
        &self.essence
    }

    /// Look up a parameter by its lowercase name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn is_multipart(&self) -> bool {
        self.essence.starts_with("multipart/")
    }

    /// The boundary token, only for `multipart/*` types with a non-empty
    /// `boundary` parameter.
    pub fn boundary(&self) -> Option<&str> {
        if !self.is_multipart() {
            return None;
        }
        self.param("boundary").filter(|b| !b.is_empty())
    }
}

/// Resolve the boundary of a `Content-Type` value.
///
/// `Ok(None)` is the normal answer for non-multipart types; `Err` reports a
/// value that could not be parsed at all.
pub fn resolve_boundary(content_type: &str) -> Result<Option<String>, Anomaly> {
    MediaType::parse(content_type)
        .map(|media| media.boundary().map(String::from))
        .map_err(|reason| Anomaly::ContentType {
            value: content_type.to_string(),
            reason,
        })
}

/// Like [`resolve_boundary`], but a parse failure is logged and treated as
/// "not multipart".
pub fn resolve(content_type: &str) -> Option<String> {
    match resolve_boundary(content_type) {
        Ok(boundary) => boundary,
        Err(anomaly) => {
            warn!(%anomaly, "Treating part as not multipart");
            None
        }
    }
}

/// Extract the filename of a part.
///
/// `Content-Disposition: ...; filename=` wins over `Content-Type: ...; name=`.
/// Encoded-words are decoded and the result trimmed; an empty name is `None`.
pub fn filename(
    disposition: Option<&str>,
    content_type: Option<&MediaType>,
) -> Diagnosed<Option<String>> {
    let mut anomalies = Vec::new();

    let from_disposition = disposition.and_then(|value| match MediaType::parse(value) {
        Ok(media) => media.param("filename").map(String::from),
        Err(reason) => {
            anomalies.push(Anomaly::Disposition {
                value: value.to_string(),
                reason,
            });
            None
        }
    });

    let name = from_disposition
        .or_else(|| content_type.and_then(|m| m.param("name")).map(String::from))
        .map(|raw| decode_encoded_words(&raw).trim().to_string())
        .filter(|name| !name.is_empty());

    Diagnosed {
        value: name,
        anomalies,
    }
}

/// RFC 2045 token: visible ASCII except tspecials.
fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_token_byte)
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?=".contains(&b)
}

/// Parse `; key=value; key="quoted value"` into `(lowercase_key, value)` pairs.
fn parse_params(mut rest: &str) -> Result<Vec<(String, String)>, String> {
    let mut params: Vec<(String, String)> = Vec::new();

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        if let Some(after) = rest.strip_prefix(';') {
            rest = after;
            continue;
        }

        let eq = rest
            .find('=')
            .ok_or_else(|| format!("invalid media parameter '{}'", rest.trim()))?;
        let key = rest[..eq].trim().to_lowercase();
        if !is_token(&key) {
            return Err(format!("invalid media parameter name '{key}'"));
        }
        rest = rest[eq + 1..].trim_start();

        let value = if let Some(quoted) = rest.strip_prefix('"') {
            let (value, consumed) = parse_quoted(quoted)?;
            rest = &quoted[consumed..];
            value
        } else {
            let end = rest
                .find(|c: char| c == ';' || c.is_whitespace())
                .unwrap_or(rest.len());
            let value = &rest[..end];
            if value.is_empty() || value.contains('"') {
                return Err(format!("invalid value for parameter '{key}'"));
            }
            rest = &rest[end..];
            value.to_string()
        };

        rest = rest.trim_start();
        if !rest.is_empty() && !rest.starts_with(';') {
            return Err(format!("unexpected text after parameter '{key}'"));
        }

        if params.iter().any(|(k, _)| *k == key) {
            return Err(format!("duplicate parameter '{key}'"));
        }
        params.push((key, value));
    }

    Ok(params)
}

/// Parse the body of a quoted string (opening quote already consumed).
///
/// Returns the unescaped value and the number of bytes consumed, closing
/// quote included.
fn parse_quoted(s: &str) -> Result<(String, usize), String> {
    let mut value = String::new();
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((value, i + 1)),
            '\\' => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => break,
            },
            _ => value.push(c),
        }
    }
    Err("unterminated quoted string".into())
}

/// Merge RFC 2231 parameters (`name*`, `name*0`, `name*1*`, ...) into plain
/// `name` entries. Extended values win over plain ones.
fn merge_extended_params(raw: Vec<(String, String)>) -> BTreeMap<String, String> {
    let mut plain = BTreeMap::new();
    let mut extended = BTreeMap::new();
    let mut sections: BTreeMap<String, Vec<(u32, bool, String)>> = BTreeMap::new();

    for (key, value) in raw {
        let Some((base, suffix)) = key.split_once('*') else {
            plain.insert(key, value);
            continue;
        };
        if suffix.is_empty() {
            extended.insert(base.to_string(), decode_extended(&value));
            continue;
        }
        let (index, encoded) = match suffix.strip_suffix('*') {
            Some(index) => (index, true),
            None => (suffix, false),
        };
        match index.parse::<u32>() {
            Ok(index) => sections
                .entry(base.to_string())
                .or_default()
                .push((index, encoded, value)),
            // Not an RFC 2231 shape; keep the key untouched
            Err(_) => {
                plain.insert(key, value);
            }
        }
    }

    for (base, mut pieces) in sections {
        pieces.sort_by_key(|(index, _, _)| *index);
        let mut charset = String::new();
        let mut bytes = Vec::new();
        for (expected, (index, encoded, value)) in pieces.iter().enumerate() {
            if *index as usize != expected {
                break;
            }
            if !*encoded {
                bytes.extend_from_slice(value.as_bytes());
                continue;
            }
            let data = if expected == 0 {
                match split_charset(value) {
                    Some((cs, data)) => {
                        charset = cs.to_string();
                        data
                    }
                    None => value.as_str(),
                }
            } else {
                value.as_str()
            };
            bytes.extend(percent_encoding::percent_decode_str(data));
        }
        plain.insert(base, decode_charset(&charset, &bytes));
    }

    plain.extend(extended);
    plain
}

/// Decode `charset'lang'percent-encoded` (or a bare percent-encoded value).
fn decode_extended(value: &str) -> String {
    let (charset, data) = split_charset(value).unwrap_or(("", value));
    let bytes: Vec<u8> = percent_encoding::percent_decode_str(data).collect();
    decode_charset(charset, &bytes)
}

fn split_charset(value: &str) -> Option<(&str, &str)> {
    let (charset, rest) = value.split_once('\'')?;
    let (_lang, data) = rest.split_once('\'')?;
    Some((charset, data))
}

//! Content-Transfer-Encoding decoding.
//!
//! Decoding is best-effort: a broken payload still produces bytes (a decoded
//! prefix, or the raw input) together with an [`Anomaly`].

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use tracing::warn;

use crate::error::{Anomaly, Diagnosed};

/// Standard alphabet with padding, accepting non-zero trailing bits in the
/// last symbol as mail clients do.
const MIME_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Transfer encodings we know how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// No header, or one of `7bit`, `8bit`, `binary`.
    Identity,
    Base64,
    QuotedPrintable,
}

impl TransferEncoding {
    /// Map a header value to an encoding. `None` for values we don't know.
    pub fn from_header(value: Option<&str>) -> Option<Self> {
        let value = value.map(str::trim).unwrap_or("");
        if value.is_empty() {
            return Some(Self::Identity);
        }
        match value.to_ascii_lowercase().as_str() {
            "7bit" | "8bit" | "binary" => Some(Self::Identity),
            "base64" => Some(Self::Base64),
            "quoted-printable" => Some(Self::QuotedPrintable),
            _ => None,
        }
    }
}

/// Decode `raw` according to the `Content-Transfer-Encoding` header value.
pub fn decode(cte: Option<&str>, raw: &[u8]) -> Diagnosed<Vec<u8>> {
    match TransferEncoding::from_header(cte) {
        Some(TransferEncoding::Identity) => Diagnosed::clean(raw.to_vec()),
        Some(TransferEncoding::Base64) => decode_base64(raw),
        Some(TransferEncoding::QuotedPrintable) => decode_quoted_printable(raw),
        None => {
            let encoding = cte.unwrap_or_default().trim().to_string();
            warn!(encoding = %encoding, "Unknown transfer encoding, keeping raw bytes");
            Diagnosed::partial(raw.to_vec(), Anomaly::UnknownEncoding(encoding))
        }
    }
}

/// Standard alphabet, padding required; line breaks and other ASCII
/// whitespace are skipped.
///
/// On error, every complete 4-character group before the offending one is
/// still decoded.
fn decode_base64(raw: &[u8]) -> Diagnosed<Vec<u8>> {
    let clean: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    let err = match MIME_BASE64.decode(&clean) {
        Ok(data) => return Diagnosed::clean(data),
        Err(err) => err,
    };

    let valid = match err {
        base64::DecodeError::InvalidByte(offset, _)
        | base64::DecodeError::InvalidLastSymbol(offset, _) => offset,
        base64::DecodeError::InvalidLength(_) | base64::DecodeError::InvalidPadding => {
            clean.len()
        }
    };

    let mut data = Vec::with_capacity(valid / 4 * 3);
    for quantum in clean[..valid / 4 * 4].chunks_exact(4) {
        if MIME_BASE64.decode_vec(quantum, &mut data).is_err() {
            break;
        }
    }

    warn!(error = %err, decoded = data.len(), "Error decoding base64, keeping decoded prefix");
    Diagnosed::partial(
        data,
        Anomaly::Decode {
            encoding: "base64".into(),
            reason: err.to_string(),
        },
    )
}

/// `=XX` escapes and soft line breaks; lenient about malformed escapes.
fn decode_quoted_printable(raw: &[u8]) -> Diagnosed<Vec<u8>> {
    match quoted_printable::decode(raw, quoted_printable::ParseMode::Robust) {
        Ok(data) => Diagnosed::clean(data),
        Err(err) => {
            warn!(error = %err, "Error decoding quoted-printable, keeping raw bytes");
            Diagnosed::partial(
                raw.to_vec(),
                Anomaly::Decode {
                    encoding: "quoted-printable".into(),
                    reason: err.to_string(),
                },
            )
        }
    }
}

//! Centralized error types for mailscan.
//!
//! Two families live here: [`LoadError`], which stops the processing of a
//! single message, and [`Anomaly`], which is recorded and logged while the
//! scan keeps going. [`Diagnosed`] carries a stage's value together with the
//! anomalies met while producing it.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that prevent a message file from being loaded at all.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The path does not exist.
    #[error("does not exist: {0}")]
    NotFound(PathBuf),

    /// The path is a directory, socket, device, or could not be read.
    #[error("cannot read '{path}': {reason}")]
    NotReadable { path: PathBuf, reason: String },

    /// The file is larger than the configured maximum message size.
    #[error("'{path}' is {size} bytes, over the {limit} byte limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    /// Not a single header field could be found before the body.
    #[error("no header block found in '{0}'")]
    MalformedHeaders(PathBuf),
}

impl LoadError {
    /// Create a `NotReadable` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(path.into());
        }
        Self::NotReadable {
            path: path.into(),
            reason: source.to_string(),
        }
    }
}

/// A non-fatal problem met while walking or decoding a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// A `Content-Type` value could not be parsed; the part is treated as
    /// not multipart.
    #[error("invalid Content-Type '{value}': {reason}")]
    ContentType { value: String, reason: String },

    /// A `Content-Disposition` value could not be parsed; its filename is
    /// ignored.
    #[error("invalid Content-Disposition '{value}': {reason}")]
    Disposition { value: String, reason: String },

    /// The transfer encoding is not one we know; raw bytes were kept.
    #[error("unknown transfer encoding '{0}'")]
    UnknownEncoding(String),

    /// The payload could only be partially decoded.
    #[error("error decoding {encoding}: {reason}")]
    Decode { encoding: String, reason: String },

    /// Multipart framing is broken (missing delimiters, truncated part).
    #[error("multipart framing: {0}")]
    Framing(String),

    /// Nesting went deeper than the walker allows.
    #[error("multipart nesting deeper than {0} levels, not descending")]
    DepthExceeded(usize),
}

impl serde::Serialize for Anomaly {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The value produced by a best-effort stage, plus whatever went wrong.
///
/// An empty `anomalies` list means the value is complete. A non-empty list
/// means the value is what could be recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosed<T> {
    pub value: T,
    pub anomalies: Vec<Anomaly>,
}

impl<T> Diagnosed<T> {
    /// A value produced without any anomaly.
    pub fn clean(value: T) -> Self {
        Self {
            value,
            anomalies: Vec::new(),
        }
    }

    /// A value recovered despite `anomaly`.
    pub fn partial(value: T, anomaly: Anomaly) -> Self {
        Self {
            value,
            anomalies: vec![anomaly],
        }
    }

    /// `true` when the stage met no anomaly.
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }

    /// Move this result's anomalies into `sink` and return the bare value.
    pub fn drain_into(self, sink: &mut Vec<Anomaly>) -> T {
        sink.extend(self.anomalies);
        self.value
    }
}

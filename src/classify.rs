//! Detection policies and per-message classification.
//!
//! A message is flagged when at least one of its attachments satisfies the
//! selected [`Predicate`]. Predicates are independent of each other and of
//! attachment order.

use std::fmt;

use memchr::memmem;
use serde::{Deserialize, Serialize};

use crate::model::attachment::Attachment;

/// The 68-byte EICAR antivirus test file.
pub const EICAR_SIGNATURE: &[u8] =
    br"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

/// Decides whether one attachment is of interest.
pub trait Predicate {
    fn matches(&self, attachment: &Attachment) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&Attachment) -> bool,
{
    fn matches(&self, attachment: &Attachment) -> bool {
        self(attachment)
    }
}

/// Built-in detection policies, selectable by name in the config file or
/// on the command line.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    /// A `.txt` attachment containing the EICAR test signature.
    #[default]
    TestSignature,
    /// Any `.zip` attachment.
    SuspiciousExtension,
}

impl Policy {
    pub fn name(self) -> &'static str {
        match self {
            Self::TestSignature => "test-signature",
            Self::SuspiciousExtension => "suspicious-extension",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Predicate for Policy {
    fn matches(&self, attachment: &Attachment) -> bool {
        match self {
            Self::TestSignature => {
                attachment.has_extension("txt")
                    && memmem::find(&attachment.data, EICAR_SIGNATURE).is_some()
            }
            Self::SuspiciousExtension => attachment.has_extension("zip"),
        }
    }
}

/// Result of classifying one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// At least one attachment matched: the message is flagged.
    Positive,
    Negative,
}

/// Apply `predicate` to every attachment.
pub fn classify(attachments: &[Attachment], predicate: &impl Predicate) -> Outcome {
    if attachments.iter().any(|a| predicate.matches(a)) {
        Outcome::Positive
    } else {
        Outcome::Negative
    }
}

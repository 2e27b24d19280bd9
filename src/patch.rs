//! Patches attached to Debian bug reports.
//!
//! A [`PatchSource`] turns a bug number into the attached patch plus the
//! author and subject of the message carrying it. [`DebbugsClient`] talks
//! to the Debian bug tracker's SOAP interface.

mod debbugs;
mod mime;
mod xml;

pub use debbugs::{DEFAULT_SOAP_URL, DebbugsClient};

/// A patch attached to a bug report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// `From` header of the message, e.g. `Chris Lamb <lamby@debian.org>`.
    pub author: String,

    /// `Subject` header of the message.
    pub subject: String,

    /// Decoded attachment contents.
    pub data: Vec<u8>,
}

/// Somewhere patches can be fetched from.
pub trait PatchSource {
    /// Fetch the patch attached to `bug`.
    fn fetch(&self, bug: &str) -> Result<Patch, ProtocolError>;
}

/// Errors talking to a patch source or making sense of its answer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status code: got {0}, want 200")]
    Status(u16),

    #[error("unexpected Content-Type: got {0:?}, want multipart/*")]
    ContentType(String),

    #[error("no SOAP envelope found in the response")]
    MissingEnvelope,

    #[error("malformed SOAP response: {0}")]
    Malformed(String),

    #[error("bug log contains {0} messages, want exactly 1")]
    MessageCount(usize),

    #[error("message has no {0} header")]
    MissingHeader(&'static str),

    #[error("no MIME part with Content-Disposition: attachment found")]
    NoAttachment,

    #[error("unsupported Content-Transfer-Encoding: {0:?}")]
    Encoding(String),

    #[error("attachment is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Strip the optional `#` from a bug number (`#831331` → `831331`).
pub fn normalize_bug(bug: &str) -> &str {
    let bug = bug.trim();
    bug.strip_prefix('#').unwrap_or(bug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_bug_strips_hash() {
        assert_eq!(normalize_bug("#831331"), "831331");
    }

    #[test]
    fn normalize_bug_keeps_plain_numbers() {
        assert_eq!(normalize_bug("831331"), "831331");
        assert_eq!(normalize_bug(" 1 "), "1");
    }
}

//! Debbugs SOAP client.
//!
//! `get_bug_log` answers with a `multipart/related` body whose root part is
//! the SOAP envelope. Each bug log item holds one mail message, header and
//! body separately; the patch is the message's base64 attachment part.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use super::mime::{HeaderValue, Headers, Part, split_multipart};
use super::xml::{BugLogMessage, bug_log_messages};
use super::{Patch, PatchSource, ProtocolError, normalize_bug};

/// The Debian bug tracker's SOAP endpoint.
pub const DEFAULT_SOAP_URL: &str = "https://bugs.debian.org/cgi-bin/soap.cgi";

/// Fetches patches from a Debbugs instance.
#[derive(Debug, Clone)]
pub struct DebbugsClient {
    client: reqwest::blocking::Client,
    url: String,
}

impl DebbugsClient {
    pub fn new(url: impl Into<String>) -> Result<Self, ProtocolError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("mergebot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl PatchSource for DebbugsClient {
    fn fetch(&self, bug: &str) -> Result<Patch, ProtocolError> {
        let bug = normalize_bug(bug);
        debug!(url = %self.url, bug, "requesting bug log");
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", "\"Debbugs/SOAP\"")
            .body(request_envelope(bug))
            .send()?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ProtocolError::Status(status.as_u16()));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text()?;
        parse_response(&content_type, &body)
    }
}

fn request_envelope(bug: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope
  SOAP-ENV:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"
  xmlns:SOAP-ENC="http://schemas.xmlsoap.org/soap/encoding/"
  xmlns:xsi="http://www.w3.org/1999/XMLSchema-instance"
  xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/"
  xmlns:xsd="http://www.w3.org/1999/XMLSchema"
>
<SOAP-ENV:Body>
<ns1:get_bug_log xmlns:ns1="Debbugs/SOAP" SOAP-ENC:root="1">
<v1 xsi:type="xsd:int">{bug}</v1>
</ns1:get_bug_log>
</SOAP-ENV:Body>
</SOAP-ENV:Envelope>
"#,
        bug = xml_escape(bug)
    )
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Turn an HTTP answer (its `Content-Type` and body) into a [`Patch`].
pub(crate) fn parse_response(content_type: &str, body: &str) -> Result<Patch, ProtocolError> {
    let media = HeaderValue::parse(content_type);
    if !media.value.starts_with("multipart/") {
        return Err(ProtocolError::ContentType(content_type.to_string()));
    }
    let boundary = media
        .param("boundary")
        .ok_or_else(|| ProtocolError::ContentType(content_type.to_string()))?;

    let envelope = split_multipart(body, boundary)
        .into_iter()
        .map(Part::parse)
        .find(|part| part.content_type().value.ends_with("xml"))
        .ok_or(ProtocolError::MissingEnvelope)?;

    let mut messages = bug_log_messages(envelope.body)?;
    if messages.len() != 1 {
        return Err(ProtocolError::MessageCount(messages.len()));
    }
    let message = messages.remove(0);
    patch_from_message(&message)
}

fn patch_from_message(message: &BugLogMessage) -> Result<Patch, ProtocolError> {
    let headers = Headers::parse(&message.header);
    let author = headers
        .get("From")
        .ok_or(ProtocolError::MissingHeader("From"))?
        .to_string();
    let subject = headers
        .get("Subject")
        .ok_or(ProtocolError::MissingHeader("Subject"))?
        .to_string();

    let media = HeaderValue::parse(headers.get("Content-Type").unwrap_or("text/plain"));
    let boundary = media.param("boundary").ok_or(ProtocolError::NoAttachment)?;

    for part in split_multipart(&message.body, boundary)
        .into_iter()
        .map(Part::parse)
    {
        let Some(disposition) = part.headers.get("Content-Disposition") else {
            debug!("skipping MIME part without Content-Disposition");
            continue;
        };
        let disposition = HeaderValue::parse(disposition);
        if disposition.value != "attachment" {
            debug!(
                disposition = %disposition.value,
                "skipping MIME part that is not an attachment"
            );
            continue;
        }

        let encoding = part
            .headers
            .get("Content-Transfer-Encoding")
            .unwrap_or_default();
        if !encoding.eq_ignore_ascii_case("base64") {
            return Err(ProtocolError::Encoding(encoding.to_string()));
        }
        let encoded: String = part
            .body
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        return Ok(Patch {
            author,
            subject,
            data: STANDARD.decode(encoded)?,
        });
    }

    Err(ProtocolError::NoAttachment)
}

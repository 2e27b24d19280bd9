//! Reading `get_bug_log` answers out of a SOAP envelope.
//!
//! The response is a flat array of `<item>`s, each carrying the mail
//! `<header>` and `<body>` as escaped text. A tag scanner is all it takes.

use super::ProtocolError;

/// One message from a bug log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct BugLogMessage {
    pub header: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Open,
    Close,
    Empty,
}

#[derive(Debug)]
struct Tag<'a> {
    /// Local name, namespace prefix stripped.
    name: &'a str,
    kind: TagKind,
    /// Byte offset of `<`.
    start: usize,
    /// Byte offset just past `>`.
    end: usize,
}

/// Scan all element tags, skipping declarations, comments and CDATA.
fn tags(xml: &str) -> Result<Vec<Tag<'_>>, ProtocolError> {
    let mut tags = Vec::new();
    let mut pos = 0;
    while let Some(offset) = xml[pos..].find('<') {
        let start = pos + offset;
        let rest = &xml[start..];
        let terminator = if rest.starts_with("<!--") {
            "-->"
        } else if rest.starts_with("<![CDATA[") {
            "]]>"
        } else if rest.starts_with("<?") {
            "?>"
        } else {
            ">"
        };
        let close = rest
            .find(terminator)
            .ok_or_else(|| ProtocolError::Malformed(format!("unterminated tag at byte {start}")))?;
        let end = start + close + terminator.len();
        pos = end;
        if terminator != ">" || rest.starts_with("<!") {
            continue;
        }

        let inner = &xml[start + 1..end - 1];
        let kind = if inner.starts_with('/') {
            TagKind::Close
        } else if inner.ends_with('/') {
            TagKind::Empty
        } else {
            TagKind::Open
        };
        let qualified = inner
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or_default();
        let name = qualified.rsplit(':').next().unwrap_or(qualified);
        tags.push(Tag {
            name,
            kind,
            start,
            end,
        });
    }
    Ok(tags)
}

/// Extract the messages of a `get_bug_logResponse`.
pub(super) fn bug_log_messages(xml: &str) -> Result<Vec<BugLogMessage>, ProtocolError> {
    let tags = tags(xml)?;
    let response = tags
        .iter()
        .position(|t| t.name == "get_bug_logResponse" && t.kind == TagKind::Open)
        .ok_or_else(|| ProtocolError::Malformed("no get_bug_logResponse element".into()))?;

    let mut messages = Vec::new();
    // Depth of nested <item>s; only the outermost ones are messages.
    let mut item_depth = 0usize;
    let mut current: Option<(Option<String>, Option<String>)> = None;
    let mut field: Option<(&str, usize)> = None;

    for tag in &tags[response + 1..] {
        match (tag.kind, tag.name) {
            (TagKind::Close, "get_bug_logResponse") => break,
            (TagKind::Open, "item") => {
                item_depth += 1;
                if item_depth == 1 {
                    current = Some((None, None));
                }
            }
            (TagKind::Close, "item") => {
                if item_depth == 1
                    && let Some((header, body)) = current.take()
                {
                    messages.push(BugLogMessage {
                        header: header.ok_or_else(|| missing("header"))?,
                        body: body.ok_or_else(|| missing("body"))?,
                    });
                }
                item_depth = item_depth.saturating_sub(1);
            }
            (TagKind::Open, name @ ("header" | "body")) if item_depth == 1 => {
                field = Some((name, tag.end));
            }
            (TagKind::Empty, name @ ("header" | "body")) if item_depth == 1 => {
                set_field(current.as_mut(), name, String::new());
            }
            (TagKind::Close, name @ ("header" | "body")) if item_depth == 1 => {
                if let Some((open, content_start)) = field.take()
                    && open == name
                {
                    let text = unescape(&xml[content_start..tag.start])?;
                    set_field(current.as_mut(), name, text);
                }
            }
            _ => {}
        }
    }

    Ok(messages)
}

fn set_field(current: Option<&mut (Option<String>, Option<String>)>, name: &str, text: String) {
    if let Some((header, body)) = current {
        if name == "header" {
            *header = Some(text);
        } else {
            *body = Some(text);
        }
    }
}

fn missing(field: &str) -> ProtocolError {
    ProtocolError::Malformed(format!("bug log item without <{field}>"))
}

/// Resolve the predefined entities, character references and CDATA sections.
fn unescape(text: &str) -> Result<String, ProtocolError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(i) = rest.find(['&', '<']) {
        out.push_str(&rest[..i]);
        rest = &rest[i..];

        if let Some(cdata) = rest.strip_prefix("<![CDATA[") {
            let end = cdata
                .find("]]>")
                .ok_or_else(|| ProtocolError::Malformed("unterminated CDATA section".into()))?;
            out.push_str(&cdata[..end]);
            rest = &cdata[end + 3..];
            continue;
        }
        if rest.starts_with('<') {
            return Err(ProtocolError::Malformed(
                "unexpected markup inside text".into(),
            ));
        }

        let end = rest
            .find(';')
            .ok_or_else(|| ProtocolError::Malformed("unterminated entity".into()))?;
        let entity = &rest[1..end];
        let resolved = match entity {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            _ => character_reference(entity)
                .ok_or_else(|| ProtocolError::Malformed(format!("unknown entity &{entity};")))?,
        };
        out.push(resolved);
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn character_reference(entity: &str) -> Option<char> {
    let code = if let Some(hex) = entity
        .strip_prefix("#x")
        .or_else(|| entity.strip_prefix("#X"))
    {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        entity.strip_prefix('#')?.parse().ok()?
    };
    char::from_u32(code)
}

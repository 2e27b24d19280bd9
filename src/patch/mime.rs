//! Just enough MIME to read Debbugs answers: headers, parameterized
//! header values, and multipart bodies.

/// Parsed header block. Folded lines are joined; lookup ignores case.
#[derive(Debug, Default)]
pub(super) struct Headers(Vec<(String, String)>);

impl Headers {
    pub(super) fn parse(block: &str) -> Self {
        let mut headers: Vec<(String, String)> = Vec::new();
        for line in block.lines() {
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = headers.last_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }
        Self(headers)
    }

    /// First value of header `name`.
    pub(super) fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A header value with parameters, such as
/// `multipart/mixed; boundary="=-=-="` or `attachment; filename=x.patch`.
#[derive(Debug, PartialEq, Eq)]
pub(super) struct HeaderValue {
    /// The leading token, lowercased.
    pub value: String,
    params: Vec<(String, String)>,
}

impl HeaderValue {
    pub(super) fn parse(raw: &str) -> Self {
        let mut fields = split_params(raw).into_iter();
        let value = fields.next().unwrap_or_default().trim().to_ascii_lowercase();
        let params = fields
            .filter_map(|field| {
                let (name, value) = field.split_once('=')?;
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                Some((name.trim().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        Self { value, params }
    }

    pub(super) fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Split on `;` outside double quotes.
fn split_params(raw: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in raw.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ';' if !quoted => {
                fields.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(&raw[start..]);
    fields
}

/// One part of a multipart body.
#[derive(Debug)]
pub(super) struct Part<'a> {
    pub headers: Headers,
    pub body: &'a str,
}

impl<'a> Part<'a> {
    /// Split a raw part into its header block and body at the first empty line.
    pub(super) fn parse(raw: &'a str) -> Self {
        let (block, body) = split_at_blank_line(raw);
        Self {
            headers: Headers::parse(block),
            body,
        }
    }

    pub(super) fn content_type(&self) -> HeaderValue {
        HeaderValue::parse(self.headers.get("Content-Type").unwrap_or("text/plain"))
    }
}

fn split_at_blank_line(raw: &str) -> (&str, &str) {
    if let Some(body) = raw.strip_prefix("\r\n").or_else(|| raw.strip_prefix('\n')) {
        return ("", body);
    }
    let crlf = raw.find("\r\n\r\n").map(|i| (i, 4));
    let lf = raw.find("\n\n").map(|i| (i, 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((i, len)) => (&raw[..i], &raw[i + len..]),
        None => (raw, ""),
    }
}

/// The raw parts of a multipart body delimited by `boundary`.
///
/// The preamble before the first delimiter and the epilogue after the
/// closing one are dropped, as is the line break preceding each delimiter.
pub(super) fn split_multipart<'a>(body: &'a str, boundary: &str) -> Vec<&'a str> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    for (i, segment) in body.split(delimiter.as_str()).enumerate() {
        if i == 0 {
            continue;
        }
        if segment.starts_with("--") {
            break;
        }
        // Rest of the delimiter line, then the part up to the next delimiter's line break.
        let segment = match segment.find('\n') {
            Some(newline) => &segment[newline + 1..],
            None => "",
        };
        let segment = segment
            .strip_suffix("\r\n")
            .or_else(|| segment.strip_suffix('\n'))
            .unwrap_or(segment);
        parts.push(segment);
    }
    parts
}

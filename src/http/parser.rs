//! HTTP/1.x request head parser.
//!
//! Parses just enough of the head to frame the request: request line,
//! header names and values, and the body length. Nothing is normalized; the
//! raw bytes stay in the connection buffer and are what gets echoed.

/// HTTP protocol version of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

/// A header exactly as received (name case preserved).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: Vec<u8>,
}

/// Parsed request line and headers, in received order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: Version,
    pub headers: Vec<Header>,
}

/// How the request body is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Empty,
    Length(u64),
    Chunked,
}

/// Parse result.
#[derive(Debug)]
pub enum ParseResult {
    /// Complete head with the number of bytes it occupies.
    Complete(RequestHead, usize),
    /// Need more data.
    Incomplete,
    /// Malformed head.
    Error(ParseError),
}

/// Head parse errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed request line")]
    RequestLine,
    #[error("unsupported HTTP version")]
    Version,
    #[error("malformed header line")]
    Header,
    #[error("invalid Content-Length")]
    ContentLength,
    #[error("unsupported Transfer-Encoding")]
    TransferEncoding,
}

/// Result of scanning a chunked body.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkedResult {
    /// The body, trailers included, ends after this many bytes.
    Complete(usize),
    Incomplete,
    Error,
}

/// Parse a request head from the start of `input`.
pub fn parse(input: &[u8]) -> ParseResult {
    let mut lines = Lines::new(input);

    // Empty lines before the request line are ignored
    let request_line = loop {
        match lines.next_line() {
            None => return ParseResult::Incomplete,
            Some([]) => continue,
            Some(line) => break line,
        }
    };

    let (method, target, version) = match parse_request_line(request_line) {
        Ok(parts) => parts,
        Err(e) => return ParseResult::Error(e),
    };

    let mut headers = Vec::new();
    loop {
        match lines.next_line() {
            None => return ParseResult::Incomplete,
            Some([]) => break,
            Some(line) => match parse_header(line) {
                Ok(header) => headers.push(header),
                Err(e) => return ParseResult::Error(e),
            },
        }
    }

    let head = RequestHead {
        method,
        target,
        version,
        headers,
    };
    ParseResult::Complete(head, lines.pos)
}

/// Find where a chunked body ends.
///
/// `input` starts at the first chunk-size line. The scan skips chunk data by
/// its declared size, so rescanning a growing buffer costs one step per
/// chunk rather than per byte.
pub fn chunked_len(input: &[u8]) -> ChunkedResult {
    let mut lines = Lines::new(input);

    loop {
        let Some(line) = lines.next_line() else {
            return ChunkedResult::Incomplete;
        };

        // Chunk extensions are ignored
        let size_field = line.split(|&b| b == b';').next().unwrap_or(line);
        let Some(size) = parse_hex(trim_ows(size_field)) else {
            return ChunkedResult::Error;
        };

        if size == 0 {
            // Trailer section ends with an empty line
            loop {
                match lines.next_line() {
                    None => return ChunkedResult::Incomplete,
                    Some([]) => return ChunkedResult::Complete(lines.pos),
                    Some(_) => continue,
                }
            }
        }

        let Some(data_end) = usize::try_from(size)
            .ok()
            .and_then(|size| lines.pos.checked_add(size))
        else {
            return ChunkedResult::Error;
        };
        let Some(frame_end) = data_end.checked_add(2) else {
            return ChunkedResult::Error;
        };
        if input.len() < frame_end {
            return ChunkedResult::Incomplete;
        }
        if &input[data_end..frame_end] != b"\r\n" {
            return ChunkedResult::Error;
        }
        lines.pos = frame_end;
    }
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl RequestHead {
    /// First value of the named header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_slice())
    }

    /// All values of the named header, in received order.
    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.headers
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_slice())
    }

    pub fn user_agent(&self) -> Option<String> {
        self.header("user-agent")
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }

    /// Determine body framing from Transfer-Encoding and Content-Length.
    pub fn body_kind(&self) -> Result<BodyKind, ParseError> {
        let mut codings = self
            .headers_named("transfer-encoding")
            .flat_map(|value| value.split(|&b| b == b','))
            .map(trim_ows)
            .filter(|coding| !coding.is_empty())
            .peekable();

        if codings.peek().is_some() {
            // Chunked must be the final coding for the length to be knowable
            return match codings.last() {
                Some(last) if last.eq_ignore_ascii_case(b"chunked") => Ok(BodyKind::Chunked),
                _ => Err(ParseError::TransferEncoding),
            };
        }

        let mut length: Option<u64> = None;
        for value in self.headers_named("content-length") {
            for field in value.split(|&b| b == b',') {
                let n = parse_decimal(trim_ows(field)).ok_or(ParseError::ContentLength)?;
                match length {
                    Some(previous) if previous != n => return Err(ParseError::ContentLength),
                    _ => length = Some(n),
                }
            }
        }

        Ok(match length {
            None | Some(0) => BodyKind::Empty,
            Some(n) => BodyKind::Length(n),
        })
    }

    /// Whether the client allows the connection to stay open afterwards.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::Http11 => !self.has_connection_option(b"close"),
            Version::Http10 => self.has_connection_option(b"keep-alive"),
        }
    }

    pub fn expects_continue(&self) -> bool {
        self.version == Version::Http11
            && self
                .header("expect")
                .is_some_and(|value| trim_ows(value).eq_ignore_ascii_case(b"100-continue"))
    }

    fn has_connection_option(&self, option: &[u8]) -> bool {
        self.headers_named("connection")
            .flat_map(|value| value.split(|&b| b == b','))
            .any(|token| trim_ows(token).eq_ignore_ascii_case(option))
    }
}

/// Line iterator accepting CRLF or bare LF endings.
struct Lines<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Next complete line without its ending, or `None` if no newline yet.
    fn next_line(&mut self) -> Option<&'a [u8]> {
        let rest = &self.input[self.pos..];
        let newline = rest.iter().position(|&b| b == b'\n')?;
        self.pos += newline + 1;
        let line = &rest[..newline];
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    }
}

fn parse_request_line(line: &[u8]) -> Result<(String, String, Version), ParseError> {
    let mut parts = line.split(|&b| b == b' ');

    let method = parts
        .next()
        .filter(|method| !method.is_empty() && method.iter().all(|&b| is_token(b)))
        .ok_or(ParseError::RequestLine)?;
    let target = parts
        .next()
        .filter(|target| !target.is_empty() && target.iter().all(|b| b.is_ascii_graphic()))
        .ok_or(ParseError::RequestLine)?;
    let version = match parts.next() {
        Some(v) if v == b"HTTP/1.1" => Version::Http11,
        Some(v) if v == b"HTTP/1.0" => Version::Http10,
        Some(v) if v.starts_with(b"HTTP/") => return Err(ParseError::Version),
        _ => return Err(ParseError::RequestLine),
    };
    if parts.next().is_some() {
        return Err(ParseError::RequestLine);
    }

    // Both are validated ASCII
    Ok((
        String::from_utf8_lossy(method).into_owned(),
        String::from_utf8_lossy(target).into_owned(),
        version,
    ))
}

fn parse_header(line: &[u8]) -> Result<Header, ParseError> {
    // Obsolete line folding
    if line[0] == b' ' || line[0] == b'\t' {
        return Err(ParseError::Header);
    }

    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(ParseError::Header)?;
    let name = &line[..colon];
    if name.is_empty() || !name.iter().all(|&b| is_token(b)) {
        return Err(ParseError::Header);
    }

    Ok(Header {
        name: String::from_utf8_lossy(name).into_owned(),
        value: trim_ows(&line[colon + 1..]).to_vec(),
    })
}

/// RFC 9110 token character.
fn is_token(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Strip optional whitespace (SP / HTAB) from both ends.
fn trim_ows(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}

fn parse_decimal(digits: &[u8]) -> Option<u64> {
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0u64, |acc, &b| {
        if !b.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add(u64::from(b - b'0'))
    })
}

fn parse_hex(digits: &[u8]) -> Option<u64> {
    if digits.is_empty() || digits.len() > 16 {
        return None;
    }
    digits.iter().try_fold(0u64, |acc, &b| {
        let digit = (b as char).to_digit(16)?;
        Some((acc << 4) | u64::from(digit))
    })
}

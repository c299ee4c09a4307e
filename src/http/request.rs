//! HTTP/1.1 request parsing.
//!
//! A request is parsed in one pass over the bytes read from a connection:
//!
//! ```text
//! GET /search?q=rust+http HTTP/1.1\r\n      <- request line
//! Host: example.com\r\n                     <- headers
//! \r\n                                      <- blank line
//! <body bytes>                              <- body, verbatim
//! ```

use super::url_codec::{self, DecodeError};
use super::verb::{HttpVerb, VerbError};
use bytes::Bytes;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

const CRLF: &str = "\r\n";
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const REQUEST_LINE_DELIMITER: char = ' ';
const HEADER_DELIMITER: char = ':';

/// Request parsing errors. Each is fatal for the request being parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Request line and headers are not valid UTF-8
    InvalidEncoding,
    /// Request line does not have exactly three components
    InvalidRequestLine(String),
    /// A query key or value is not correctly percent-encoded
    Query(DecodeError),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidEncoding => write!(f, "Request head is not valid UTF-8"),
            ParseError::InvalidRequestLine(line) => {
                write!(f, "Invalid request line: {:?}", line)
            }
            ParseError::Query(e) => write!(f, "Invalid query string: {}", e),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Query(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for ParseError {
    fn from(e: DecodeError) -> Self {
        ParseError::Query(e)
    }
}

/// A parsed HTTP request. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    original_url: String,
    path: String,
    params: BTreeMap<String, String>,
    http_version: String,
    headers: HashMap<String, String>,
    body: Bytes,
}

impl Request {
    /// Parse a raw request buffer.
    ///
    /// The body is whatever follows the blank line; it is not cut to any
    /// declared `Content-Length`.
    pub fn parse(raw: Bytes) -> Result<Self, ParseError> {
        let (head, body) = match find_head_end(&raw) {
            Some(pos) => (raw.slice(..pos), raw.slice(pos + HEAD_TERMINATOR.len()..)),
            None => {
                let end = if raw.ends_with(CRLF.as_bytes()) {
                    raw.len() - CRLF.len()
                } else {
                    raw.len()
                };
                (raw.slice(..end), Bytes::new())
            }
        };

        let head = std::str::from_utf8(&head).map_err(|_| ParseError::InvalidEncoding)?;
        let mut lines = head.split(CRLF);
        let request_line = lines.next().unwrap_or_default();

        let parts: Vec<&str> = request_line.split(REQUEST_LINE_DELIMITER).collect();
        let [method, original_url, http_version] = parts[..] else {
            return Err(ParseError::InvalidRequestLine(request_line.to_string()));
        };

        let (path, query) = match original_url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (original_url, None),
        };

        let params = match query {
            Some(query) => parse_query(query)?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            method: method.to_string(),
            original_url: original_url.to_string(),
            path: path.to_string(),
            params,
            http_version: http_version.to_string(),
            headers: parse_headers(lines),
            body,
        })
    }

    /// Parse from a borrowed buffer, copying it once.
    pub fn from_slice(raw: &[u8]) -> Result<Self, ParseError> {
        Self::parse(Bytes::copy_from_slice(raw))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The method as a routable verb.
    pub fn verb(&self) -> Result<HttpVerb, VerbError> {
        self.method.parse()
    }

    /// The request-URI exactly as received.
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    /// The request-URI without its query component.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decoded query parameters. Repeated keys keep the last value.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn http_version(&self) -> &str {
        &self.http_version
    }

    /// Headers keyed by their exact (case-sensitive) name.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body as text, with invalid UTF-8 replaced.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Position of the blank line ending the head, if present.
pub(crate) fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
}

fn parse_query(query: &str) -> Result<BTreeMap<String, String>, ParseError> {
    let mut params = BTreeMap::new();
    for segment in query.split('&') {
        // Segments without '=' carry nothing to store
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };
        params.insert(url_codec::decode(key)?, url_codec::decode(value)?);
    }
    Ok(params)
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for line in lines {
        let Some((name, value)) = line.split_once(HEADER_DELIMITER) else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        headers.insert(name.to_string(), value.to_string());
    }
    headers
}

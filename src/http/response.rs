//! Response building and one-shot finalization.
//!
//! A [`Response`] accumulates a status and headers until a finalizing call
//! (`send`, `json` or `end`). Finalizing serializes the response, writes it
//! to the bound [`Connection`] and closes it. Afterwards every mutating call
//! fails with [`ResponseError::AlreadySent`].

use super::connection::Connection;
use super::payload::Payload;
use super::status::{self, StatusError};
use bytes::{BufMut, BytesMut};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io;

/// HTTP version written in the status line
pub const HTTP_VERSION: &str = "1.1";

/// Product name reported in the `Server` header
pub const SERVER_NAME: &str = env!("CARGO_PKG_NAME");

/// Product version reported in the `Server` header
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const CONTENT_TYPE_TEXT: &str = "text/html; charset=utf-8";
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";
pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";

const JSON_INDENT: &[u8] = b"    ";

/// Errors raised by response operations.
#[derive(Debug)]
pub enum ResponseError {
    /// The response was already finalized
    AlreadySent,
    /// `get` on a header that was never set
    HeaderNotFound(String),
    /// Status code with no reason phrase
    Status(StatusError),
    /// Payload could not be serialized to JSON
    Serialize(serde_json::Error),
    /// Writing to or closing the connection failed
    Io(io::Error),
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseError::AlreadySent => {
                write!(f, "Cannot modify response after it has been sent")
            }
            ResponseError::HeaderNotFound(name) => write!(f, "Header {} does not exist", name),
            ResponseError::Status(e) => write!(f, "{}", e),
            ResponseError::Serialize(e) => write!(f, "JSON serialization failed: {}", e),
            ResponseError::Io(e) => write!(f, "Connection error: {}", e),
        }
    }
}

impl std::error::Error for ResponseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResponseError::Status(e) => Some(e),
            ResponseError::Serialize(e) => Some(e),
            ResponseError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StatusError> for ResponseError {
    fn from(e: StatusError) -> Self {
        ResponseError::Status(e)
    }
}

impl From<serde_json::Error> for ResponseError {
    fn from(e: serde_json::Error) -> Self {
        ResponseError::Serialize(e)
    }
}

impl From<io::Error> for ResponseError {
    fn from(e: io::Error) -> Self {
        ResponseError::Io(e)
    }
}

/// Response to a single request, bound to that request's connection.
pub struct Response<'c> {
    connection: Box<dyn Connection + 'c>,
    headers: BTreeMap<String, String>,
    status_code: u16,
    status_message: &'static str,
    headers_sent: bool,
}

impl<'c> Response<'c> {
    /// New `200 OK` response carrying the `Server` header.
    pub fn new(connection: impl Connection + 'c) -> Self {
        let mut response = Self {
            connection: Box::new(connection),
            headers: BTreeMap::new(),
            status_code: 200,
            status_message: "OK",
            headers_sent: false,
        };
        response.put_header("Server", server_info(), false);
        response
    }

    /// Send `data`, inferring `Content-Type` from its kind.
    ///
    /// An integer that is a valid status code is sent as that status with an
    /// empty body. This is a finalizing call.
    pub fn send(&mut self, data: impl Into<Payload>) -> Result<&mut Self, ResponseError> {
        self.check_sendable()?;

        match data.into() {
            Payload::Null => self.finalize(&[])?,
            Payload::Bytes(bytes) => {
                self.put_header("Content-Type", CONTENT_TYPE_OCTET_STREAM, true);
                self.finalize(&bytes)?;
            }
            Payload::Text(text) => self.send_text(&text)?,
            Payload::Bool(value) => self.send_text(if value { "true" } else { "false" })?,
            Payload::Int(code) if status::is_valid(code) => {
                self.set_status(code as u16)?;
                self.finalize(&[])?;
            }
            Payload::Int(value) => self.send_text(&value.to_string())?,
            Payload::Float(value) => self.send_text(&value.to_string())?,
            Payload::Json(value) => return self.json(&value),
        }

        Ok(self)
    }

    /// Send `value` serialized as pretty-printed JSON.
    ///
    /// A `Content-Type` already set by the handler is kept. This is a
    /// finalizing call.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self, ResponseError> {
        self.check_sendable()?;

        let body = to_pretty_json(value)?;
        self.put_header("Content-Type", CONTENT_TYPE_JSON, false);
        self.finalize(&body)?;
        Ok(self)
    }

    /// Set the status code; the reason phrase follows from the code.
    pub fn status(&mut self, code: u16) -> Result<&mut Self, ResponseError> {
        self.check_sendable()?;
        self.set_status(code)?;
        Ok(self)
    }

    /// Set a header, replacing any previous value.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<&mut Self, ResponseError> {
        self.check_sendable()?;
        self.put_header(name, value, true);
        Ok(self)
    }

    /// Look up a header by exact name.
    pub fn get(&self, name: &str) -> Result<&str, ResponseError> {
        self.headers
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ResponseError::HeaderNotFound(name.to_string()))
    }

    /// Finalize without writing anything and close the connection.
    pub fn end(&mut self) -> Result<(), ResponseError> {
        self.check_sendable()?;
        self.headers_sent = true;
        self.connection.close()?;
        Ok(())
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn status_message(&self) -> &'static str {
        self.status_message
    }

    /// Whether the response has been finalized.
    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    fn check_sendable(&self) -> Result<(), ResponseError> {
        if self.headers_sent {
            return Err(ResponseError::AlreadySent);
        }
        Ok(())
    }

    fn set_status(&mut self, code: u16) -> Result<(), ResponseError> {
        self.status_message = status::reason(code)?;
        self.status_code = code;
        Ok(())
    }

    fn put_header(&mut self, name: impl Into<String>, value: impl Into<String>, overwrite: bool) {
        let name = name.into();
        if !overwrite && self.headers.contains_key(&name) {
            return;
        }
        self.headers.insert(name, value.into());
    }

    fn send_text(&mut self, text: &str) -> Result<(), ResponseError> {
        self.put_header("Content-Type", CONTENT_TYPE_TEXT, true);
        self.finalize(text.as_bytes())
    }

    /// Serialize, write and close. The response is locked even if the
    /// write fails, so a half-written response is never retried.
    fn finalize(&mut self, body: &[u8]) -> Result<(), ResponseError> {
        self.put_header("Content-Length", body.len().to_string(), false);
        self.put_header("Date", http_date(), false);

        let wire = self.serialize(body);
        self.headers_sent = true;

        let written = self.connection.write(&wire);
        let closed = self.connection.close();
        written?;
        closed?;
        Ok(())
    }

    fn serialize(&self, body: &[u8]) -> BytesMut {
        let status_line = format!(
            "HTTP/{} {} {}\r\n",
            HTTP_VERSION, self.status_code, self.status_message
        );
        let head_len: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.len() + value.len() + 4)
            .sum();

        let mut wire = BytesMut::with_capacity(status_line.len() + head_len + 2 + body.len());
        wire.put_slice(status_line.as_bytes());
        for (name, value) in &self.headers {
            wire.put_slice(name.as_bytes());
            wire.put_slice(b": ");
            wire.put_slice(value.as_bytes());
            wire.put_slice(b"\r\n");
        }
        wire.put_slice(b"\r\n");
        wire.put_slice(body);
        wire
    }
}

impl fmt::Debug for Response<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status_code", &self.status_code)
            .field("status_message", &self.status_message)
            .field("headers", &self.headers)
            .field("headers_sent", &self.headers_sent)
            .finish_non_exhaustive()
    }
}

fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut body = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(JSON_INDENT);
    let mut serializer = serde_json::Serializer::with_formatter(&mut body, formatter);
    value.serialize(&mut serializer)?;
    Ok(body)
}

/// Current time as `Day, DD Mon YYYY HH:MM:SS GMT`.
pub fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `<name>/<version> (<OS>)`
pub fn server_info() -> String {
    format!("{}/{} ({})", SERVER_NAME, SERVER_VERSION, os_name())
}

fn os_name() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        "freebsd" => "FreeBSD",
        "openbsd" => "OpenBSD",
        "netbsd" => "NetBSD",
        _ if cfg!(unix) => "Unix",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::connection::MemoryConnection;
    use serde_json::json;
    use std::collections::HashMap;

    fn response() -> (Response<'static>, MemoryConnection) {
        let conn = MemoryConnection::new();
        (Response::new(conn.clone()), conn)
    }

    #[test]
    fn test_defaults() {
        let (res, _) = response();
        assert_eq!(res.status_code(), 200);
        assert_eq!(res.status_message(), "OK");
        assert!(!res.headers_sent());
        assert_eq!(res.get("Server").unwrap(), server_info());
    }

    #[test]
    fn test_set_and_get_header() {
        let (mut res, _) = response();
        res.set("Content-Type", "application/json").unwrap();
        res.set("X-Empty", "").unwrap();
        assert_eq!(res.get("Content-Type").unwrap(), "application/json");
        assert_eq!(res.get("X-Empty").unwrap(), "");
    }

    #[test]
    fn test_set_header_overwrites() {
        let (mut res, _) = response();
        res.set("X-Custom", "first").unwrap();
        res.set("X-Custom", "second").unwrap();
        assert_eq!(res.get("X-Custom").unwrap(), "second");
    }

    #[test]
    fn test_get_missing_header() {
        let (res, _) = response();
        let err = res.get("Non-Existent").unwrap_err();
        assert!(matches!(err, ResponseError::HeaderNotFound(ref name) if name == "Non-Existent"));
    }

    #[test]
    fn test_header_names_case_sensitive() {
        let (mut res, _) = response();
        res.set("X-Case", "upper").unwrap();
        assert!(res.get("x-case").is_err());
    }

    #[test]
    fn test_status_sets_message() {
        let (mut res, _) = response();
        res.status(404).unwrap();
        assert_eq!(res.status_code(), 404);
        assert_eq!(res.status_message(), "Not Found");
    }

    #[test]
    fn test_invalid_status_rejected() {
        let (mut res, _) = response();
        let err = res.status(999).unwrap_err();
        assert!(matches!(err, ResponseError::Status(StatusError(999))));
        assert_eq!(res.status_code(), 200);
    }

    #[test]
    fn test_send_bytes() {
        let (mut res, conn) = response();
        res.send(vec![b'a', b'b', b'c']).unwrap();

        let transcript = conn.transcript();
        assert_eq!(transcript.body(), b"abc");
        assert_eq!(res.get("Content-Type").unwrap(), CONTENT_TYPE_OCTET_STREAM);
        assert_eq!(res.get("Content-Length").unwrap(), "3");
        assert!(transcript.is_closed());
    }

    #[test]
    fn test_send_string() {
        let (mut res, conn) = response();
        res.send("hello world").unwrap();
        assert_eq!(conn.transcript().body(), b"hello world");
        assert_eq!(res.status_code(), 200);
        assert_eq!(res.get("Content-Type").unwrap(), CONTENT_TYPE_TEXT);
    }

    #[test]
    fn test_send_char() {
        let (mut res, conn) = response();
        res.send('A').unwrap();
        assert_eq!(conn.transcript().body(), b"A");
        assert_eq!(res.get("Content-Type").unwrap(), CONTENT_TYPE_TEXT);
    }

    #[test]
    fn test_send_bool() {
        let (mut res, conn) = response();
        res.send(true).unwrap();
        assert_eq!(conn.transcript().body(), b"true");
        assert_eq!(res.get("Content-Type").unwrap(), CONTENT_TYPE_TEXT);

        let (mut res, conn) = response();
        res.send(false).unwrap();
        assert_eq!(conn.transcript().body(), b"false");
    }

    #[test]
    fn test_send_plain_number() {
        let (mut res, conn) = response();
        res.send(42).unwrap();
        assert_eq!(conn.transcript().body(), b"42");
        assert_eq!(res.status_code(), 200);
        assert_eq!(res.get("Content-Type").unwrap(), CONTENT_TYPE_TEXT);
    }

    #[test]
    fn test_send_float() {
        let (mut res, conn) = response();
        res.send(2.5).unwrap();
        assert_eq!(conn.transcript().body(), b"2.5");
        assert_eq!(res.get("Content-Type").unwrap(), CONTENT_TYPE_TEXT);
    }

    #[test]
    fn test_send_status_code() {
        let (mut res, conn) = response();
        res.send(404).unwrap();

        let transcript = conn.transcript();
        assert!(transcript.body().is_empty());
        assert!(transcript.head().starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert_eq!(res.status_code(), 404);
        assert!(res.get("Content-Type").is_err());
        assert_eq!(res.get("Content-Length").unwrap(), "0");
    }

    #[test]
    fn test_send_null() {
        let (mut res, conn) = response();
        res.send(()).unwrap();
        assert!(conn.transcript().body().is_empty());
        assert_eq!(res.status_code(), 200);
        assert!(res.get("Content-Type").is_err());
    }

    #[test]
    fn test_send_map_is_json() {
        let (mut res, conn) = response();
        let mut data = HashMap::new();
        data.insert("two".to_string(), 2);
        data.insert("one".to_string(), 1);
        res.send(data).unwrap();

        assert_eq!(
            conn.transcript().body(),
            b"{\n    \"one\": 1,\n    \"two\": 2\n}"
        );
        assert_eq!(res.get("Content-Type").unwrap(), CONTENT_TYPE_JSON);
    }

    #[test]
    fn test_json_object() {
        let (mut res, conn) = response();
        let data = json!({"key": "value", "number": 42});
        res.json(&data).unwrap();

        let body = conn.transcript().body().to_vec();
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&body).unwrap(), data);
        assert!(String::from_utf8(body).unwrap().contains("\n    \"key\": \"value\""));
        assert_eq!(res.get("Content-Type").unwrap(), CONTENT_TYPE_JSON);
    }

    #[test]
    fn test_json_scalars_and_arrays() {
        let (mut res, conn) = response();
        res.json(&vec![1, 2, 3]).unwrap();
        assert_eq!(conn.transcript().body(), b"[\n    1,\n    2,\n    3\n]");

        let (mut res, conn) = response();
        res.json("test string").unwrap();
        assert_eq!(conn.transcript().body(), b"\"test string\"");

        let (mut res, conn) = response();
        res.json(&true).unwrap();
        assert_eq!(conn.transcript().body(), b"true");
        assert_eq!(res.get("Content-Type").unwrap(), CONTENT_TYPE_JSON);
    }

    #[test]
    fn test_json_struct() {
        #[derive(Serialize)]
        struct Pet {
            name: &'static str,
            age: u8,
        }

        let (mut res, conn) = response();
        res.json(&Pet { name: "Rex", age: 3 }).unwrap();
        assert_eq!(
            conn.transcript().body(),
            b"{\n    \"name\": \"Rex\",\n    \"age\": 3\n}"
        );
    }

    #[test]
    fn test_json_keeps_handler_content_type() {
        let (mut res, _) = response();
        res.set("Content-Type", "application/vnd.api+json").unwrap();
        res.json(&json!({})).unwrap();
        assert_eq!(res.get("Content-Type").unwrap(), "application/vnd.api+json");
    }

    #[test]
    fn test_content_length_and_date_first_write_wins() {
        let (mut res, _) = response();
        res.set("Content-Length", "99").unwrap();
        res.set("Date", "Thu, 01 Jan 1970 00:00:00 GMT").unwrap();
        res.send("abc").unwrap();
        assert_eq!(res.get("Content-Length").unwrap(), "99");
        assert_eq!(res.get("Date").unwrap(), "Thu, 01 Jan 1970 00:00:00 GMT");
    }

    #[test]
    fn test_date_header_format() {
        let (mut res, _) = response();
        res.send("x").unwrap();
        let date = res.get("Date").unwrap();
        assert!(date.ends_with(" GMT"));
        assert!(chrono::DateTime::parse_from_rfc2822(date).is_ok());
    }

    #[test]
    fn test_wire_format() {
        let (mut res, conn) = response();
        res.status(201).unwrap().set("X-Id", "7").unwrap().send("made").unwrap();

        let transcript = conn.transcript();
        let written = String::from_utf8(transcript.written().to_vec()).unwrap();
        assert!(written.starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(written.contains("\r\nX-Id: 7\r\n"));
        assert!(written.contains("\r\nContent-Length: 4\r\n"));
        assert!(written.ends_with("\r\n\r\nmade"));
        assert_eq!(transcript.writes(), 1);
        assert_eq!(transcript.header("Server"), Some(server_info()));
    }

    #[test]
    fn test_second_send_fails() {
        let (mut res, conn) = response();
        res.send("test").unwrap();
        assert!(matches!(res.send("again"), Err(ResponseError::AlreadySent)));
        assert!(matches!(res.json(&json!({"key": "value"})), Err(ResponseError::AlreadySent)));
        assert_eq!(conn.transcript().writes(), 1);
    }

    #[test]
    fn test_mutation_after_send_fails() {
        let (mut res, _) = response();
        res.send("test").unwrap();
        assert!(matches!(res.set("X-Custom", "value"), Err(ResponseError::AlreadySent)));
        assert!(matches!(res.status(500), Err(ResponseError::AlreadySent)));
        assert!(matches!(res.end(), Err(ResponseError::AlreadySent)));
        assert!(res.headers_sent());
    }

    #[test]
    fn test_end_closes_without_writing() {
        let (mut res, conn) = response();
        res.end().unwrap();

        let transcript = conn.transcript();
        assert!(transcript.is_closed());
        assert!(transcript.written().is_empty());
        assert!(res.headers_sent());
        assert!(matches!(res.send("test"), Err(ResponseError::AlreadySent)));
    }

    #[test]
    fn test_server_info_format() {
        let info = server_info();
        assert!(info.starts_with(&format!("{}/{} (", SERVER_NAME, SERVER_VERSION)));
        assert!(info.ends_with(')'));
    }
}

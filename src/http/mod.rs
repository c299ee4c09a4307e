//! HTTP/1.1 wire handling: request parsing, response building and the
//! small tables they rely on.

pub mod connection;
pub mod framing;
pub mod payload;
pub mod request;
pub mod response;
pub mod status;
pub mod url_codec;
pub mod verb;

pub use connection::{Connection, TcpConnection};
#[cfg(test)]
pub use connection::{MemoryConnection, Transcript};
pub use payload::Payload;
pub use request::{ParseError, Request};
pub use response::{Response, ResponseError};
pub use status::StatusError;
pub use url_codec::DecodeError;
pub use verb::{HttpVerb, VerbError};

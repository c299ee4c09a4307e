//! rexpress: a small HTTP/1.1 server with an Express-style API.
//!
//! An [`App`] collects handlers per verb and serves them from a background
//! accept loop:
//!
//! - [`net`]: typed socket lifecycle (create, bind, listen, connect)
//! - [`http`]: request parsing, URL decoding and the response builder
//! - [`router`]: verb dispatch for the root path
//! - [`server`]: the readiness-driven accept loop
//! - [`config`]: CLI and TOML configuration for the demo binary

pub mod app;
pub mod config;
pub mod http;
pub mod net;
pub mod router;
pub mod server;

pub use app::App;
pub use config::{Config, ConfigError};
pub use http::{Payload, Request, Response, ResponseError};
pub use router::{HandlerResult, Router};
pub use server::{Server, ServerError, ServerOptions};

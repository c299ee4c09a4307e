//! Raw network endpoints.
//!
//! The socket lifecycle is a linear progression encoded in the type system:
//!
//! ```text
//! Socket ──bind()──▶ BindingSocket ──listen()──▶ ListeningSocket
//!    └──connect()──▶ ConnectingSocket
//! ```
//!
//! Every syscall result is validated; a failure is returned as a
//! [`SocketError`] and is never retried.

pub mod socket;

pub use socket::{
    BindingSocket, ConnectingSocket, ListeningSocket, Socket, SocketConfig, SocketError,
};

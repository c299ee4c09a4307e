//! Accept loop.
//!
//! A single background thread waits for readiness on the listening socket
//! with mio, then accepts and serves connections one at a time. Each
//! connection carries exactly one request: it is read until framing says the
//! request is complete, parsed, dispatched through the router and closed.
//!
//! The loop wakes at least every `poll_interval` to observe `stop()`.

use crate::http::framing::{self, Framing};
use crate::http::{Request, Response, TcpConnection};
use crate::net::{ListeningSocket, SocketConfig, SocketError};
use crate::router::Router;
use bytes::BytesMut;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::AsRawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(0);

/// Readiness events fetched per poll
const EVENT_CAPACITY: usize = 128;

/// Bytes requested per read
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Reading stops before the buffer would grow past this
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 1024 * 1024;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(5000);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tunables for the accept loop and per-connection reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    pub chunk_size: usize,
    pub max_request_size: usize,
    /// Zero disables the timeout
    pub read_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Accept loop errors
#[derive(Debug)]
pub enum ServerError {
    Socket(SocketError),
    Io(io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Socket(e) => write!(f, "{}", e),
            ServerError::Io(e) => write!(f, "Server I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Socket(e) => Some(e),
            ServerError::Io(e) => Some(e),
        }
    }
}

impl From<SocketError> for ServerError {
    fn from(e: SocketError) -> Self {
        ServerError::Socket(e)
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Io(e)
    }
}

/// A listening socket plus the thread that serves it.
pub struct Server {
    socket: Arc<ListeningSocket>,
    router: Arc<Router>,
    options: ServerOptions,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Server {
    /// Wrap an already listening socket. The socket is switched to
    /// non-blocking mode for the readiness loop.
    pub fn new(
        socket: ListeningSocket,
        router: Router,
        options: ServerOptions,
    ) -> Result<Self, ServerError> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket: Arc::new(socket),
            router: Arc::new(router),
            options,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    /// Create, bind and listen according to `config`.
    pub fn bind(
        config: SocketConfig,
        router: Router,
        options: ServerOptions,
    ) -> Result<Self, ServerError> {
        Self::new(ListeningSocket::new(config)?, router, options)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the accept loop on a background thread. Returns immediately;
    /// launching a running server does nothing.
    pub fn launch(&mut self) -> Result<(), ServerError> {
        if self.is_running() {
            return Ok(());
        }

        let poll = Poll::new()?;
        let fd = self.socket.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), LISTENER_TOKEN, Interest::READABLE)?;

        self.running.store(true, Ordering::Release);

        let socket = Arc::clone(&self.socket);
        let router = Arc::clone(&self.router);
        let running = Arc::clone(&self.running);
        let options = self.options;

        let spawned = thread::Builder::new()
            .name("rexpress-accept".to_string())
            .spawn(move || {
                let _running = RunningGuard(Arc::clone(&running));
                if let Err(e) = accept_loop(poll, &socket, &router, &options, &running) {
                    error!(error = %e, "Accept loop failed");
                }
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                info!(addr = ?self.socket.local_addr().ok(), "Server launched");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Stop the accept loop and wait for the thread to exit. The connection
    /// being served, if any, is finished first. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Accept thread panicked");
            }
            info!("Server stopped");
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.socket.local_addr().ok())
            .field("options", &self.options)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Clears the running flag however the accept thread exits.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn accept_loop(
    mut poll: Poll,
    socket: &ListeningSocket,
    router: &Router,
    options: &ServerOptions,
    running: &AtomicBool,
) -> io::Result<()> {
    let mut events = Events::with_capacity(EVENT_CAPACITY);

    while running.load(Ordering::Acquire) {
        match poll.poll(&mut events, Some(options.poll_interval)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        for event in events.iter() {
            if event.token() == LISTENER_TOKEN {
                accept_ready(socket, router, options);
            }
        }
    }

    Ok(())
}

/// Accept until the queue is drained; readiness is edge-triggered.
fn accept_ready(socket: &ListeningSocket, router: &Router, options: &ServerOptions) {
    loop {
        match socket.accept() {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "Accepted connection");
                handle_connection(stream, peer, router, options);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_connection_error(&e) => {
                debug!(error = %e, "Dropping connection that failed during accept");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                break;
            }
        }
    }
}

/// Errors that concern only the connection being accepted, not the
/// listener. The rest of the queue can still be drained after these.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Unsupported
    )
}

/// Serve one request on `stream` and close it. Errors never escape.
pub(crate) fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    router: &Router,
    options: &ServerOptions,
) {
    let timeout = (!options.read_timeout.is_zero()).then_some(options.read_timeout);
    if let Err(e) = stream.set_read_timeout(timeout) {
        warn!(peer = %peer, error = %e, "Failed to set read timeout");
    }

    let raw = match read_request(&mut stream, options) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(peer = %peer, error = %e, "Read failed");
            return;
        }
    };

    if raw.is_empty() {
        debug!(peer = %peer, "No request bytes kept, closing");
        return;
    }

    let mut response = Response::new(TcpConnection::new(stream));

    let request = match Request::parse(raw.freeze()) {
        Ok(request) => request,
        Err(e) => {
            warn!(peer = %peer, error = %e, "Rejecting malformed request");
            if let Err(e) = response.send(400) {
                debug!(peer = %peer, error = %e, "Failed to send 400");
            }
            return;
        }
    };

    debug!(
        peer = %peer,
        method = request.method(),
        url = request.original_url(),
        "Dispatching request"
    );

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| router.run(&request, &mut response)));

    let failed = match outcome {
        Ok(Ok(0)) => {
            trace!(peer = %peer, path = request.path(), "Request not routed");
            false
        }
        Ok(Ok(ran)) => {
            trace!(peer = %peer, handlers = ran, "Request handled");
            false
        }
        Ok(Err(e)) => {
            warn!(peer = %peer, error = %e, "Request handling failed");
            true
        }
        Err(payload) => {
            error!(peer = %peer, panic = panic_message(payload.as_ref()), "Handler panicked");
            true
        }
    };

    if failed && !response.headers_sent() {
        if let Err(e) = response.send(500) {
            debug!(peer = %peer, error = %e, "Failed to send 500");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Read until the request is framed, the peer stops sending, or the next
/// chunk would take the buffer past the size cap. An overflowing chunk is
/// dropped whole; what was read before it is kept. Timeouts end the read
/// without error.
fn read_request(stream: &mut TcpStream, options: &ServerOptions) -> io::Result<BytesMut> {
    let mut buffer = BytesMut::with_capacity(options.chunk_size);
    let mut chunk = vec![0u8; options.chunk_size.max(1)];

    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                debug!(received = buffer.len(), "Read timed out");
                break;
            }
            Err(e) => return Err(e),
        };

        if buffer.len() + n > options.max_request_size {
            debug!(
                kept = buffer.len(),
                dropped = n,
                limit = options.max_request_size,
                "Request exceeds size cap, reading stopped"
            );
            break;
        }

        buffer.extend_from_slice(&chunk[..n]);

        match framing::inspect(&buffer) {
            Framing::Complete => break,
            Framing::NeedHead | Framing::NeedBody(_) => {}
        }
    }

    Ok(buffer)
}

//! Socket creation, binding and listening on top of `socket2`.

use socket2::{Domain, Protocol, SockAddr, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use tracing::debug;

/// Default port used when none is configured
pub const DEFAULT_PORT: u16 = 3000;

/// Immutable socket configuration, supplied once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    /// Address family (IPv4 or IPv6)
    pub domain: Domain,
    /// Socket type, normally `STREAM`
    pub socket_type: Type,
    /// Transport protocol, `None` lets the kernel pick
    pub protocol: Option<Protocol>,
    /// Port to bind or connect to
    pub port: u16,
    /// Local interface to bind, or remote host to connect to
    pub interface: IpAddr,
    /// Pending connection queue length for listening sockets
    pub backlog: i32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            domain: Domain::IPV4,
            socket_type: Type::STREAM,
            protocol: Some(Protocol::TCP),
            port: DEFAULT_PORT,
            interface: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            backlog: libc::SOMAXCONN,
        }
    }
}

impl SocketConfig {
    /// TCP/IPv4 configuration for `port` on all interfaces.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// TCP configuration for an explicit socket address.
    pub fn for_address(addr: SocketAddr) -> Self {
        Self {
            domain: Domain::for_address(addr),
            port: addr.port(),
            interface: addr.ip(),
            ..Self::default()
        }
    }

    pub fn with_interface(mut self, interface: IpAddr) -> Self {
        self.interface = interface;
        self
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// The address this configuration binds or connects to.
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.interface, self.port)
    }

    fn validate(&self) -> Result<(), SocketError> {
        if self.backlog < 0 {
            return Err(SocketError::InvalidConfig(format!(
                "backlog must be non-negative, got {}",
                self.backlog
            )));
        }

        let family_matches = match self.interface {
            IpAddr::V4(_) => self.domain == Domain::IPV4,
            IpAddr::V6(_) => self.domain == Domain::IPV6,
        };
        if !family_matches {
            return Err(SocketError::InvalidConfig(format!(
                "interface {} does not match address family {:?}",
                self.interface, self.domain
            )));
        }

        Ok(())
    }
}

/// Socket layer errors. Each carries the platform error where one exists.
#[derive(Debug)]
pub enum SocketError {
    /// Configuration rejected before any syscall was made
    InvalidConfig(String),
    /// `socket()` failed
    Create(io::Error),
    /// Setting a socket option failed
    SetOption(&'static str, io::Error),
    /// `bind()` failed
    Bind(SocketAddr, io::Error),
    /// `listen()` failed
    Listen(io::Error),
    /// `connect()` failed
    Connect(SocketAddr, io::Error),
    /// Querying the local address failed
    LocalAddr(io::Error),
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketError::InvalidConfig(msg) => write!(f, "Invalid socket config: {}", msg),
            SocketError::Create(e) => write!(f, "Socket operation failed: socket: {}", e),
            SocketError::SetOption(opt, e) => {
                write!(f, "Socket operation failed: setsockopt {}: {}", opt, e)
            }
            SocketError::Bind(addr, e) => {
                write!(f, "Socket operation failed: bind {}: {}", addr, e)
            }
            SocketError::Listen(e) => write!(f, "Socket operation failed: listen: {}", e),
            SocketError::Connect(addr, e) => {
                write!(f, "Socket operation failed: connect {}: {}", addr, e)
            }
            SocketError::LocalAddr(e) => {
                write!(f, "Socket operation failed: getsockname: {}", e)
            }
        }
    }
}

impl std::error::Error for SocketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SocketError::InvalidConfig(_) => None,
            SocketError::Create(e)
            | SocketError::SetOption(_, e)
            | SocketError::Bind(_, e)
            | SocketError::Listen(e)
            | SocketError::Connect(_, e)
            | SocketError::LocalAddr(e) => Some(e),
        }
    }
}

/// A freshly created socket with address reuse enabled.
///
/// The handle is closed when the value is dropped, whatever state it reached.
#[derive(Debug)]
pub struct Socket {
    inner: socket2::Socket,
    config: SocketConfig,
}

impl Socket {
    /// Create the native handle described by `config`.
    pub fn new(config: SocketConfig) -> Result<Self, SocketError> {
        config.validate()?;

        let inner = socket2::Socket::new(config.domain, config.socket_type, config.protocol)
            .map_err(SocketError::Create)?;

        // Rebinding right after a restart must not fail on TIME_WAIT
        inner
            .set_reuse_address(true)
            .map_err(|e| SocketError::SetOption("SO_REUSEADDR", e))?;

        debug!(
            domain = ?config.domain,
            port = config.port,
            interface = %config.interface,
            "Socket created"
        );

        Ok(Self { inner, config })
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// The configured address (not necessarily the bound one when port is 0).
    pub fn address(&self) -> SocketAddr {
        self.config.address()
    }

    /// Bind the handle to the configured local address.
    pub fn bind(self) -> Result<BindingSocket, SocketError> {
        let addr = self.address();
        self.inner
            .bind(&SockAddr::from(addr))
            .map_err(|e| SocketError::Bind(addr, e))?;

        debug!(addr = %addr, "Socket bound");
        Ok(BindingSocket { socket: self })
    }

    /// Connect the handle to the configured remote address.
    pub fn connect(self) -> Result<ConnectingSocket, SocketError> {
        let addr = self.address();
        self.inner
            .connect(&SockAddr::from(addr))
            .map_err(|e| SocketError::Connect(addr, e))?;

        debug!(addr = %addr, "Socket connected");
        Ok(ConnectingSocket { socket: self })
    }

    fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        let addr = self.inner.local_addr().map_err(SocketError::LocalAddr)?;
        addr.as_socket().ok_or_else(|| {
            SocketError::LocalAddr(io::Error::new(
                io::ErrorKind::Unsupported,
                "local address is not an IP socket address",
            ))
        })
    }
}

/// A socket bound to a local address.
#[derive(Debug)]
pub struct BindingSocket {
    socket: Socket,
}

impl BindingSocket {
    /// Create and bind in one step.
    pub fn new(config: SocketConfig) -> Result<Self, SocketError> {
        Socket::new(config)?.bind()
    }

    pub fn config(&self) -> &SocketConfig {
        self.socket.config()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.socket.local_addr()
    }

    /// Start listening with the configured backlog.
    pub fn listen(self) -> Result<ListeningSocket, SocketError> {
        let backlog = self.socket.config.backlog;
        self.socket
            .inner
            .listen(backlog)
            .map_err(SocketError::Listen)?;

        debug!(backlog, "Socket listening");
        Ok(ListeningSocket {
            socket: self.socket,
        })
    }
}

/// A bound socket accepting connections.
#[derive(Debug)]
pub struct ListeningSocket {
    socket: Socket,
}

impl ListeningSocket {
    /// Create, bind and listen in one step.
    pub fn new(config: SocketConfig) -> Result<Self, SocketError> {
        BindingSocket::new(config)?.listen()
    }

    pub fn config(&self) -> &SocketConfig {
        self.socket.config()
    }

    /// The bound address, with the kernel-assigned port when port 0 was requested.
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.socket.local_addr()
    }

    /// Toggle non-blocking mode on the listening handle.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), SocketError> {
        self.socket
            .inner
            .set_nonblocking(nonblocking)
            .map_err(|e| SocketError::SetOption("O_NONBLOCK", e))
    }

    /// Accept one pending connection.
    ///
    /// The returned stream is always in blocking mode. `WouldBlock` is passed
    /// through untouched so a non-blocking caller can stop draining.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (conn, addr) = self.socket.inner.accept()?;
        // Accepted sockets inherit O_NONBLOCK on some platforms
        conn.set_nonblocking(false)?;

        let peer = addr.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "peer is not an IP socket address")
        })?;

        Ok((conn.into(), peer))
    }
}

impl AsRawFd for ListeningSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.inner.as_raw_fd()
    }
}

/// A socket connected to a remote endpoint.
#[derive(Debug)]
pub struct ConnectingSocket {
    socket: Socket,
}

impl ConnectingSocket {
    /// Create and connect in one step.
    pub fn new(config: SocketConfig) -> Result<Self, SocketError> {
        Socket::new(config)?.connect()
    }

    pub fn config(&self) -> &SocketConfig {
        self.socket.config()
    }

    pub fn into_stream(self) -> TcpStream {
        self.socket.inner.into()
    }
}

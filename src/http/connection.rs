//! The write/close seam a [`Response`](super::Response) is bound to.

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(test)]
use std::{cell::RefCell, rc::Rc};

/// Sink for a serialized response.
pub trait Connection {
    /// Write the whole buffer.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Close the connection. Closing twice is a no-op.
    fn close(&mut self) -> io::Result<()>;
}

/// A connection backed by an accepted TCP stream.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    closed: bool,
}

impl TcpConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

impl Connection for TcpConnection {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already closed",
            ));
        }
        self.stream.write_all(data)?;
        self.stream.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.shutdown(Shutdown::Both) {
            // Peer already went away
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// Everything a [`MemoryConnection`] has seen.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    written: Vec<u8>,
    writes: usize,
    closed: bool,
}

#[cfg(test)]
impl Transcript {
    /// All bytes written, in order.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Number of write calls.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The status line and headers, without the blank line.
    pub fn head(&self) -> String {
        let end = self.head_end().unwrap_or(self.written.len());
        String::from_utf8_lossy(&self.written[..end]).into_owned()
    }

    /// Bytes after the blank line ending the head.
    pub fn body(&self) -> &[u8] {
        match self.head_end() {
            Some(end) => &self.written[end + 4..],
            None => &[],
        }
    }

    /// Value of a header in the written head.
    pub fn header(&self, name: &str) -> Option<String> {
        self.head().split("\r\n").skip(1).find_map(|line| {
            let (key, value) = line.split_once(": ")?;
            (key == name).then(|| value.to_string())
        })
    }

    fn head_end(&self) -> Option<usize> {
        super::request::find_head_end(&self.written)
    }
}

/// In-memory connection for exercising handlers without a socket.
///
/// Clones share one [`Transcript`], so a test keeps a clone and inspects it
/// after the response has consumed the other.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct MemoryConnection {
    transcript: Rc<RefCell<Transcript>>,
}

#[cfg(test)]
impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of what has been written so far.
    pub fn transcript(&self) -> Transcript {
        self.transcript.borrow().clone()
    }
}

#[cfg(test)]
impl Connection for MemoryConnection {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut transcript = self.transcript.borrow_mut();
        if transcript.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already closed",
            ));
        }
        transcript.written.extend_from_slice(data);
        transcript.writes += 1;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.transcript.borrow_mut().closed = true;
        Ok(())
    }
}

//! Deciding when enough bytes have been read to parse a request.
//!
//! A request is complete once its head has been terminated by a blank line
//! and the body holds as many bytes as `Content-Length` announces. Without
//! a `Content-Length` the body is taken to be empty.

use super::request::find_head_end;

/// Outcome of inspecting a partially read request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Head not terminated yet
    NeedHead,
    /// Head complete, this many body bytes still missing
    NeedBody(usize),
    /// Everything announced has arrived
    Complete,
}

/// Inspect `buffer` and report what is still missing.
pub fn inspect(buffer: &[u8]) -> Framing {
    let Some(head_end) = find_head_end(buffer) else {
        return Framing::NeedHead;
    };

    let body_start = head_end + 4;
    let expected = content_length(&buffer[..head_end]).unwrap_or(0);
    let received = buffer.len() - body_start;

    if received >= expected {
        Framing::Complete
    } else {
        Framing::NeedBody(expected - received)
    }
}

/// Value of the first well-formed `Content-Length` header in `head`.
fn content_length(head: &[u8]) -> Option<usize> {
    head.split(|&b| b == b'\n').skip(1).find_map(|line| {
        let line = std::str::from_utf8(line).ok()?;
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("content-length") {
            return None;
        }
        value.trim().parse().ok()
    })
}

// Copyright (C) 2024  parley developers

// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE.

//! CRLF framing over non-blocking streams.
//!
//! The read side accumulates bytes in a fixed per-connection buffer and
//! yields every complete frame with the terminator stripped. The write side
//! owns a byte queue per connection: lines are appended CRLF-terminated and
//! flushed when the socket accepts them.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use crate::message::MAX_MESSAGE_LEN;

fn is_delimiter(chr: u8) -> bool {
    chr == b'\r' || chr == b'\n'
}

/// Fullness of a frame returned by [`FrameScanner`]. A read may end in the
/// middle of a line; the tail comes back as `Partial`.
pub enum FrameStatus<'a> {
    Complete(&'a [u8]),
    Partial(&'a [u8]),
}

/// Yields frames from a raw read buffer, skipping empty lines.
pub struct FrameScanner<'a> {
    head: usize,
    buffer: &'a [u8],
}

impl<'a> FrameScanner<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        FrameScanner { head: 0, buffer }
    }
}

impl<'a> Iterator for FrameScanner<'a> {
    type Item = FrameStatus<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.buffer[self.head..];
        let start = rest.iter().position(|&c| !is_delimiter(c))?;
        let rest = &rest[start..];
        self.head += start;

        match rest.iter().position(|&c| is_delimiter(c)) {
            Some(end) => {
                self.head += end + 1;
                Some(FrameStatus::Complete(&rest[..end]))
            }
            None => {
                self.head = self.buffer.len();
                Some(FrameStatus::Partial(rest))
            }
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum FillOutcome {
    /// Bytes appended to the buffer.
    Read(usize),
    Blocked,
    Eof,
    /// No room left; the caller should drain frames first.
    Full,
}

/// Per-connection input accumulator, sized to one maximum wire message.
pub struct FrameBuffer {
    buf: [u8; MAX_MESSAGE_LEN],
    len: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        FrameBuffer { buf: [0; MAX_MESSAGE_LEN], len: 0 }
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends whatever the stream has to offer.
    pub fn fill<R: Read>(&mut self, reader: &mut R) -> io::Result<FillOutcome> {
        if self.len == self.buf.len() {
            return Ok(FillOutcome::Full);
        }
        match reader.read(&mut self.buf[self.len..]) {
            Ok(0) => Ok(FillOutcome::Eof),
            Ok(n) => {
                self.len += n;
                Ok(FillOutcome::Read(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(FillOutcome::Blocked),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(FillOutcome::Blocked),
            Err(e) => Err(e),
        }
    }

    /// Extracts every complete frame and shifts the partial tail to the
    /// front. A buffer that filled up without a single terminator belongs
    /// to a misbehaving peer: it is reset and the loss logged.
    pub fn take_frames(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        let mut partial_start = 0usize;
        let mut partial_end = 0usize;

        {
            let filled = &self.buf[..self.len];
            for status in FrameScanner::new(filled) {
                match status {
                    FrameStatus::Complete(frame) => {
                        frames.push(String::from_utf8_lossy(frame).into_owned());
                    }
                    FrameStatus::Partial(tail) => {
                        partial_start = tail.as_ptr() as usize - filled.as_ptr() as usize;
                        partial_end = partial_start + tail.len();
                    }
                }
            }
        }

        if partial_start != partial_end {
            if frames.is_empty() && partial_end - partial_start == self.buf.len() {
                log::warn!("input buffer filled without a line terminator, resetting");
                self.len = 0;
            } else {
                self.buf.copy_within(partial_start..partial_end, 0);
                self.len = partial_end - partial_start;
            }
        } else {
            self.len = 0;
        }

        frames
    }
}

#[derive(Debug, PartialEq)]
pub enum FlushOutcome {
    Drained,
    Blocked,
    Closed,
}

/// Appends `line` to the write queue, CRLF-terminated exactly once.
pub fn queue_line(wq: &mut VecDeque<u8>, line: &str) {
    let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
    wq.extend(line.as_bytes());
    wq.extend(b"\r\n");
}

/// Writes queued bytes until the queue drains or the socket pushes back.
/// A broken pipe reports `Closed` so the caller can tear the connection
/// down without treating it as an I/O failure.
pub fn flush_queue<W: Write>(writer: &mut W, wq: &mut VecDeque<u8>) -> io::Result<FlushOutcome> {
    loop {
        if wq.is_empty() {
            return Ok(FlushOutcome::Drained);
        }
        let buf = wq.make_contiguous();
        match writer.write(buf) {
            Ok(0) => return Ok(FlushOutcome::Closed),
            Ok(n) => {
                wq.drain(..n);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(FlushOutcome::Blocked),
            Err(e) if is_disconnect(&e) => return Ok(FlushOutcome::Closed),
            Err(e) => return Err(e),
        }
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}
